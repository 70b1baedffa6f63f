//! Fibonacci sequence tool.

use async_trait::async_trait;

use super::{ParamKind, ParamSpec, Tool, ToolArgs};

/// Largest `n` whose sequence still fits in `u128`.
const MAX_TERMS: i64 = 187;

/// Generate the first `n` Fibonacci numbers.
pub struct Fibonacci;

#[async_trait]
impl Tool for Fibonacci {
    fn name(&self) -> &str {
        "fibonacci"
    }

    fn description(&self) -> &str {
        "Generate the first n numbers of the Fibonacci sequence, starting 0, 1, 1, 2, ..."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "n",
            ParamKind::Integer,
            "Number of Fibonacci numbers to generate",
        )]
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<String> {
        let n = args.integer("n")?;
        if n < 0 {
            anyhow::bail!("n must be a non-negative integer, got {}", n);
        }
        if n > MAX_TERMS {
            anyhow::bail!("n must be at most {}, got {}", MAX_TERMS, n);
        }

        let joined = sequence(n as usize)
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Ok(joined)
    }
}

fn sequence(n: usize) -> Vec<u128> {
    let mut seq: Vec<u128> = Vec::with_capacity(n);
    for i in 0..n {
        let next = match i {
            0 => 0,
            1 => 1,
            _ => seq[i - 1] + seq[i - 2],
        };
        seq.push(next);
    }
    seq
}
