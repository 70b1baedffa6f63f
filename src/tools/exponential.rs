//! Exponential (e^x) tool.

use async_trait::async_trait;
use serde::Serialize;

use super::{ParamKind, ParamSpec, Tool, ToolArgs};

/// Compute e^x for each number in a list.
pub struct Exponential;

#[derive(Debug, Serialize)]
struct ExponentialEntry {
    number: f64,
    exponential: f64,
}

#[async_trait]
impl Tool for Exponential {
    fn name(&self) -> &str {
        "exponential"
    }

    fn description(&self) -> &str {
        "Calculate exponential values (e^x) for a list of numbers"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "numbers",
            ParamKind::NumberList,
            "List of numbers to calculate exponential values for",
        )]
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<String> {
        let numbers = args.numbers("numbers")?;

        let mut entries = Vec::with_capacity(numbers.len());
        for &number in numbers {
            let exponential = number.exp();
            if !exponential.is_finite() {
                anyhow::bail!("e^{} overflows", number);
            }
            entries.push(ExponentialEntry {
                number,
                exponential,
            });
        }

        Ok(serde_json::to_string(&entries)?)
    }
}
