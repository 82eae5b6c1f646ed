//! Reference worker capabilities used by `fb worker` and the demo coordinator

use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, bail};
use serde_json::Value;
use tracing::debug;

use crate::error::BusError;
use crate::params::Params;
use crate::worker::{Command, CommandTable};

/// Upper bound for `sleep_ms`, so a stray request cannot park a worker for long
const MAX_SLEEP_MS: u64 = 60_000;

/// Sleeps for the requested number of milliseconds, then returns it
struct SleepMs;

#[async_trait]
impl Command for SleepMs {
    async fn call(&self, params: Params) -> Result<Vec<Value>> {
        let ms: u64 = params.arg(0)?;
        if ms > MAX_SLEEP_MS {
            bail!("sleep_ms: {} ms exceeds the {} ms limit", ms, MAX_SLEEP_MS);
        }
        debug!(ms, "SleepMs::call: sleeping");
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(vec![Value::from(ms)])
    }
}

/// Command table with `add`, `echo`, `sleep_ms` and `fail`
pub fn arithmetic_commands() -> Result<CommandTable, BusError> {
    let mut table = CommandTable::new();
    table
        .register_fn("add", |(a, b): (f64, f64)| Ok(number(a + b)))?
        .register_fn("echo", |args: Vec<Value>| Ok(args))?
        .register("sleep_ms", SleepMs)?
        .register_fn("fail", |(): ()| -> Result<()> { bail!("fail was requested") })?;
    Ok(table)
}

/// Integral sums stay integers on the wire
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn call(table: &CommandTable, name: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        table.get(name).unwrap().call(Params::positional(args)).await
    }

    #[tokio::test]
    async fn test_add_integers() {
        let table = arithmetic_commands().unwrap();
        assert_eq!(call(&table, "add", vec![json!(2), json!(3)]).await.unwrap(), vec![json!(5)]);
    }

    #[tokio::test]
    async fn test_add_floats() {
        let table = arithmetic_commands().unwrap();
        assert_eq!(
            call(&table, "add", vec![json!(0.5), json!(2)]).await.unwrap(),
            vec![json!(2.5)]
        );
    }

    #[tokio::test]
    async fn test_echo_returns_args_as_one_value() {
        let table = arithmetic_commands().unwrap();
        assert_eq!(
            call(&table, "echo", vec![json!("a"), json!(1)]).await.unwrap(),
            vec![json!(["a", 1])]
        );
    }

    #[tokio::test]
    async fn test_sleep_ms() {
        let table = arithmetic_commands().unwrap();
        assert_eq!(call(&table, "sleep_ms", vec![json!(1)]).await.unwrap(), vec![json!(1)]);
        assert!(call(&table, "sleep_ms", vec![json!(MAX_SLEEP_MS + 1)]).await.is_err());
    }

    #[tokio::test]
    async fn test_fail() {
        let table = arithmetic_commands().unwrap();
        let err = call(&table, "fail", vec![]).await.unwrap_err();
        assert!(err.to_string().contains("fail was requested"));
    }
}
