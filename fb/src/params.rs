//! Positional and keyword parameters carried by requests and state transitions

use eyre::{Result, eyre};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Keyword arguments, keyed by name
pub type Kwargs = serde_json::Map<String, Value>;

/// Positional and keyword arguments for one call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl Params {
    /// No arguments at all
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Kwargs::new(),
        }
    }

    pub fn keyword(kwargs: Kwargs) -> Self {
        Self { args: Vec::new(), kwargs }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Deserialize the parameters into a typed value
    ///
    /// Positional arguments are read as a sequence, so `T` is usually a tuple or a struct.
    /// Keyword arguments are read as a map. Mixing both in one call is rejected.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        match (self.args.is_empty(), self.kwargs.is_empty()) {
            (true, true) => serde_json::from_value(Value::Null)
                .or_else(|_| serde_json::from_value(Value::Array(Vec::new())))
                .map_err(|e| eyre!("Invalid arguments: {}", e)),
            (false, true) => serde_json::from_value(Value::Array(self.args.clone()))
                .map_err(|e| eyre!("Invalid positional arguments: {}", e)),
            (true, false) => serde_json::from_value(Value::Object(self.kwargs.clone()))
                .map_err(|e| eyre!("Invalid keyword arguments: {}", e)),
            (false, false) => Err(eyre!(
                "Cannot bind {} positional and {} keyword arguments together",
                self.args.len(),
                self.kwargs.len()
            )),
        }
    }

    /// Read one positional argument
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| eyre!("Missing positional argument {}", index))?;
        serde_json::from_value(value.clone()).map_err(|e| eyre!("Invalid positional argument {}: {}", index, e))
    }

    /// Read one keyword argument
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .kwargs
            .get(name)
            .ok_or_else(|| eyre!("Missing keyword argument '{}'", name))?;
        serde_json::from_value(value.clone()).map_err(|e| eyre!("Invalid keyword argument '{}': {}", name, e))
    }
}
