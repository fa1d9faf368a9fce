//! Positional argument access for handlers.
//!
//! The facade hands handlers the decoded values untouched. `Args` performs
//! the arity and type checks, reporting mismatches as
//! [`DispatchError::InvalidArguments`].

use harbor_core::Value;

use super::error::DispatchError;

#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    method: &'a str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    #[must_use]
    pub fn new(method: &'a str, values: &'a [Value]) -> Self {
        Self { method, values }
    }

    #[must_use]
    pub fn method(&self) -> &'a str {
        self.method
    }

    #[must_use]
    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fails unless exactly `count` arguments were passed.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidArguments` on an arity mismatch.
    pub fn expect_len(&self, count: usize) -> Result<(), DispatchError> {
        if self.values.len() == count {
            Ok(())
        } else {
            Err(self.invalid(format!(
                "expected {count} argument(s), got {}",
                self.values.len()
            )))
        }
    }

    /// # Errors
    ///
    /// Returns `DispatchError::InvalidArguments` if `index` is out of range.
    pub fn value(&self, index: usize) -> Result<&'a Value, DispatchError> {
        self.values
            .get(index)
            .ok_or_else(|| self.invalid(format!("missing argument {index}")))
    }

    /// # Errors
    ///
    /// Returns `DispatchError::InvalidArguments` if the argument is missing
    /// or not a string.
    pub fn str(&self, index: usize) -> Result<&'a str, DispatchError> {
        let value = self.value(index)?;
        value
            .as_str()
            .ok_or_else(|| self.wrong_type(index, "string", value))
    }

    /// # Errors
    ///
    /// Returns `DispatchError::InvalidArguments` if the argument is missing
    /// or not an integer.
    pub fn i64(&self, index: usize) -> Result<i64, DispatchError> {
        let value = self.value(index)?;
        value
            .as_i64()
            .ok_or_else(|| self.wrong_type(index, "int", value))
    }

    /// # Errors
    ///
    /// Returns `DispatchError::InvalidArguments` if the argument is missing
    /// or not a float.
    pub fn f64(&self, index: usize) -> Result<f64, DispatchError> {
        let value = self.value(index)?;
        value
            .as_f64()
            .ok_or_else(|| self.wrong_type(index, "float", value))
    }

    /// # Errors
    ///
    /// Returns `DispatchError::InvalidArguments` if the argument is missing
    /// or not a bool.
    pub fn bool(&self, index: usize) -> Result<bool, DispatchError> {
        let value = self.value(index)?;
        value
            .as_bool()
            .ok_or_else(|| self.wrong_type(index, "bool", value))
    }

    fn wrong_type(&self, index: usize, expected: &str, got: &Value) -> DispatchError {
        self.invalid(format!(
            "argument {index} must be {expected}, got {}",
            got.type_name()
        ))
    }

    fn invalid(&self, detail: String) -> DispatchError {
        DispatchError::InvalidArguments(format!("{}: {detail}", self.method))
    }
}
