//! Environment variable helpers used to build configuration structs

use std::str::FromStr;
use thiserror::Error;

/// Error raised when an environment variable is present but unusable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value {value:?} for {name}: {reason}")]
pub struct EnvError {
    /// Variable name
    pub name: String,
    /// Raw value as read from the environment
    pub value: String,
    /// Parser message
    pub reason: String,
}

/// Read a variable, treating empty strings as unset
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse a variable. Unset yields `Ok(None)`.
pub fn env_parse<T>(name: &str) -> Result<Option<T>, EnvError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| EnvError {
            name: name.to_string(),
            value: raw,
            reason: e.to_string(),
        }),
    }
}
