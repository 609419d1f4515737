use thiserror::Error;

/// Errors produced while classifying or validating protocol paths.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown object class: {0}")]
    UnknownClass(String),

    #[error("object name is empty")]
    EmptyName,

    #[error("object name too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("invalid object name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("object name is not hex: {0:?}")]
    NotHex(String),

    #[error("{0} does not take an object name")]
    Singleton(&'static str),
}
