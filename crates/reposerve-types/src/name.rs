use std::fmt;

use crate::class::{ObjectClass, SHARD_PREFIX_LEN};
use crate::error::TypeError;

/// Longest object name accepted, matching common filesystem limits.
pub const MAX_NAME_LEN: usize = 255;

/// A validated object identifier within a named collection.
///
/// Validation guarantees the name is a single, non-special path segment, so
/// it can be joined into a storage key without escaping its collection.
/// Names in content-addressed classes are additionally required to be hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectName(String);

impl ObjectName {
    /// Validate `raw` as an object name in `class`.
    pub fn parse(class: ObjectClass, raw: &str) -> Result<Self, TypeError> {
        if class.is_singleton() {
            return Err(TypeError::Singleton(class.as_str()));
        }
        if raw.is_empty() {
            return Err(TypeError::EmptyName);
        }
        if raw.len() > MAX_NAME_LEN {
            return Err(TypeError::NameTooLong {
                len: raw.len(),
                max: MAX_NAME_LEN,
            });
        }
        if raw == "." || raw == ".." {
            return Err(TypeError::InvalidName {
                name: raw.to_string(),
                reason: "relative path segment",
            });
        }
        if let Some(reason) = raw.chars().find_map(forbidden) {
            return Err(TypeError::InvalidName {
                name: raw.to_string(),
                reason,
            });
        }
        if class.is_content_addressed() && !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TypeError::NotHex(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The shard directory for this name: its first two characters.
    ///
    /// Names shorter than the prefix yield the whole name.
    pub fn shard(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(SHARD_PREFIX_LEN)
            .map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

fn forbidden(c: char) -> Option<&'static str> {
    match c {
        '/' | '\\' => Some("path separator"),
        '%' => Some("percent escape"),
        c if c.is_control() => Some("control character"),
        _ => None,
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectName({})", self.0)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
