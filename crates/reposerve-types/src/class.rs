use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Number of leading identifier characters used as the shard directory.
pub const SHARD_PREFIX_LEN: usize = 2;

/// The fixed kinds of object a repository holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    /// Repository configuration. Exactly one per repository, no name.
    Config,
    /// Pack files, addressed by content hash.
    Data,
    /// Index files, addressed by content hash.
    Index,
    /// Key files.
    Keys,
    /// Lock files. Created and removed routinely.
    Locks,
    /// Snapshot descriptors.
    Snapshots,
}

/// Behavior flags that drive request handling for an [`ObjectClass`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassTraits {
    /// Long identifiers are stored below a two-character shard directory.
    pub shardable: bool,
    /// The class is a single object rather than a named collection.
    pub singleton: bool,
    /// A create request must not replace an existing object.
    pub immutable: bool,
}

impl ObjectClass {
    /// Every class, in protocol order.
    pub const ALL: [ObjectClass; 6] = [
        Self::Config,
        Self::Data,
        Self::Index,
        Self::Keys,
        Self::Locks,
        Self::Snapshots,
    ];

    /// The path token naming this class.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Data => "data",
            Self::Index => "index",
            Self::Keys => "keys",
            Self::Locks => "locks",
            Self::Snapshots => "snapshots",
        }
    }

    /// Look up a class by its path token. Matching is exact and case-sensitive.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.as_str() == token)
    }

    pub const fn traits(self) -> ClassTraits {
        match self {
            Self::Config => ClassTraits {
                shardable: false,
                singleton: true,
                immutable: true,
            },
            Self::Data | Self::Index => ClassTraits {
                shardable: true,
                singleton: false,
                immutable: true,
            },
            Self::Keys | Self::Snapshots => ClassTraits {
                shardable: false,
                singleton: false,
                immutable: true,
            },
            Self::Locks => ClassTraits {
                shardable: false,
                singleton: false,
                immutable: false,
            },
        }
    }

    pub const fn is_shardable(self) -> bool {
        self.traits().shardable
    }

    pub const fn is_singleton(self) -> bool {
        self.traits().singleton
    }

    pub const fn is_immutable(self) -> bool {
        self.traits().immutable
    }

    /// Identifiers longer than this many characters get a shard directory.
    ///
    /// `None` for classes that are never sharded.
    pub const fn shard_threshold(self) -> Option<usize> {
        if self.is_shardable() {
            Some(SHARD_PREFIX_LEN - 1)
        } else {
            None
        }
    }

    /// Whether names in this class are content hashes and must be hex.
    pub const fn is_content_addressed(self) -> bool {
        matches!(self, Self::Data | Self::Index)
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectClass {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s).ok_or_else(|| TypeError::UnknownClass(s.to_string()))
    }
}
