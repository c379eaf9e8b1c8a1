//! Transaction isolation levels.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Requested isolation for a transaction.
///
/// The set is driver-neutral; [`postgres_clause`](Self::postgres_clause)
/// maps it onto what PostgreSQL supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    /// Whatever the server default is. No `SET TRANSACTION` is issued.
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    WriteCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
    Linearizable,
}

impl IsolationLevel {
    pub const ALL: [IsolationLevel; 8] = [
        IsolationLevel::Default,
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::WriteCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Snapshot,
        IsolationLevel::Serializable,
        IsolationLevel::Linearizable,
    ];

    /// The PostgreSQL isolation clause, or `None` for the server default.
    ///
    /// PostgreSQL's REPEATABLE READ is snapshot isolation and SERIALIZABLE
    /// is the strongest level it offers, so `Snapshot` and `Linearizable`
    /// map onto those. `WriteCommitted` has no equivalent.
    pub fn postgres_clause(self) -> DbResult<Option<&'static str>> {
        match self {
            IsolationLevel::Default => Ok(None),
            IsolationLevel::ReadUncommitted => Ok(Some("READ UNCOMMITTED")),
            IsolationLevel::ReadCommitted => Ok(Some("READ COMMITTED")),
            IsolationLevel::RepeatableRead | IsolationLevel::Snapshot => Ok(Some("REPEATABLE READ")),
            IsolationLevel::Serializable | IsolationLevel::Linearizable => Ok(Some("SERIALIZABLE")),
            IsolationLevel::WriteCommitted => Err(DbError::UnsupportedIsolation(self)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IsolationLevel::Default => "default",
            IsolationLevel::ReadUncommitted => "read-uncommitted",
            IsolationLevel::ReadCommitted => "read-committed",
            IsolationLevel::WriteCommitted => "write-committed",
            IsolationLevel::RepeatableRead => "repeatable-read",
            IsolationLevel::Snapshot => "snapshot",
            IsolationLevel::Serializable => "serializable",
            IsolationLevel::Linearizable => "linearizable",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        IsolationLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| format!("unknown isolation level: {s}"))
    }
}
