use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::UpkeepError;

/// The built-in maintenance jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// Package index refresh and upgrade through apt.
    Update,
    /// Journal vacuum, rotated log removal, container log truncation.
    Cleanup,
    /// Certificate expiry inspection and certbot renewal.
    Certs,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Update, JobKind::Cleanup, JobKind::Certs];

    /// Lock category used when the operator does not override it.
    pub fn default_category(self) -> JobCategory {
        let name = match self {
            JobKind::Update => "system-update",
            JobKind::Cleanup => "log-cleanup",
            JobKind::Certs => "cert-renewal",
        };
        JobCategory(name.to_string())
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Update => write!(f, "update"),
            JobKind::Cleanup => write!(f, "cleanup"),
            JobKind::Certs => write!(f, "certs"),
        }
    }
}

/// Key scoping a maintenance lock. Doubles as the lock file stem, so only
/// `[a-z0-9_-]` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobCategory(String);

impl JobCategory {
    pub fn new(name: impl Into<String>) -> Result<Self, UpkeepError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 64
            && name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
        if valid {
            Ok(Self(name))
        } else {
            Err(UpkeepError::InvalidCategory(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
