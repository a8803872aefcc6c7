//! Success classification for transfer status codes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Lowest status code accepted by the default policy.
pub const DEFAULT_MIN_SUCCESS_CODE: u16 = 100;

/// Highest status code accepted by the default policy.
pub const DEFAULT_MAX_SUCCESS_CODE: u16 = 299;

/// The set of HTTP status codes that count as a successful transfer.
///
/// The default accepts every code in `100..=299`. A transfer that produced no status code at all
/// (DNS failure, refused connection, timeout) is never successful, whatever the set contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuccessPolicy {
    codes: BTreeSet<u16>,
}

impl SuccessPolicy {
    /// Create a policy accepting exactly the given codes.
    pub fn new(codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    /// Whether `status` is an accepted code.
    pub fn accepts(&self, status: u16) -> bool {
        self.codes.contains(&status)
    }

    /// Whether a recorded status, if any, is an accepted code.
    pub fn accepts_status(&self, status: Option<u16>) -> bool {
        status.is_some_and(|status| self.accepts(status))
    }

    /// The accepted codes in ascending order.
    pub fn codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.codes.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl Default for SuccessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SUCCESS_CODE..=DEFAULT_MAX_SUCCESS_CODE)
    }
}

impl FromIterator<u16> for SuccessPolicy {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self::new(iter)
    }
}
