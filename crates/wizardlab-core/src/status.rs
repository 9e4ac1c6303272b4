//! Lifecycle of a `social_engage` row.
//!
//! ```text
//! pending -> {ready, ignored, duplicate_semantic, error} -> posted
//! ```
//!
//! `error -> pending` exists so a failed row can be requeued. `posted` is terminal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialStatus {
    Pending,
    Ready,
    Ignored,
    DuplicateSemantic,
    Error,
    Posted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal status transition {from} -> {to}")]
    Illegal { from: SocialStatus, to: SocialStatus },
    #[error("unknown status {0:?}")]
    Unknown(String),
}

const SEQUENCE: [SocialStatus; 6] = [
    SocialStatus::Pending,
    SocialStatus::Ready,
    SocialStatus::Ignored,
    SocialStatus::Error,
    SocialStatus::DuplicateSemantic,
    SocialStatus::Posted,
];

impl SocialStatus {
    /// Parses a stored status, accepting the legacy `duplicate` and `unresolvable` values.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "ignored" => Some(Self::Ignored),
            "duplicate_semantic" | "duplicate" => Some(Self::DuplicateSemantic),
            "error" | "unresolvable" => Some(Self::Error),
            "posted" => Some(Self::Posted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Ignored => "ignored",
            Self::DuplicateSemantic => "duplicate_semantic",
            Self::Error => "error",
            Self::Posted => "posted",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Ready => "Ready",
            Self::Ignored => "Ignored",
            Self::DuplicateSemantic => "Duplicates",
            Self::Error => "Error",
            Self::Posted => "Posted",
        }
    }

    /// Display order used by status filters and metrics tables.
    pub fn sequence() -> &'static [SocialStatus] {
        &SEQUENCE
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Posted)
    }

    pub fn can_transition_to(self, next: SocialStatus) -> bool {
        use SocialStatus::*;
        matches!(
            (self, next),
            (Pending, Ready | Ignored | DuplicateSemantic | Error)
                | (Ready | Ignored | DuplicateSemantic | Error, Posted)
                | (Error, Pending)
        )
    }

    pub fn transition(self, next: SocialStatus) -> Result<SocialStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::Illegal { from: self, to: next })
        }
    }

    /// Moderator override from the dashboard. Anything but leaving or entering
    /// `posted` is allowed; posting goes through mark-posted only.
    pub fn manual_override(self, next: SocialStatus) -> Result<SocialStatus, TransitionError> {
        if self.is_terminal() || next == SocialStatus::Posted {
            return Err(TransitionError::Illegal { from: self, to: next });
        }
        Ok(next)
    }
}

impl fmt::Display for SocialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| TransitionError::Unknown(s.to_string()))
    }
}
