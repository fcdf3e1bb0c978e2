use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::InvalidVoteError;

const INVALID_CHOICE: &str = "invalid value for choice: (must be \"a\" or \"b\")";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    #[serde(alias = "A")]
    A,
    #[serde(alias = "B")]
    B,
}

impl Display for Choice {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Choice::A => write!(f, "a"),
            Choice::B => write!(f, "b"),
        }
    }
}

impl FromStr for Choice {
    type Err = InvalidVoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a" | "A" => Ok(Choice::A),
            "b" | "B" => Ok(Choice::B),
            _ => Err(InvalidVoteError::new(vec![INVALID_CHOICE.to_string()])),
        }
    }
}

/// A persisted vote. One record per `voter_id`; the latest choice wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Vote {
    pub voter_id: String,
    pub choice: Choice,
    pub updated_at: DateTime<Utc>,
}

/// The payload a producer pushes onto the queue.
///
/// Fields are deliberately loose so that validation can report every problem with a
/// payload in one error instead of failing at the first type mismatch. `vote` and
/// `voterId` are accepted as aliases for older producers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VoteSubmission {
    #[serde(default, alias = "vote", skip_serializing_if = "Option::is_none")]
    pub choice: Option<serde_json::Value>,
    #[serde(default, alias = "voterId", skip_serializing_if = "Option::is_none")]
    pub voter_id: Option<String>,
}

/// A submission that passed validation. `voter_id` is still optional: the store
/// assigns one when it is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedVote {
    pub voter_id: Option<String>,
    pub choice: Choice,
}

impl VoteSubmission {
    pub fn new(choice: Choice) -> Self {
        Self {
            choice: Some(serde_json::Value::String(choice.to_string())),
            voter_id: None,
        }
    }

    pub fn with_voter_id(mut self, voter_id: impl Into<String>) -> Self {
        self.voter_id = Some(voter_id.into());
        self
    }

    /// Validate a (possibly missing) submission, collecting every problem found.
    pub fn validate(submission: Option<&Self>) -> Result<ValidatedVote, InvalidVoteError> {
        let mut errors = Vec::new();
        let mut choice = None;

        match submission {
            None => errors.push("missing vote".to_string()),
            Some(s) => match s.choice.as_ref() {
                None | Some(serde_json::Value::Null) => {
                    errors.push("missing choice property".to_string())
                }
                Some(serde_json::Value::String(raw)) if raw.is_empty() => {
                    errors.push("missing choice property".to_string())
                }
                Some(serde_json::Value::String(raw)) => match raw.parse::<Choice>() {
                    Ok(c) => choice = Some(c),
                    Err(e) => errors.extend(e.problems().iter().cloned()),
                },
                Some(_) => errors.push(INVALID_CHOICE.to_string()),
            },
        }

        match choice {
            Some(choice) if errors.is_empty() => Ok(ValidatedVote {
                voter_id: submission
                    .and_then(|s| s.voter_id.clone())
                    .filter(|id| !id.trim().is_empty()),
                choice,
            }),
            _ => Err(InvalidVoteError::new(errors)),
        }
    }
}
