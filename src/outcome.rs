//! Outcome classification and the weight table used for budget accounting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ThrottlerError;

/// How a request attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// 2xx
    Success,
    /// 4xx
    ClientError,
    /// 5xx
    ServerError,
    /// The handler panicked, errored, was cancelled, or produced a status
    /// outside the 2xx/4xx/5xx classes.
    UnhandledFailure,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [
        Outcome::Success,
        Outcome::ClientError,
        Outcome::ServerError,
        Outcome::UnhandledFailure,
    ];

    /// Weighted points charged against every tier budget.
    pub fn weight(self) -> u64 {
        match self {
            Outcome::Success => 1,
            Outcome::ClientError => 3,
            Outcome::ServerError => 2,
            Outcome::UnhandledFailure => 5,
        }
    }

    /// Classify an HTTP status code. Anything that is not 2xx, 4xx or 5xx is
    /// unclassified and scored as an unhandled failure.
    pub fn from_status(status: u16) -> Self {
        match status / 100 {
            2 => Outcome::Success,
            4 => Outcome::ClientError,
            5 => Outcome::ServerError,
            _ => Outcome::UnhandledFailure,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::ClientError => "client_error",
            Outcome::ServerError => "server_error",
            Outcome::UnhandledFailure => "unhandled_failure",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = ThrottlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Outcome::ALL
            .into_iter()
            .find(|outcome| outcome.as_str() == s)
            .ok_or_else(|| ThrottlerError::Validation(format!("Unknown outcome '{}'", s)))
    }
}

/// Anything that can be turned into an [`Outcome`] once a handler finishes.
pub trait Classify {
    fn outcome(&self) -> Outcome;
}

impl Classify for Outcome {
    fn outcome(&self) -> Outcome {
        *self
    }
}

impl Classify for axum::http::StatusCode {
    fn outcome(&self) -> Outcome {
        Outcome::from_status(self.as_u16())
    }
}

impl Classify for axum::response::Response {
    fn outcome(&self) -> Outcome {
        self.status().outcome()
    }
}

impl<T: Classify, E> Classify for Result<T, E> {
    fn outcome(&self) -> Outcome {
        match self {
            Ok(value) => value.outcome(),
            Err(_) => Outcome::UnhandledFailure,
        }
    }
}
