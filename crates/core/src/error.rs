use std::time::Duration;

use pro_search_model::ErrorKind as ProviderErrorKind;
use serde::{Deserialize, Serialize};

/// The kind of error that ended a research run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The model returned malformed or insufficient structured output.
    GenerationContract,
    /// The model provider failed even after retries.
    Generation,
    /// A single search failed.
    Search,
    /// A collaborator call did not finish in time.
    Timeout,
    /// Every query of a wave failed.
    AllQueriesFailed,
    /// The loop budget was exceeded, an internal invariant violation.
    LoopBudgetExceededWithNoResult,
    /// The run was cancelled.
    Cancelled,
}

/// Errors produced by the research engine.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The model returned output that does not satisfy the contract.
    #[error("generation contract violated: {0}")]
    GenerationContract(String),
    /// The model provider returned an error.
    #[error("generation failed ({kind}): {message}")]
    Generation {
        /// Kind reported by the provider.
        kind: ProviderErrorKind,
        /// Provider error message.
        message: String,
    },
    /// The search provider returned an error.
    #[error("search failed ({kind}): {message}")]
    Search {
        /// Kind reported by the provider.
        kind: ProviderErrorKind,
        /// Provider error message.
        message: String,
    },
    /// A collaborator call exceeded its timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Every query of a wave failed.
    #[error("all {0} queries of the wave failed")]
    AllQueriesFailed(usize),
    /// The loop count went past its bound.
    #[error("loop budget of {0} exceeded without a result")]
    LoopBudgetExceededWithNoResult(u32),
    /// The run was cancelled.
    #[error("research run cancelled")]
    Cancelled,
}

impl Error {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::GenerationContract(_) => ErrorKind::GenerationContract,
            Error::Generation { .. } => ErrorKind::Generation,
            Error::Search { .. } => ErrorKind::Search,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::AllQueriesFailed(_) => ErrorKind::AllQueriesFailed,
            Error::LoopBudgetExceededWithNoResult(_) => {
                ErrorKind::LoopBudgetExceededWithNoResult
            }
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    #[inline]
    pub(crate) fn contract<S: Into<String>>(reason: S) -> Self {
        Error::GenerationContract(reason.into())
    }
}

/// Shorthand for results of the research engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;
