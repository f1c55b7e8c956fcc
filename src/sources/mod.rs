pub mod ado;
pub mod kusto;

use std::fmt;

use serde::Serialize;

/// Which upstream feed produced a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Source {
    #[serde(rename = "ADO")]
    Ado,
    #[serde(rename = "IcM")]
    IcM,
    #[serde(rename = "S360")]
    S360,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Ado, Source::IcM, Source::S360];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Ado => "ADO",
            Source::IcM => "IcM",
            Source::S360 => "S360",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A work item normalized from any feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub state: String,
    pub source: Source,
}

/// Why a feed came back without records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FeedFailure {
    #[error("integration not configured")]
    Unconfigured,

    #[error("credential unavailable")]
    Unauthenticated,

    #[error("retries exhausted")]
    RetriesExhausted,

    #[error("query template could not be rendered")]
    InvalidQuery,
}

pub type FeedResult<T> = std::result::Result<Vec<T>, FeedFailure>;
