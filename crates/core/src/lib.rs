//! Iterative research engine: query planning, concurrent search waves,
//! gap-driven reflection and answers with resolved citations.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod citation;
mod config;
mod error;
mod executor;
mod generation;
mod model_client;
mod planner;
pub mod prompt;
mod reflection;
mod research;
mod search_client;
mod synthesizer;

pub use citation::{Citation, CitationRegistry};
pub use config::{ConfigError, ResearchConfig};
pub use error::{Error, ErrorKind, Result};
pub use executor::{ResultSource, SearchResult};
pub use planner::{SearchQuery, Wave};
pub use reflection::ReflectionOutcome;
pub use research::{
    ResearchEvent, ResearchResult, Researcher, ResearcherBuilder, Stage,
};
