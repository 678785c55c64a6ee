//! A ready-to-use research engine that wires an OpenAI-compatible model and
//! Exa web search together.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to answer questions with cited sources inside your own
//! host apps.

#![deny(missing_docs)]

mod session;

pub use session::{Session, SessionBuilder};

/// Re-exports of [`pro_search_core`] crate.
pub mod core {
    pub use pro_search_core::*;
}
