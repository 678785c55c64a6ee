//! Contracts for the two collaborators of the research engine.
//!
//! The engine needs exactly two capabilities from the outside world: a
//! text-generation call that can be constrained to a JSON schema, and a
//! grounded web search call that returns snippets with their supporting
//! sources. This crate establishes the protocol for both, so that the
//! engine can switch between model vendors and search backends without
//! touching the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;
mod search;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
pub use search::*;
