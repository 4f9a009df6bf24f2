//! Scoped knowledge store for AI coding sessions, cross-referenced with a
//! local symbol index of the workspace.

pub mod app;
pub mod config;
pub mod enrich;
pub mod error;
pub mod index;
pub mod indexer;
pub mod knowledge;
pub mod mcp;
pub mod storage;

pub use app::Codelore;
pub use error::{Error, Result};
