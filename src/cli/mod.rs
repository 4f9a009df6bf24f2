// CLI command implementations

pub mod index;
pub mod languages;
pub mod memory;
pub mod search;
pub mod serve;
pub mod stats;
