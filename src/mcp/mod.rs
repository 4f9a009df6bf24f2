// Tool host: JSON-RPC over stdio exposing the store and index operations

pub mod server;
pub mod tools;

pub use server::McpServer;
