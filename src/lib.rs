//! Read-only access to the Bloomeo agricultural trial platform, exposed as
//! MCP tools and as a command-line client.

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod entities;
pub mod error;
pub mod mcp;
pub mod sources;
pub mod transform;

pub use app::App;
pub use config::BloomeoConfig;
pub use error::{BloomeoError, ErrorKind};
