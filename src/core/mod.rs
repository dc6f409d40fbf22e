pub mod config;
pub mod mcp_sampling;
pub mod message;
pub mod provider;
pub mod tools;
