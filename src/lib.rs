//! mcpmux is the tool-server runtime of a terminal LLM client.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] owns Model Context Protocol integration: per-server clients and
//!   their stdio/HTTP transports, the [`mcp::manager::McpManager`] lifecycle
//!   state machine, status events, the tool router and the on-disk tool cache.
//! - [`core`] holds the pieces the MCP layer calls into: configuration
//!   loading, the provider-agnostic message model, the LLM provider boundary,
//!   the sampling policy engine and the generic agent tool registry.
//! - [`api`] defines the OpenAI-compatible chat payloads used by the bundled
//!   provider.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`], which loads
//! `mcp.json`, enables the configured servers and lists or invokes their tools.

pub mod api;
pub mod cli;
pub mod core;
pub mod mcp;
pub mod utils;
