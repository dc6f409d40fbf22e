pub mod data;
pub mod io;

pub use data::{McpConfig, SamplingConfig, ServerConfig};
pub use io::ConfigError;
