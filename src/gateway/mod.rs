//! SSH execution gateway.
//!
//! This module is organized into the following submodules:
//!
//! - `config`: Startup configuration with environment variable support
//! - `error`: Error taxonomy and SSH failure classification
//! - `types`: Records, summaries and results shared across layers
//! - `vault`: Credential sealing with an AEAD master key
//! - `validator`: Command policy (metacharacters and denylist rules)
//! - `auth`: SSH authentication strategies for decrypted credentials
//! - `session`: One-shot SSH session lifecycle and host key verification
//! - `storage`: Record store and execution log backends
//! - `registry`: Ownership-checked CRUD over server records
//! - `inflight`: Index of running executions for cancellation
//! - `orchestrator`: The `Gateway` façade tying everything together
//! - `tools`: MCP tool implementations

pub(crate) mod auth;
pub mod config;
pub mod error;
pub(crate) mod inflight;
pub mod orchestrator;
pub mod registry;
pub(crate) mod schema;
pub mod session;
pub mod storage;
pub mod tools;
pub mod types;
pub mod validator;
pub mod vault;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use orchestrator::{Gateway, GatewayComponents};
pub use tools::GatewayTools;
