//! Configuration resolution for the SSH gateway.
//!
//! Every knob is resolved with a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! The master key has no default: the gateway refuses to start without one.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_MASTER_KEY` | required | Base64 32-byte credential encryption key |
//! | `GATEWAY_MASTER_KEY_VERSION` | 1 | Key version tag written into ciphertexts |
//! | `GATEWAY_DATA_DIR` | `data` | Directory for records, known hosts and audit log |
//! | `SSH_CONNECT_TIMEOUT` | 30s | Connect and authentication timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 30s | Default command timeout in seconds |
//! | `SSH_MAX_COMMAND_TIMEOUT` | 3600s | Upper bound for requested command timeouts |
//! | `GATEWAY_OUTPUT_CAP_BYTES` | 1 MiB | Per-stream output capture cap |
//! | `SSH_HOST_KEY_MODE` | `tofu` | `tofu`, `strict` or `accept_any` |
//! | `SSH_KNOWN_HOSTS_PATH` | `<data>/known_hosts.json` | Known host key fingerprints |
//! | `GATEWAY_DENYLIST_PATH` | built-in | JSON denylist rule file |
//! | `GATEWAY_SHELL_POLICY` | `reject_metachars` | `reject_metachars` or `allow_shell` |
//! | `GATEWAY_SERIALIZE_PER_SERVER` | false | One execution per server at a time |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::gateway::session::known_hosts::HostKeyPolicy;
use crate::gateway::validator::ShellPolicy;
use crate::gateway::vault::{MasterKey, VaultError};

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default command execution timeout in seconds
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Default upper bound for command timeouts in seconds
pub(crate) const DEFAULT_MAX_COMMAND_TIMEOUT_SECS: u64 = 3600;

/// Default per-stream capture cap (1 MiB)
pub(crate) const DEFAULT_OUTPUT_CAP_BYTES: usize = 1024 * 1024;

/// Default master key version tag
pub(crate) const DEFAULT_MASTER_KEY_VERSION: u8 = 1;

/// Default data directory
pub(crate) const DEFAULT_DATA_DIR: &str = "data";

pub(crate) const MASTER_KEY_ENV_VAR: &str = "GATEWAY_MASTER_KEY";
pub(crate) const MASTER_KEY_VERSION_ENV_VAR: &str = "GATEWAY_MASTER_KEY_VERSION";
pub(crate) const DATA_DIR_ENV_VAR: &str = "GATEWAY_DATA_DIR";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";
pub(crate) const MAX_COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_MAX_COMMAND_TIMEOUT";
pub(crate) const OUTPUT_CAP_ENV_VAR: &str = "GATEWAY_OUTPUT_CAP_BYTES";
pub(crate) const HOST_KEY_MODE_ENV_VAR: &str = "SSH_HOST_KEY_MODE";
pub(crate) const KNOWN_HOSTS_PATH_ENV_VAR: &str = "SSH_KNOWN_HOSTS_PATH";
pub(crate) const DENYLIST_PATH_ENV_VAR: &str = "GATEWAY_DENYLIST_PATH";
pub(crate) const SHELL_POLICY_ENV_VAR: &str = "GATEWAY_SHELL_POLICY";
pub(crate) const SERIALIZE_PER_SERVER_ENV_VAR: &str = "GATEWAY_SERIALIZE_PER_SERVER";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("failed to load denylist rules from {path}: {reason}")]
    Denylist { path: String, reason: String },
}

impl From<VaultError> for ConfigError {
    fn from(err: VaultError) -> Self {
        ConfigError::Invalid {
            name: MASTER_KEY_ENV_VAR,
            reason: err.to_string(),
        }
    }
}

/// Gateway settings, built once at startup and passed into constructors.
#[derive(Debug)]
pub struct GatewayConfig {
    pub master_key: MasterKey,
    pub data_dir: PathBuf,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub max_command_timeout: Duration,
    pub output_cap_bytes: usize,
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts_path: PathBuf,
    pub denylist_path: Option<PathBuf>,
    pub shell_policy: ShellPolicy,
    pub serialize_per_server: bool,
    pub compression: bool,
}

impl GatewayConfig {
    /// Configuration with built-in defaults and the given key. Ignores the environment.
    pub fn with_master_key(master_key: MasterKey) -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            master_key,
            known_hosts_path: data_dir.join("known_hosts.json"),
            data_dir,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            max_command_timeout: Duration::from_secs(DEFAULT_MAX_COMMAND_TIMEOUT_SECS),
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
            host_key_policy: HostKeyPolicy::default(),
            denylist_path: None,
            shell_policy: ShellPolicy::default(),
            serialize_per_server: false,
            compression: true,
        }
    }

    /// Resolve every setting from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let key_version = resolve_master_key_version(None)?;
        let encoded =
            env::var(MASTER_KEY_ENV_VAR).map_err(|_| ConfigError::Missing(MASTER_KEY_ENV_VAR))?;
        let master_key = MasterKey::from_base64(&encoded, key_version)?;

        let data_dir = resolve_data_dir(None);
        let known_hosts_path = env::var(KNOWN_HOSTS_PATH_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("known_hosts.json"));

        let command_timeout = resolve_command_timeout(None);
        let max_command_timeout = resolve_max_command_timeout(None);
        if command_timeout > max_command_timeout {
            return Err(ConfigError::Invalid {
                name: COMMAND_TIMEOUT_ENV_VAR,
                reason: format!(
                    "default timeout {}s exceeds maximum {}s",
                    command_timeout.as_secs(),
                    max_command_timeout.as_secs()
                ),
            });
        }

        Ok(Self {
            master_key,
            data_dir,
            connect_timeout: resolve_connect_timeout(None),
            command_timeout,
            max_command_timeout,
            output_cap_bytes: resolve_output_cap(None),
            host_key_policy: resolve_host_key_policy(None)?,
            known_hosts_path,
            denylist_path: env::var(DENYLIST_PATH_ENV_VAR).ok().map(PathBuf::from),
            shell_policy: resolve_shell_policy(None)?,
            serialize_per_server: resolve_flag(None, SERIALIZE_PER_SERVER_ENV_VAR, false),
            compression: resolve_flag(None, COMPRESSION_ENV_VAR, true),
        })
    }

    /// Clamp a requested command timeout, falling back to the default.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|t| !t.is_zero())
            .unwrap_or(self.command_timeout)
            .min(self.max_command_timeout)
    }
}

/// Read and parse an environment variable, ignoring values that fail to parse.
fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Resolve the connection timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| env_parsed(CONNECT_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the default command timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_command_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| env_parsed(COMMAND_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the command timeout ceiling with priority: parameter -> env var -> default
pub(crate) fn resolve_max_command_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| env_parsed(MAX_COMMAND_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_MAX_COMMAND_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the output capture cap. Zero is treated as unset.
pub(crate) fn resolve_output_cap(cap_param: Option<usize>) -> usize {
    cap_param
        .or_else(|| env_parsed(OUTPUT_CAP_ENV_VAR))
        .filter(|cap| *cap > 0)
        .unwrap_or(DEFAULT_OUTPUT_CAP_BYTES)
}

pub(crate) fn resolve_master_key_version(version_param: Option<u8>) -> Result<u8, ConfigError> {
    if let Some(version) = version_param {
        return Ok(version);
    }
    match env::var(MASTER_KEY_VERSION_ENV_VAR) {
        Ok(raw) => raw
            .trim()
            .parse::<u8>()
            .map_err(|e| ConfigError::Invalid {
                name: MASTER_KEY_VERSION_ENV_VAR,
                reason: e.to_string(),
            }),
        Err(_) => Ok(DEFAULT_MASTER_KEY_VERSION),
    }
}

pub(crate) fn resolve_data_dir(dir_param: Option<PathBuf>) -> PathBuf {
    dir_param
        .or_else(|| env::var(DATA_DIR_ENV_VAR).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Unknown modes are a startup error rather than a silent fallback.
pub(crate) fn resolve_host_key_policy(
    policy_param: Option<HostKeyPolicy>,
) -> Result<HostKeyPolicy, ConfigError> {
    if let Some(policy) = policy_param {
        return Ok(policy);
    }
    match env::var(HOST_KEY_MODE_ENV_VAR) {
        Ok(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
            name: HOST_KEY_MODE_ENV_VAR,
            reason,
        }),
        Err(_) => Ok(HostKeyPolicy::default()),
    }
}

pub(crate) fn resolve_shell_policy(
    policy_param: Option<ShellPolicy>,
) -> Result<ShellPolicy, ConfigError> {
    if let Some(policy) = policy_param {
        return Ok(policy);
    }
    match env::var(SHELL_POLICY_ENV_VAR) {
        Ok(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
            name: SHELL_POLICY_ENV_VAR,
            reason,
        }),
        Err(_) => Ok(ShellPolicy::default()),
    }
}

/// Resolve a boolean flag: "true"/"1" (any case) are true, anything else false.
pub(crate) fn resolve_flag(flag_param: Option<bool>, env_var: &str, default: bool) -> bool {
    if let Some(flag) = flag_param {
        return flag;
    }
    if let Ok(raw) = env::var(env_var) {
        return raw.eq_ignore_ascii_case("true") || raw == "1";
    }
    default
}
