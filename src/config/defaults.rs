//! Default configuration constants used across the system.

/// Configuration file names searched in the working directory.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "secretless.yml",
    "secretless.yaml",
    "secretless.json",
    "secretless.toml",
];

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "SECRETLESS_CONFIG";

/// Maximum size for a config file (10 MB).
pub const MAX_CONFIG_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Conjur access tokens live for eight minutes; refresh well before that.
pub const CONJUR_TOKEN_REFRESH_SECS: u64 = 5 * 60;

/// Timeout for a single request to a remote secret backend.
pub const PROVIDER_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed `accept` before trying again.
pub const ACCEPT_ERROR_BACKOFF_MS: u64 = 100;

/// Largest ssh-agent frame accepted from a client (256 KiB).
pub const SSH_AGENT_MAX_FRAME: usize = 256 * 1024;

/// Largest PostgreSQL startup or authentication message accepted (1 MiB).
pub const PG_MAX_MESSAGE: usize = 1024 * 1024;

/// Largest request body the HTTP listener buffers before forwarding (16 MiB).
pub const HTTP_MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;
