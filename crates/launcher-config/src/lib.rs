//! Configuration for the attested MySQL launcher.
//!
//! The launcher reads its settings from two sources: the manifest
//! environment, which is covered by the enclave signature, and the command
//! line, which is not. [`LauncherConfig::resolve`] merges them with the
//! environment always winning, separates launcher flags from arguments meant
//! for the target, and records every override or dropped argument as a
//! [`ConfigWarning`]. [`LauncherConfig::validate`] then checks the
//! cross-field invariants before any filesystem or network work begins.

mod cli;
mod config;
mod defaults;
pub mod env;
mod error;
mod logging;
mod paths;
mod replication;

pub use cli::{
    ArgumentSplit, DroppedArgument, LauncherArgs, remove_managed_server_options,
    split_launcher_arguments,
};
pub use config::{AttestationSettings, LauncherConfig, StorageLayout};
pub use defaults::{
    CLIENT_KEY_RELATIVE, DATA_DIR_RELATIVE, DEFAULT_CERT_ALGORITHM, DEFAULT_CLIENT_CERT_PATH,
    DEFAULT_LOG_DIR, DEFAULT_LOG_FILTER, DEFAULT_PUBLIC_DIR, DEFAULT_REPLICATION_PORT,
    DEFAULT_SECURE_ROOT, DEFAULT_SERVER_CERT_PATH, DEFAULT_SERVICE_PORT, DEFAULT_TEMPLATE_DIR,
    GR_CONFIG_RELATIVE, SERVER_KEY_RELATIVE, default_cert_path, default_data_dir,
    default_gr_config_dir, default_key_path, default_log_filter, default_log_format,
};
pub use env::EnvSnapshot;
pub use error::{ConfigError, ConfigWarning};
pub use logging::{LogFormat, LogFormatParseError, TargetKind};
pub use paths::{ensure_absolute, ensure_within};
pub use replication::{
    GROUP_NAME_FILE, PeerAddress, ReplicationMode, ReplicationSettings, SERVER_ID_FILE,
    parse_local_address, parse_seed_list,
};
