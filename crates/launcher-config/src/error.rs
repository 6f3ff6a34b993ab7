//! Configuration errors and the non-fatal warnings collected during
//! resolution.

use std::fmt;
use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::cli::DroppedArgument;

/// Fatal configuration problems. The launcher exits before touching the
/// filesystem or network when one of these is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The launcher flags could not be parsed.
    #[error("invalid launcher arguments: {source}")]
    Arguments {
        /// Underlying parser error.
        #[source]
        source: clap::Error,
    },
    /// A boolean setting used an unrecognised spelling.
    #[error("{name} must be one of 1/0, true/false, yes/no, on/off (got '{value}')")]
    InvalidFlag {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
    /// A port setting was not a number in `1..=65535`.
    #[error("{name} must be a port number between 1 and 65535 (got '{value}')")]
    InvalidPort {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
    /// A network address could not be parsed.
    #[error("{name} holds an invalid address '{value}'")]
    InvalidAddress {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
    /// The replication group name is not a UUID.
    #[error("replication group name '{value}' is not a UUID")]
    InvalidGroupName {
        /// Rejected value.
        value: String,
    },
    /// Unknown log format.
    #[error("unsupported log format '{value}' (expected 'json' or 'compact')")]
    InvalidLogFormat {
        /// Rejected value.
        value: String,
    },
    /// Unknown launch target.
    #[error("unsupported launch target '{value}' (expected 'server' or 'client')")]
    InvalidTarget {
        /// Rejected value.
        value: String,
    },
    /// Join mode was selected without any seed to contact.
    #[error("joining a replication group requires at least one seed (set MYSQL_GR_SEEDS)")]
    JoinWithoutSeeds,
    /// A path that must be absolute was relative.
    #[error("{name} must be an absolute path (got '{path}')")]
    RelativePath {
        /// Setting name.
        name: &'static str,
        /// Rejected path.
        path: Utf8PathBuf,
    },
    /// A path contained a `..` component.
    #[error("{name} must not contain '..' components (got '{path}')")]
    ParentTraversal {
        /// Setting name.
        name: &'static str,
        /// Rejected path.
        path: Utf8PathBuf,
    },
    /// A secret path lies outside the encrypted mount.
    #[error("{name} '{path}' is outside the secure root '{root}'")]
    OutsideSecureRoot {
        /// Setting name.
        name: &'static str,
        /// Rejected path.
        path: Utf8PathBuf,
        /// Configured secure root.
        root: Utf8PathBuf,
    },
    /// The service and replication ports are the same.
    #[error("service port and replication port must differ (both are {port})")]
    PortConflict {
        /// Shared port number.
        port: u16,
    },
    /// The persisted group name could not be read.
    #[error("failed to read persisted group name '{path}': {source}")]
    PersistedGroupName {
        /// Persisted identity file.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The configured group name differs from the one this node already
    /// belongs to.
    #[error(
        "configured group name {configured} differs from persisted group name {persisted}; \
         delete '{path}' to move this node to another group"
    )]
    GroupNameMismatch {
        /// Explicitly configured group name.
        configured: String,
        /// Group name persisted on a previous boot.
        persisted: String,
        /// File holding the persisted name.
        path: Utf8PathBuf,
    },
}

/// Problems that do not stop the launch but must be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A command-line argument was removed before reaching the target.
    Dropped(DroppedArgument),
    /// Both the environment and an argument set a field; the environment won.
    EnvironmentWins {
        /// Command-line flag that lost.
        flag: &'static str,
        /// Environment variable that won.
        variable: &'static str,
    },
    /// Only half of the remote whitelist source was configured.
    IncompleteRemoteSource {
        /// Setting that is missing.
        missing: &'static str,
    },
    /// Replication options were given but replication is disabled.
    UnusedReplicationOptions,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dropped(DroppedArgument::EnvironmentOnly { flag, variable }) => write!(
                f,
                "ignoring argument {flag}: this setting is only accepted from {variable}"
            ),
            Self::Dropped(DroppedArgument::ManagedByLauncher { flag }) => write!(
                f,
                "ignoring argument {flag}: the launcher manages this server option"
            ),
            Self::EnvironmentWins { flag, variable } => {
                write!(f, "{variable} overrides argument {flag}")
            }
            Self::IncompleteRemoteSource { missing } => write!(
                f,
                "{missing} is not set; continuing with the local whitelist only"
            ),
            Self::UnusedReplicationOptions => f.write_str(
                "replication options were given without a group name or bootstrap; they are unused",
            ),
        }
    }
}
