//! Error surface of the launch pipeline.
//!
//! Every stage reports its failures as a [`StageError`]: either a
//! degradation, which is logged and replaced by the stage's fallback value,
//! or a fatal [`LaunchError`] that stops the launcher before the exec.

use std::io;

use camino::Utf8PathBuf;
use launcher_config::ConfigError;
use ratls_whitelist::WhitelistError;
use strum::Display;
use thiserror::Error;

use crate::identity::IdentityError;
use crate::ports::PortError;
use crate::prepare::PrepareError;
use crate::replication::ReplicationError;
use crate::reporter::StageReporter;
use crate::telemetry::TelemetryError;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Configuration resolution and validation.
    Configuration,
    /// Service and replication port allocation.
    Ports,
    /// Directory creation and data directory initialisation.
    Filesystem,
    /// Local and remote whitelist merge.
    Whitelist,
    /// Replication identity and generated server files.
    Replication,
    /// Command assembly and process replacement.
    Handoff,
}

/// Errors that stop the launcher.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The configuration could not be resolved or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// No usable port was found.
    #[error(transparent)]
    Port(#[from] PortError),
    /// A directory the boot path needs could not be prepared.
    #[error(transparent)]
    Prepare(#[from] PrepareError),
    /// The manifest whitelist is malformed.
    #[error("RATLS_WHITELIST_CONFIG is malformed: {source}")]
    LocalWhitelist {
        /// Underlying decoding error.
        #[source]
        source: WhitelistError,
    },
    /// Replication identity or configuration could not be produced.
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    /// The attestation library is required but was not found.
    #[error("attestation library not found (searched {searched})")]
    MissingPreload {
        /// Locations that were checked.
        searched: String,
    },
    /// No target binary was found.
    #[error("no target binary found (searched {searched})")]
    MissingTarget {
        /// Locations that were checked.
        searched: String,
    },
    /// Printing the dry-run plan failed.
    #[error("failed to write the launch plan: {source}")]
    Output {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Replacing the process image failed.
    #[error("failed to execute '{program}': {source}")]
    Exec {
        /// Program that could not be executed.
        program: Utf8PathBuf,
        /// Reason reported by the operating system.
        #[source]
        source: io::Error,
    },
}

impl From<IdentityError> for LaunchError {
    fn from(error: IdentityError) -> Self {
        Self::Replication(ReplicationError::Identity(error))
    }
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

/// Outcome tag used at stage boundaries.
#[derive(Debug, Error)]
pub enum StageError {
    /// The step failed but the launch can continue with a fallback.
    #[error("{stage} degraded: {reason}")]
    Degraded {
        /// Stage that degraded.
        stage: Stage,
        /// Human-readable cause.
        reason: String,
    },
    /// The step failed and the launch must stop.
    #[error(transparent)]
    Fatal(#[from] LaunchError),
}

impl StageError {
    /// Builds a degradation with a human-readable cause.
    #[must_use]
    pub fn degraded(stage: Stage, reason: impl Into<String>) -> Self {
        Self::Degraded {
            stage,
            reason: reason.into(),
        }
    }

    /// Builds a fatal error from anything convertible into [`LaunchError`].
    #[must_use]
    pub fn fatal(error: impl Into<LaunchError>) -> Self {
        Self::Fatal(error.into())
    }
}

/// Settles a step outcome: degradations are reported and replaced by
/// `fallback`, fatal errors are passed on.
pub fn settle<T>(
    outcome: Result<T, StageError>,
    fallback: impl FnOnce() -> T,
    reporter: &dyn StageReporter,
) -> Result<T, LaunchError> {
    match outcome {
        Ok(value) => Ok(value),
        Err(StageError::Degraded { stage, reason }) => {
            reporter.stage_degraded(stage, &reason);
            Ok(fallback())
        }
        Err(StageError::Fatal(error)) => Err(error),
    }
}
