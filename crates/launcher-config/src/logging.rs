//! Launcher log output formats and the launch target selector.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats for the launcher.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON for hosts that ship the enclave console to a log stack.
    Json,
    /// Human-readable single line output, the usual enclave console format.
    #[default]
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// What the launcher is about to hand off to.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TargetKind {
    /// The database server, with data directory and replication stages.
    #[default]
    Server,
    /// The attested database client script.
    Client,
}
