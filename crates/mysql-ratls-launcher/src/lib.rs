//! Attested launcher for the MySQL server and its RA-TLS client.
//!
//! The launcher runs inside the enclave as the entrypoint. It resolves its
//! configuration from the signed manifest environment and the command line,
//! prepares the encrypted storage, merges the attestation whitelist, writes
//! the group replication files, and finally replaces itself with the target
//! through `execve`. Each step is a [`Stage`]; failures inside a stage are
//! either degradations, which are logged and replaced by a fallback, or fatal
//! [`LaunchError`]s that stop the launch before the exec.
//!
//! [`run`] is the binary's entrypoint. [`launch_with`] takes the side
//! effecting services as [`Collaborators`] so the whole pipeline can be
//! driven from tests.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use launcher_config::{EnvSnapshot, LauncherConfig};

mod errors;
mod files;
mod identity;
mod launch;
mod pipeline;
mod ports;
mod prepare;
mod replication;
mod reporter;
mod telemetry;
mod whitelist;

pub use errors::{LaunchError, Stage, StageError, settle};
pub use identity::{IdentityError, IdentityStore, StoredValue};
pub use launch::{
    CLIENT_SCRIPT, ExecReplacer, HandoffInputs, LaunchCommand, NODE_CANDIDATES,
    PRELOAD_CANDIDATES, ProcessReplacer, SERVER_BINARY, build_command, build_command_with,
    find_preload, hand_off,
};
pub use pipeline::{AllocatedPorts, Collaborators, allocate_ports, execute};
pub use ports::{PortError, PortProbe, PortRequest, SocketPortProbe, allocate};
pub use prepare::{
    DataDirectoryState, DirectoryRole, INITIALISED_MARKER, PrepareError, SCRUBBED_FILES,
    create_directory, initialise_data_dir, is_initialised, prepare_filesystem,
};
pub use replication::{
    DeferredEvent, GR_CONFIG_FILE, INIT_SQL_FILE, PUBLIC_GROUP_NAME_FILE, ReplicationError,
    ReplicationPlan, ServerFiles, Tuning, deferred_events, derive_server_id, plan_replication,
    prepare_server_files, render_init_sql, render_option_file,
};
pub use reporter::{RecordingStageReporter, StageEvent, StageReporter, StructuredStageReporter};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use whitelist::{JsonRpcReaderFactory, ReaderFactory, resolve_whitelist};

/// Runs the launcher with production services.
///
/// Returns only in dry-run mode or when the launch fails.
#[must_use]
pub fn run<I, W, E>(args: I, env: &EnvSnapshot, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with(args, env, &Collaborators::system(), stdout, stderr)
}

/// [`run`] with caller-supplied services.
#[must_use]
pub fn run_with<I, W, E>(
    args: I,
    env: &EnvSnapshot,
    collaborators: &Collaborators,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let args: Vec<OsString> = args.into_iter().collect();
    match launch_with(&args, env, collaborators, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            drop(writeln!(stderr, "mysql-ratls-launcher: {error}"));
            ExitCode::FAILURE
        }
    }
}

/// Resolves and validates the configuration, initialises telemetry, then
/// runs every stage.
pub fn launch_with(
    args: &[OsString],
    env: &EnvSnapshot,
    collaborators: &Collaborators,
    stdout: &mut dyn Write,
) -> Result<(), LaunchError> {
    let config = LauncherConfig::resolve(args, env)?;
    telemetry::initialise(&config)?;

    let reporter = collaborators.reporter.as_ref();
    for warning in config.warnings() {
        reporter.config_warning(warning);
    }
    pipeline::run_stage(Stage::Configuration, reporter, || {
        config.validate().map_err(LaunchError::from)
    })?;
    pipeline::execute(&config, collaborators, stdout)
}
