//! Command assembly and process replacement.
//!
//! The launcher never forks. It builds the target's argument vector and the
//! environment changes the target needs, then replaces its own image. The
//! dynamic loader preload naming the attestation library is part of those
//! changes only, so the launcher itself never runs with it.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use launcher_config::{LauncherConfig, TargetKind, env};
use tracing::{info, warn};

use crate::errors::{LaunchError, Stage, StageError, settle};
use crate::replication::ServerFiles;
use crate::reporter::StageReporter;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

const LAUNCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::launch");

/// Database server binary.
pub const SERVER_BINARY: &str = "/usr/sbin/mysqld";

/// Node.js locations tried for the client target, in order.
pub const NODE_CANDIDATES: [&str; 3] = [
    "/opt/node-install/bin/node",
    "/usr/local/bin/node",
    "/usr/bin/node",
];

/// Script run by the client target.
pub const CLIENT_SCRIPT: &str = "/app/mysql-client.js";

/// Attestation library locations tried after `RATLS_PRELOAD_PATH`.
pub const PRELOAD_CANDIDATES: [&str; 3] = [
    "/usr/local/lib/x86_64-linux-gnu/libratls-quote-verify.so",
    "/usr/local/lib/libratls-quote-verify.so",
    "/usr/lib/x86_64-linux-gnu/libratls-quote-verify.so",
];

/// Fully assembled target invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    program: Utf8PathBuf,
    args: Vec<OsString>,
    env: BTreeMap<String, String>,
    removed_env: Vec<String>,
}

impl LaunchCommand {
    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// Arguments after the program name.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Variables set for the target on top of the inherited environment.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Inherited variables removed for the target.
    #[must_use]
    pub fn removed_env(&self) -> &[String] {
        &self.removed_env
    }

    /// Builds the [`Command`] that runs the target.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(self.program.as_std_path());
        command.args(&self.args);
        for name in &self.removed_env {
            command.env_remove(name);
        }
        command.envs(&self.env);
        command
    }
}

fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in &self.removed_env {
            write!(f, "-u {} ", shell_quote(name))?;
        }
        for (name, value) in &self.env {
            write!(f, "{name}={} ", shell_quote(value))?;
        }
        f.write_str(&shell_quote(self.program.as_str()))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}

/// Replaces the current process image.
pub trait ProcessReplacer {
    /// Executes `command` in place of the current process. Only returns on
    /// failure.
    fn replace(&self, command: &LaunchCommand) -> Result<Infallible, io::Error>;
}

/// [`ProcessReplacer`] backed by `execve`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecReplacer;

impl ProcessReplacer for ExecReplacer {
    #[cfg(unix)]
    fn replace(&self, command: &LaunchCommand) -> Result<Infallible, io::Error> {
        Err(command.to_command().exec())
    }

    #[cfg(not(unix))]
    fn replace(&self, _command: &LaunchCommand) -> Result<Infallible, io::Error> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process replacement needs a Unix host",
        ))
    }
}

/// Finds the attestation library: the configured path first, then the
/// standard locations.
pub fn find_preload(
    configured: Option<&Utf8Path>,
    exists: impl Fn(&Utf8Path) -> bool,
) -> Option<Utf8PathBuf> {
    if let Some(path) = configured {
        if exists(path) {
            return Some(path.to_owned());
        }
        warn!(target: LAUNCH_TARGET, path = %path, "configured attestation library is missing");
    }
    PRELOAD_CANDIDATES
        .iter()
        .map(Utf8Path::new)
        .find(|candidate| exists(candidate))
        .map(Utf8Path::to_owned)
}

fn searched(configured: Option<&Utf8Path>, candidates: &[&str]) -> String {
    configured
        .map(Utf8Path::as_str)
        .into_iter()
        .chain(candidates.iter().copied())
        .collect::<Vec<_>>()
        .join(", ")
}

fn file_exists(path: &Utf8Path) -> bool {
    path.is_file()
}

const fn flag_value(enabled: bool) -> &'static str {
    if enabled { "1" } else { "0" }
}

/// Inputs gathered by the earlier stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffInputs {
    /// Allocated service port, for the server target.
    pub service_port: Option<u16>,
    /// Generated server files, for the server target.
    pub server_files: Option<ServerFiles>,
    /// Merged whitelist, Base64-encoded.
    pub whitelist: Option<String>,
}

fn target_environment(
    config: &LauncherConfig,
    inputs: &HandoffInputs,
    preload: Option<&Utf8Path>,
) -> (BTreeMap<String, String>, Vec<String>) {
    let attestation = config.attestation();
    let mut vars = BTreeMap::from([
        (env::RATLS_CERT_PATH.to_owned(), attestation.cert_path.to_string()),
        (env::RATLS_KEY_PATH.to_owned(), attestation.key_path.to_string()),
        (env::RA_TLS_CERT_ALGORITHM.to_owned(), attestation.cert_algorithm.clone()),
        (
            env::RATLS_ENABLE_VERIFY.to_owned(),
            flag_value(attestation.enable_verify).to_owned(),
        ),
        (
            env::RATLS_REQUIRE_PEER_CERT.to_owned(),
            flag_value(attestation.require_peer_cert).to_owned(),
        ),
    ]);
    let mut removed = Vec::new();

    let optional = [
        (env::RATLS_WHITELIST_CONFIG, inputs.whitelist.clone()),
        (env::LD_PRELOAD, preload.map(Utf8Path::to_string)),
    ];
    for (name, maybe) in optional {
        let Some(value) = maybe else {
            removed.push(name.to_owned());
            continue;
        };
        vars.insert(name.to_owned(), value);
    }
    let local_ip: Option<IpAddr> = inputs
        .server_files
        .as_ref()
        .and_then(|files| files.plan.as_ref())
        .map(|plan| plan.local_address);
    if let Some(address) = local_ip {
        vars.insert(env::GR_LOCAL_IP.to_owned(), address.to_string());
    }
    (vars, removed)
}

fn server_arguments(config: &LauncherConfig, inputs: &HandoffInputs) -> Vec<OsString> {
    let attestation = config.attestation();
    let storage = config.storage();
    let files = inputs.server_files.as_ref();
    let mut args: Vec<OsString> = Vec::new();

    // The server only honours this option in first position.
    if let Some(option_file) = files.and_then(|files| files.defaults_extra_file.as_ref()) {
        args.push(format!("--defaults-extra-file={option_file}").into());
    }
    args.extend(
        [
            format!("--datadir={}", storage.data_dir),
            format!("--ssl-cert={}", attestation.cert_path),
            format!("--ssl-key={}", attestation.key_path),
            "--require-secure-transport=ON".to_owned(),
            format!("--log-error={}", storage.log_dir.join("error.log")),
            format!(
                "--port={}",
                inputs.service_port.unwrap_or_else(|| config.service_port())
            ),
        ]
        .map(OsString::from),
    );
    if let Some(files) = files {
        args.push(format!("--init-file={}", files.init_file).into());
    }
    args.extend(config.passthrough().iter().cloned());
    args
}

/// Assembles the target command.
pub fn build_command(
    config: &LauncherConfig,
    inputs: &HandoffInputs,
    reporter: &dyn StageReporter,
) -> Result<LaunchCommand, LaunchError> {
    build_command_with(config, inputs, reporter, file_exists)
}

/// [`build_command`] with an injectable existence check.
pub fn build_command_with(
    config: &LauncherConfig,
    inputs: &HandoffInputs,
    reporter: &dyn StageReporter,
    exists: impl Fn(&Utf8Path) -> bool,
) -> Result<LaunchCommand, LaunchError> {
    let configured_preload = config.attestation().preload_path.as_deref();
    let found = find_preload(configured_preload, &exists);
    let missing_preload = || {
        let error = LaunchError::MissingPreload {
            searched: searched(configured_preload, &PRELOAD_CANDIDATES),
        };
        match config.target() {
            TargetKind::Server => StageError::degraded(Stage::Handoff, error.to_string()),
            TargetKind::Client => StageError::fatal(error),
        }
    };
    let preload = settle(found.ok_or_else(missing_preload).map(Some), || None, reporter)?;

    let (program, args) = match config.target() {
        TargetKind::Server => (
            config
                .target_binary()
                .map_or_else(|| Utf8PathBuf::from(SERVER_BINARY), Utf8Path::to_owned),
            server_arguments(config, inputs),
        ),
        TargetKind::Client => {
            let node = config
                .target_binary()
                .map(Utf8Path::to_owned)
                .or_else(|| {
                    NODE_CANDIDATES
                        .iter()
                        .map(Utf8Path::new)
                        .find(|candidate| exists(candidate))
                        .map(Utf8Path::to_owned)
                })
                .ok_or_else(|| LaunchError::MissingTarget {
                    searched: searched(None, &NODE_CANDIDATES),
                })?;
            let mut args = vec![OsString::from(CLIENT_SCRIPT)];
            args.extend(config.passthrough().iter().cloned());
            (node, args)
        }
    };

    let (vars, removed_env) = target_environment(config, inputs, preload.as_deref());
    Ok(LaunchCommand {
        program,
        args,
        env: vars,
        removed_env,
    })
}

/// Prints the plan in dry-run mode; otherwise replaces the process.
///
/// Returns only in dry-run mode or when the replacement fails.
pub fn hand_off(
    command: &LaunchCommand,
    dry_run: bool,
    replacer: &dyn ProcessReplacer,
    stdout: &mut dyn io::Write,
) -> Result<(), LaunchError> {
    if dry_run {
        writeln!(stdout, "{command}").map_err(|source| LaunchError::Output { source })?;
        info!(target: LAUNCH_TARGET, program = %command.program(), "dry run, not executing");
        return Ok(());
    }

    info!(
        target: LAUNCH_TARGET,
        program = %command.program(),
        args = command.args().len(),
        "replacing launcher with target"
    );
    let Err(source) = replacer.replace(command);
    Err(LaunchError::Exec {
        program: command.program().to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use launcher_config::EnvSnapshot;
    use mockall::mock;
    use rstest::rstest;

    use super::*;
    use crate::reporter::RecordingStageReporter;

    mock! {
        Replacer {}
        impl ProcessReplacer for Replacer {
            fn replace(&self, command: &LaunchCommand) -> Result<Infallible, io::Error>;
        }
    }

    fn config(pairs: &[(&str, &str)], args: &[&str]) -> LauncherConfig {
        let argv: Vec<OsString> = std::iter::once("mysql-ratls-launcher")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect();
        LauncherConfig::resolve(&argv, &EnvSnapshot::from_pairs(pairs.iter().copied()))
            .expect("resolve")
    }

    fn rendered(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    fn server_files() -> ServerFiles {
        ServerFiles {
            defaults_extra_file: Some(Utf8PathBuf::from("/app/wallet/mysql-gr/group_replication.cnf")),
            init_file: Utf8PathBuf::from("/app/wallet/mysql-gr/gr_bootstrap.sql"),
            plan: None,
        }
    }

    #[test]
    fn server_arguments_put_the_option_file_first_and_pass_through_last() {
        let config = config(&[], &["--", "--innodb-buffer-pool-size=1G"]);
        let inputs = HandoffInputs {
            service_port: Some(3307),
            server_files: Some(server_files()),
            whitelist: None,
        };
        let reporter = RecordingStageReporter::default();
        let command = build_command_with(&config, &inputs, &reporter, |_| true).expect("command");

        assert_eq!(command.program(), SERVER_BINARY);
        assert_eq!(
            rendered(command.args()),
            [
                "--defaults-extra-file=/app/wallet/mysql-gr/group_replication.cnf",
                "--datadir=/app/wallet/mysql-data",
                "--ssl-cert=/var/lib/mysql-ssl/server-cert.pem",
                "--ssl-key=/app/wallet/mysql-keys/server-key.pem",
                "--require-secure-transport=ON",
                "--log-error=/var/log/mysql/error.log",
                "--port=3307",
                "--init-file=/app/wallet/mysql-gr/gr_bootstrap.sql",
                "--innodb-buffer-pool-size=1G",
            ]
        );
    }

    #[test]
    fn caller_overrides_never_follow_the_managed_options() {
        let config = config(
            &[],
            &[
                "--",
                "--ssl_key=/tmp/evil.pem",
                "-h/tmp/evil",
                "--port=1",
                "--skip-name-resolve",
            ],
        );
        let inputs = HandoffInputs {
            service_port: Some(3307),
            server_files: Some(server_files()),
            whitelist: None,
        };
        let reporter = RecordingStageReporter::default();
        let command = build_command_with(&config, &inputs, &reporter, |_| true).expect("command");

        let args = rendered(command.args());
        assert_eq!(args.last().map(String::as_str), Some("--skip-name-resolve"));
        assert!(!args.iter().any(|arg| arg.contains("/tmp/evil") || arg == "--port=1"));
    }

    #[test]
    fn preload_is_only_in_the_target_environment() {
        let config = config(&[("RATLS_ENABLE_VERIFY", "no")], &[]);
        let reporter = RecordingStageReporter::default();
        let command = build_command_with(
            &config,
            &HandoffInputs {
                whitelist: Some("d2w=".to_owned()),
                ..HandoffInputs::default()
            },
            &reporter,
            |path| path == PRELOAD_CANDIDATES[1],
        )
        .expect("command");

        assert_eq!(
            command.env().get("LD_PRELOAD").map(String::as_str),
            Some(PRELOAD_CANDIDATES[1])
        );
        assert_eq!(command.env().get("RATLS_ENABLE_VERIFY").map(String::as_str), Some("0"));
        assert_eq!(command.env().get("RATLS_WHITELIST_CONFIG").map(String::as_str), Some("d2w="));
        assert!(command.removed_env().is_empty());
    }

    #[test]
    fn missing_preload_degrades_for_the_server() {
        let config = config(&[], &[]);
        let reporter = RecordingStageReporter::default();
        let command =
            build_command_with(&config, &HandoffInputs::default(), &reporter, |_| false).expect("command");
        assert!(command.removed_env().iter().any(|name| name == "LD_PRELOAD"));
        assert_eq!(reporter.degradations().len(), 1);
    }

    #[test]
    fn missing_preload_is_fatal_for_the_client() {
        let config = config(&[("RATLS_LAUNCH_TARGET", "client")], &[]);
        let reporter = RecordingStageReporter::default();
        let error = build_command_with(&config, &HandoffInputs::default(), &reporter, |_| false)
            .expect_err("fatal");
        assert!(matches!(error, LaunchError::MissingPreload { .. }));
    }

    #[test]
    fn client_runs_the_first_node_found_with_the_script() {
        let config = config(&[("RATLS_LAUNCH_TARGET", "client")], &["--", "--query", "SELECT 1"]);
        let reporter = RecordingStageReporter::default();
        let command = build_command_with(&config, &HandoffInputs::default(), &reporter, |path| {
            path == "/usr/local/bin/node" || path.as_str().ends_with(".so")
        })
        .expect("command");
        assert_eq!(command.program(), "/usr/local/bin/node");
        assert_eq!(rendered(command.args()), [CLIENT_SCRIPT, "--query", "SELECT 1"]);
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("--port=3306", "--port=3306")]
    #[case("two words", "'two words'")]
    #[case("it's", r"'it'\''s'")]
    #[case("", "''")]
    fn quotes_shell_words(#[case] word: &str, #[case] expected: &str) {
        assert_eq!(shell_quote(word), expected);
    }

    #[test]
    fn dry_run_prints_instead_of_replacing() {
        let command = LaunchCommand {
            program: Utf8PathBuf::from(SERVER_BINARY),
            args: vec![OsString::from("--port=3306")],
            env: BTreeMap::from([("LD_PRELOAD".to_owned(), "/lib/x.so".to_owned())]),
            removed_env: Vec::new(),
        };
        let mut replacer = MockReplacer::new();
        replacer.expect_replace().never();
        let mut out = Vec::new();
        hand_off(&command, true, &replacer, &mut out).expect("dry run");
        assert_eq!(
            String::from_utf8(out).expect("utf-8"),
            "LD_PRELOAD=/lib/x.so /usr/sbin/mysqld --port=3306\n"
        );
    }

    #[test]
    fn exec_failure_carries_the_os_reason() {
        let command = LaunchCommand {
            program: Utf8PathBuf::from("/nonexistent/mysqld"),
            args: Vec::new(),
            env: BTreeMap::new(),
            removed_env: Vec::new(),
        };
        let mut replacer = MockReplacer::new();
        replacer
            .expect_replace()
            .times(1)
            .returning(|_| Err(io::Error::from(io::ErrorKind::NotFound)));
        let error = hand_off(&command, false, &replacer, &mut Vec::new()).expect_err("exec fails");
        assert!(matches!(error, LaunchError::Exec { .. }));
        assert!(error.to_string().contains("/nonexistent/mysqld"));
    }
}
