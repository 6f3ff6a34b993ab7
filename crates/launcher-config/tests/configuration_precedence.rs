//! Behavioural coverage for configuration precedence.

use std::cell::RefCell;
use std::ffi::OsString;

use camino::Utf8PathBuf;
use launcher_config::{EnvSnapshot, LauncherConfig, ReplicationMode};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

struct Harness {
    secure_root: TempDir,
    env: RefCell<Vec<(String, String)>>,
    cli_args: RefCell<Vec<OsString>>,
}

impl Harness {
    fn new() -> Self {
        let secure_root = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        Self {
            secure_root,
            env: RefCell::new(Vec::new()),
            cli_args: RefCell::new(vec![OsString::from("mysql-ratls-launcher")]),
        }
    }

    fn secure_root(&self) -> Utf8PathBuf {
        match Utf8PathBuf::from_path_buf(self.secure_root.path().to_path_buf()) {
            Ok(path) => path,
            Err(path) => panic!("temporary directory is not UTF-8: {}", path.display()),
        }
    }

    fn snapshot(&self) -> EnvSnapshot {
        let mut pairs = self.env.borrow().clone();
        pairs.push((
            "RATLS_SECURE_ROOT".to_owned(),
            self.secure_root().to_string(),
        ));
        EnvSnapshot::from_pairs(pairs)
    }

    fn resolve(&self) -> LauncherConfig {
        let args = self.cli_args.borrow().clone();
        match LauncherConfig::resolve(&args, &self.snapshot()) {
            Ok(config) => config,
            Err(error) => panic!("configuration failed to resolve: {error}"),
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("an empty manifest environment")]
fn given_empty_environment(harness: &Harness) {
    harness.env.borrow_mut().clear();
}

#[given("the manifest sets \"{key}\" to \"{value}\"")]
fn given_manifest_value(harness: &Harness, key: String, value: String) {
    harness.env.borrow_mut().push((key, value));
}

#[when("the command line sets \"{flag}\" to \"{value}\"")]
fn when_cli_value(harness: &Harness, flag: String, value: String) {
    let mut args = harness.cli_args.borrow_mut();
    args.push(OsString::from(flag));
    args.push(OsString::from(value));
}

#[then("resolving the configuration yields service port {port}")]
fn then_service_port(harness: &Harness, port: u16) {
    assert_eq!(harness.resolve().service_port(), port);
}

#[then("the replication mode is \"{mode}\"")]
fn then_replication_mode(harness: &Harness, mode: String) {
    let config = harness.resolve();
    assert_eq!(config.replication().mode.to_string(), mode);
    assert_eq!(config.replication().mode, ReplicationMode::Disabled);
}

#[then("a warning names \"{variable}\" as the winning source")]
fn then_warning_names(harness: &Harness, variable: String) {
    let config = harness.resolve();
    assert!(
        config
            .warnings()
            .iter()
            .any(|warning| warning.to_string().contains(&variable)),
        "expected a warning naming {variable}, got {:?}",
        config.warnings()
    );
}

#[then("the key path stays under the secure root")]
fn then_key_under_root(harness: &Harness) {
    let config = harness.resolve();
    assert!(
        config
            .attestation()
            .key_path
            .starts_with(harness.secure_root())
    );
    assert!(config.passthrough().is_empty());
}

#[then("validation fails mentioning \"{fragment}\"")]
fn then_validation_fails(harness: &Harness, fragment: String) {
    let config = harness.resolve();
    match config.validate() {
        Ok(()) => panic!("validation should fail"),
        Err(error) => assert!(
            error.to_string().contains(&fragment),
            "unexpected error: {error}"
        ),
    }
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Built-in defaults apply when nothing is configured"
)]
fn built_in_defaults(harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Arguments override built-in defaults"
)]
fn arguments_override_defaults(harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "The manifest environment overrides arguments"
)]
fn manifest_overrides_arguments(harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Environment-only settings are not accepted from the command line"
)]
fn environment_only_settings(harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Joining without seeds is rejected"
)]
fn join_without_seeds(harness: Harness) {
    drop(harness);
}
