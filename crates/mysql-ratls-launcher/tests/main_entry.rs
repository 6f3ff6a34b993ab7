//! Integration tests for the `mysql-ratls-launcher` binary entry point.
//!
//! Runs the binary in dry-run mode against a temporary wallet, and checks
//! that configuration failures surface on stderr with a failing exit code.

use std::fs;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use camino::Utf8PathBuf;
use predicates::prelude::*;
use predicates::str::contains;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Wallet {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Wallet {
    fn command(&self) -> Command {
        let mut command = cargo_bin_cmd!("mysql-ratls-launcher");
        command
            .env_clear()
            .env("RATLS_SECURE_ROOT", self.root.join("wallet"))
            .env("RATLS_CERT_PATH", self.root.join("ssl/cert.pem"))
            .env("MYSQL_TEMPLATE_DIR", self.root.join("template"))
            .env("MYSQL_LOG_DIR", self.root.join("log"))
            .env("MYSQL_PUBLIC_DIR", self.root.join("public"))
            .env("RATLS_PRELOAD_PATH", self.root.join("libratls.so"))
            .env("RATLS_LAUNCHER_LOG_FILTER", "warn");
        command
    }
}

#[fixture]
fn wallet() -> Wallet {
    let dir = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
    fs::create_dir_all(root.join("template/mysql")).expect("template");
    fs::write(root.join("template/mysql.ibd"), "tablespace").expect("marker");
    fs::write(root.join("libratls.so"), "").expect("library");
    Wallet { _dir: dir, root }
}

#[rstest]
fn server_dry_run_prints_the_plan(wallet: Wallet) {
    wallet
        .command()
        .env("RATLS_LAUNCHER_DRY_RUN", "1")
        .env("MYSQL_GR_BOOTSTRAP", "on")
        .env("MYSQL_GR_LOCAL_ADDRESS", "127.0.0.1")
        .arg("--")
        .arg("--innodb-buffer-pool-size=64M")
        .assert()
        .success()
        .stdout(contains("/usr/sbin/mysqld"))
        .stdout(contains("--require-secure-transport=ON"))
        .stdout(contains("--innodb-buffer-pool-size=64M"))
        .stdout(contains("group_name="))
        .stdout(contains("GR_LOCAL_IP=127.0.0.1"));
}

#[rstest]
fn server_dry_run_ignores_caller_overrides_of_managed_options(wallet: Wallet) {
    wallet
        .command()
        .env("RATLS_LAUNCHER_DRY_RUN", "1")
        .args([
            "--",
            "--ssl_key=/tmp/evil.pem",
            "--loose-datadir=/tmp/evil",
            "-h/tmp/evil",
            "--require-secure-transport=OFF",
            "--port=1",
        ])
        .assert()
        .success()
        .stdout(contains("--require-secure-transport=ON"))
        .stdout(contains("/tmp/evil").not())
        .stdout(contains("--require-secure-transport=OFF").not())
        .stdout(contains("--port=1").not());
}

#[rstest]
fn client_dry_run_preloads_the_attestation_library(wallet: Wallet) {
    wallet
        .command()
        .env("RATLS_LAUNCH_TARGET", "client")
        .env("RATLS_TARGET_BINARY", "/opt/node-install/bin/node")
        .env("RATLS_LAUNCHER_DRY_RUN", "true")
        .arg("--query")
        .arg("SELECT 1")
        .assert()
        .success()
        .stdout(contains("LD_PRELOAD="))
        .stdout(contains("/opt/node-install/bin/node /app/mysql-client.js --query 'SELECT 1'"));
}

#[rstest]
fn join_without_seeds_exits_with_failure(wallet: Wallet) {
    wallet
        .command()
        .env("MYSQL_GR_GROUP_NAME", "9b2c7e4e-2f0a-4a3b-8d55-1f3a4c2b9e10")
        .assert()
        .failure()
        .stderr(contains("seed"));
}

#[rstest]
fn malformed_flags_name_the_setting(wallet: Wallet) {
    wallet
        .command()
        .env("RATLS_LAUNCHER_DRY_RUN", "maybe")
        .assert()
        .failure()
        .stderr(contains("RATLS_LAUNCHER_DRY_RUN"));
}
