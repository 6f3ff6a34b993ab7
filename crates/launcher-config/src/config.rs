//! Resolution of the launcher configuration from arguments and environment.
//!
//! Every field follows the same precedence: manifest environment, then
//! command-line flag, then built-in default. The environment is dominant
//! because only the signed manifest can set it.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use uuid::Uuid;

use crate::cli::{LauncherArgs, remove_managed_server_options, split_launcher_arguments};
use crate::defaults::{
    DEFAULT_CERT_ALGORITHM, DEFAULT_LOG_DIR, DEFAULT_PUBLIC_DIR, DEFAULT_REPLICATION_PORT,
    DEFAULT_SECURE_ROOT, DEFAULT_SERVICE_PORT, DEFAULT_TEMPLATE_DIR, default_cert_path,
    default_data_dir, default_gr_config_dir, default_key_path, default_log_filter,
};
use crate::env::{self, EnvSnapshot, parse_flag};
use crate::paths::{ensure_absolute, ensure_within};
use crate::replication::{
    GROUP_NAME_FILE, ReplicationMode, ReplicationSettings, parse_local_address, parse_seed_list,
};
use crate::{ConfigError, ConfigWarning, LogFormat, TargetKind};

/// Attestation identity and whitelist inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationSettings {
    /// Contract holding the remote SGX configuration.
    pub contract_address: Option<String>,
    /// JSON-RPC endpoint used to read the contract.
    pub rpc_url: Option<String>,
    /// Base64 whitelist from the manifest.
    pub local_whitelist: Option<String>,
    /// Certificate path handed to the attestation library.
    pub cert_path: Utf8PathBuf,
    /// Private key path; always under the secure root.
    pub key_path: Utf8PathBuf,
    /// Certificate key algorithm.
    pub cert_algorithm: String,
    /// Peer verification toggle.
    pub enable_verify: bool,
    /// Mutual authentication toggle.
    pub require_peer_cert: bool,
    /// Explicit attestation library path; searched when absent.
    pub preload_path: Option<Utf8PathBuf>,
}

impl AttestationSettings {
    /// Returns the contract address and RPC endpoint when both are set.
    #[must_use]
    pub fn remote_source(&self) -> Option<(&str, &str)> {
        Some((self.contract_address.as_deref()?, self.rpc_url.as_deref()?))
    }
}

/// Directory layout used by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    /// Encrypted mount point.
    pub secure_root: Utf8PathBuf,
    /// Live data directory.
    pub data_dir: Utf8PathBuf,
    /// Template data directory copied on first boot.
    pub template_dir: Utf8PathBuf,
    /// Directory for generated replication configuration.
    pub gr_config_dir: Utf8PathBuf,
    /// Server log directory.
    pub log_dir: Utf8PathBuf,
    /// Operator-visible directory for non-secret identity copies.
    pub public_dir: Utf8PathBuf,
}

/// Immutable configuration for a single launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    target: TargetKind,
    target_binary: Option<Utf8PathBuf>,
    attestation: AttestationSettings,
    storage: StorageLayout,
    replication: ReplicationSettings,
    service_port: u16,
    service_port_explicit: bool,
    passthrough: Vec<OsString>,
    dry_run: bool,
    log_filter: String,
    log_format: LogFormat,
    warnings: Vec<ConfigWarning>,
}

/// A raw value together with the setting name that supplied it.
struct Picked {
    value: String,
    name: &'static str,
}

/// Applies environment-over-argument precedence and records conflicts.
struct Resolver<'a> {
    env: &'a EnvSnapshot,
    warnings: Vec<ConfigWarning>,
}

impl Resolver<'_> {
    fn pick(
        &mut self,
        variable: &'static str,
        flag: &'static str,
        argument: Option<String>,
    ) -> Option<Picked> {
        let from_argument = argument.filter(|value| !value.trim().is_empty());
        match (self.env.get(variable), from_argument) {
            (Some(value), overridden) => {
                if overridden.is_some() {
                    self.warnings
                        .push(ConfigWarning::EnvironmentWins { flag, variable });
                }
                Some(Picked {
                    value: value.trim().to_owned(),
                    name: variable,
                })
            }
            (None, Some(value)) => Some(Picked {
                value: value.trim().to_owned(),
                name: flag,
            }),
            (None, None) => None,
        }
    }

    fn env_only(&self, variable: &'static str) -> Option<String> {
        self.env.get(variable).map(|value| value.trim().to_owned())
    }

    fn flag(
        &mut self,
        variable: &'static str,
        flag: &'static str,
        argument: Option<String>,
        default: bool,
    ) -> Result<bool, ConfigError> {
        self.pick(variable, flag, argument)
            .map_or(Ok(default), |picked| parse_flag(picked.name, &picked.value))
    }

    fn port(
        &mut self,
        variable: &'static str,
        flag: &'static str,
        argument: Option<String>,
        default: u16,
    ) -> Result<(u16, bool), ConfigError> {
        let Some(picked) = self.pick(variable, flag, argument) else {
            return Ok((default, false));
        };
        match picked.value.parse::<u16>() {
            Ok(port) if port != 0 => Ok((port, true)),
            _ => Err(ConfigError::InvalidPort {
                name: picked.name,
                value: picked.value,
            }),
        }
    }
}

fn parse_group_name(raw: &str) -> Result<String, ConfigError> {
    Uuid::parse_str(raw.trim())
        .map(|uuid| uuid.hyphenated().to_string())
        .map_err(|_| ConfigError::InvalidGroupName {
            value: raw.to_owned(),
        })
}

/// Reads the persisted group name without creating anything.
fn probe_persisted_group_name(data_dir: &Utf8Path) -> Result<Option<String>, ConfigError> {
    let path = data_dir.join(GROUP_NAME_FILE);
    match fs::read_to_string(&path) {
        Ok(contents) => {
            let trimmed = contents.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                parse_group_name(trimmed).map(Some)
            }
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::PersistedGroupName { path, source }),
    }
}

impl LauncherConfig {
    /// Resolves the configuration from the full argument vector (program
    /// name first) and an environment snapshot.
    ///
    /// The only filesystem access is a read-only probe for a persisted
    /// replication group name in the data directory.
    pub fn resolve(args: &[OsString], env: &EnvSnapshot) -> Result<Self, ConfigError> {
        let mut split = split_launcher_arguments(args);
        let parsed = LauncherArgs::try_parse_from(&split.launcher_arguments)
            .map_err(|source| ConfigError::Arguments { source })?;

        let mut resolver = Resolver {
            env,
            warnings: split
                .dropped
                .into_iter()
                .map(ConfigWarning::Dropped)
                .collect(),
        };

        let target = resolver
            .pick(env::RATLS_LAUNCH_TARGET, "--target", parsed.target)
            .map(|picked| {
                TargetKind::from_str(&picked.value).map_err(|_| ConfigError::InvalidTarget {
                    value: picked.value,
                })
            })
            .transpose()?
            .unwrap_or_default();
        if target == TargetKind::Server {
            resolver.warnings.extend(
                remove_managed_server_options(&mut split.passthrough)
                    .into_iter()
                    .map(ConfigWarning::Dropped),
            );
        }
        let log_filter = resolver
            .pick(env::RATLS_LAUNCHER_LOG_FILTER, "--log-filter", parsed.log_filter)
            .map_or_else(|| default_log_filter().to_owned(), |picked| picked.value);
        let log_format = resolver
            .pick(
                env::RATLS_LAUNCHER_LOG_FORMAT,
                "--log-format",
                parsed.log_format,
            )
            .map(|picked| {
                LogFormat::from_str(&picked.value).map_err(|_| ConfigError::InvalidLogFormat {
                    value: picked.value,
                })
            })
            .transpose()?
            .unwrap_or_default();

        let storage = Self::resolve_storage(&mut resolver, parsed.log_dir, parsed.public_dir);
        let attestation = Self::resolve_attestation(
            &mut resolver,
            target,
            &storage.secure_root,
            AttestationArgs {
                contract_address: parsed.contract_address,
                rpc_url: parsed.rpc_url,
                cert_path: parsed.cert_path,
                cert_algorithm: parsed.cert_algorithm,
                enable_verify: parsed.enable_verify,
                require_peer_cert: parsed.require_peer_cert,
            },
        )?;

        let (service_port, service_port_explicit) = resolver.port(
            env::MYSQL_PORT,
            "--port",
            parsed.port,
            DEFAULT_SERVICE_PORT,
        )?;
        let replication = Self::resolve_replication(
            &mut resolver,
            target,
            &storage.data_dir,
            ReplicationArgs {
                group_name: parsed.gr_group_name,
                seeds: parsed.gr_seeds,
                local_address: parsed.gr_local_address,
                bootstrap: parsed.gr_bootstrap,
                debug: parsed.gr_debug,
                port: parsed.gr_port,
            },
        )?;
        let dry_run = resolver.flag(
            env::RATLS_LAUNCHER_DRY_RUN,
            "--dry-run",
            parsed.dry_run,
            false,
        )?;
        let target_binary = resolver
            .env_only(env::RATLS_TARGET_BINARY)
            .map(Utf8PathBuf::from);

        Ok(Self {
            target,
            target_binary,
            attestation,
            storage,
            replication,
            service_port,
            service_port_explicit,
            passthrough: split.passthrough,
            dry_run,
            log_filter,
            log_format,
            warnings: resolver.warnings,
        })
    }

    fn resolve_storage(
        resolver: &mut Resolver<'_>,
        log_dir: Option<String>,
        public_dir: Option<String>,
    ) -> StorageLayout {
        let secure_root = resolver
            .env_only(env::RATLS_SECURE_ROOT)
            .map_or_else(|| Utf8PathBuf::from(DEFAULT_SECURE_ROOT), Utf8PathBuf::from);
        let data_dir = resolver
            .env_only(env::MYSQL_DATA_DIR)
            .map_or_else(|| default_data_dir(&secure_root), Utf8PathBuf::from);
        let template_dir = resolver
            .env_only(env::MYSQL_TEMPLATE_DIR)
            .map_or_else(|| Utf8PathBuf::from(DEFAULT_TEMPLATE_DIR), Utf8PathBuf::from);
        let gr_config_dir = resolver
            .env_only(env::MYSQL_GR_CONFIG_DIR)
            .map_or_else(|| default_gr_config_dir(&secure_root), Utf8PathBuf::from);
        let log_dir = resolver
            .pick(env::MYSQL_LOG_DIR, "--log-dir", log_dir)
            .map_or_else(|| Utf8PathBuf::from(DEFAULT_LOG_DIR), |p| p.value.into());
        let public_dir = resolver
            .pick(env::MYSQL_PUBLIC_DIR, "--public-dir", public_dir)
            .map_or_else(|| Utf8PathBuf::from(DEFAULT_PUBLIC_DIR), |p| p.value.into());
        StorageLayout {
            secure_root,
            data_dir,
            template_dir,
            gr_config_dir,
            log_dir,
            public_dir,
        }
    }

    fn resolve_attestation(
        resolver: &mut Resolver<'_>,
        target: TargetKind,
        secure_root: &Utf8Path,
        args: AttestationArgs,
    ) -> Result<AttestationSettings, ConfigError> {
        let contract_address = resolver
            .pick(env::CONTRACT_ADDRESS, "--contract-address", args.contract_address)
            .map(|picked| picked.value);
        let rpc_url = resolver
            .pick(env::RPC_URL, "--rpc-url", args.rpc_url)
            .map(|picked| picked.value);
        match (&contract_address, &rpc_url) {
            (Some(_), None) => resolver.warnings.push(ConfigWarning::IncompleteRemoteSource {
                missing: env::RPC_URL,
            }),
            (None, Some(_)) => resolver.warnings.push(ConfigWarning::IncompleteRemoteSource {
                missing: env::CONTRACT_ADDRESS,
            }),
            _ => {}
        }

        let cert_path = resolver
            .pick(env::RATLS_CERT_PATH, "--cert-path", args.cert_path)
            .map_or_else(|| default_cert_path(target), |picked| picked.value.into());
        let key_path = resolver
            .env_only(env::RATLS_KEY_PATH)
            .map_or_else(|| default_key_path(target, secure_root), Utf8PathBuf::from);
        let cert_algorithm = resolver
            .pick(env::RA_TLS_CERT_ALGORITHM, "--cert-algorithm", args.cert_algorithm)
            .map_or_else(|| DEFAULT_CERT_ALGORITHM.to_owned(), |picked| picked.value);
        let enable_verify = resolver.flag(
            env::RATLS_ENABLE_VERIFY,
            "--enable-verify",
            args.enable_verify,
            true,
        )?;
        let require_peer_cert = resolver.flag(
            env::RATLS_REQUIRE_PEER_CERT,
            "--require-peer-cert",
            args.require_peer_cert,
            true,
        )?;

        Ok(AttestationSettings {
            contract_address,
            rpc_url,
            local_whitelist: resolver.env_only(env::RATLS_WHITELIST_CONFIG),
            cert_path,
            key_path,
            cert_algorithm,
            enable_verify,
            require_peer_cert,
            preload_path: resolver
                .env_only(env::RATLS_PRELOAD_PATH)
                .map(Utf8PathBuf::from),
        })
    }

    fn resolve_replication(
        resolver: &mut Resolver<'_>,
        target: TargetKind,
        data_dir: &Utf8Path,
        args: ReplicationArgs,
    ) -> Result<ReplicationSettings, ConfigError> {
        let (port, port_explicit) = resolver.port(
            env::MYSQL_GR_PORT,
            "--gr-port",
            args.port,
            DEFAULT_REPLICATION_PORT,
        )?;
        let group_name = resolver
            .pick(env::MYSQL_GR_GROUP_NAME, "--gr-group-name", args.group_name)
            .map(|picked| parse_group_name(&picked.value))
            .transpose()?;
        let seeds = resolver
            .pick(env::MYSQL_GR_SEEDS, "--gr-seeds", args.seeds)
            .map(|picked| parse_seed_list(&picked.value, port))
            .transpose()?
            .unwrap_or_default();
        let local_address: Option<IpAddr> = resolver
            .pick(
                env::MYSQL_GR_LOCAL_ADDRESS,
                "--gr-local-address",
                args.local_address,
            )
            .map(|picked| parse_local_address(&picked.value))
            .transpose()?;
        let bootstrap = resolver.flag(
            env::MYSQL_GR_BOOTSTRAP,
            "--gr-bootstrap",
            args.bootstrap,
            false,
        )?;
        let debug = resolver.flag(env::MYSQL_GR_DEBUG, "--gr-debug", args.debug, false)?;

        let persisted_group_name = match target {
            TargetKind::Server => probe_persisted_group_name(data_dir)?,
            TargetKind::Client => None,
        };
        let mode = match target {
            TargetKind::Client => ReplicationMode::Disabled,
            TargetKind::Server if bootstrap => ReplicationMode::Bootstrap,
            TargetKind::Server if group_name.is_some() || persisted_group_name.is_some() => {
                ReplicationMode::Join
            }
            TargetKind::Server => ReplicationMode::Disabled,
        };
        let options_given =
            !seeds.is_empty() || local_address.is_some() || group_name.is_some() || bootstrap;
        if !mode.is_enabled() && options_given {
            resolver
                .warnings
                .push(ConfigWarning::UnusedReplicationOptions);
        }

        Ok(ReplicationSettings {
            mode,
            group_name,
            persisted_group_name,
            seeds,
            local_address,
            port,
            port_explicit,
            debug,
        })
    }

    /// Checks cross-field invariants. Touches neither filesystem nor network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let root = &self.storage.secure_root;
        ensure_absolute(env::RATLS_SECURE_ROOT, root)?;
        ensure_within(env::RATLS_KEY_PATH, &self.attestation.key_path, root)?;
        ensure_absolute(env::RATLS_CERT_PATH, &self.attestation.cert_path)?;

        if self.target == TargetKind::Client {
            return Ok(());
        }

        ensure_within(env::MYSQL_DATA_DIR, &self.storage.data_dir, root)?;
        ensure_within(env::MYSQL_GR_CONFIG_DIR, &self.storage.gr_config_dir, root)?;
        ensure_absolute(env::MYSQL_TEMPLATE_DIR, &self.storage.template_dir)?;
        ensure_absolute(env::MYSQL_LOG_DIR, &self.storage.log_dir)?;
        ensure_absolute(env::MYSQL_PUBLIC_DIR, &self.storage.public_dir)?;

        if self.replication.mode != ReplicationMode::Disabled
            && self.service_port == self.replication.port
        {
            return Err(ConfigError::PortConflict {
                port: self.service_port,
            });
        }
        if self.replication.mode == ReplicationMode::Join && self.replication.seeds.is_empty() {
            return Err(ConfigError::JoinWithoutSeeds);
        }
        if let (Some(configured), Some(persisted)) = (
            &self.replication.group_name,
            &self.replication.persisted_group_name,
        ) && configured != persisted
        {
            return Err(ConfigError::GroupNameMismatch {
                configured: configured.clone(),
                persisted: persisted.clone(),
                path: self.storage.data_dir.join(GROUP_NAME_FILE),
            });
        }
        Ok(())
    }

    /// Launch target.
    #[must_use]
    pub const fn target(&self) -> TargetKind {
        self.target
    }

    /// Explicit target binary, if the manifest set one.
    #[must_use]
    pub fn target_binary(&self) -> Option<&Utf8Path> {
        self.target_binary.as_deref()
    }

    /// Attestation inputs.
    #[must_use]
    pub const fn attestation(&self) -> &AttestationSettings {
        &self.attestation
    }

    /// Directory layout.
    #[must_use]
    pub const fn storage(&self) -> &StorageLayout {
        &self.storage
    }

    /// Replication settings.
    #[must_use]
    pub const fn replication(&self) -> &ReplicationSettings {
        &self.replication
    }

    /// Client-facing server port.
    #[must_use]
    pub const fn service_port(&self) -> u16 {
        self.service_port
    }

    /// Whether the service port was configured explicitly.
    #[must_use]
    pub const fn service_port_explicit(&self) -> bool {
        self.service_port_explicit
    }

    /// Arguments forwarded to the target, in order.
    #[must_use]
    pub fn passthrough(&self) -> &[OsString] {
        &self.passthrough
    }

    /// Whether the final exec is replaced by printing the command.
    #[must_use]
    pub const fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Launcher log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Launcher log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Warnings gathered during resolution, reported once logging is up.
    #[must_use]
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }
}

struct AttestationArgs {
    contract_address: Option<String>,
    rpc_url: Option<String>,
    cert_path: Option<String>,
    cert_algorithm: Option<String>,
    enable_verify: Option<String>,
    require_peer_cert: Option<String>,
}

struct ReplicationArgs {
    group_name: Option<String>,
    seeds: Option<String>,
    local_address: Option<String>,
    bootstrap: Option<String>,
    debug: Option<String>,
    port: Option<String>,
}
