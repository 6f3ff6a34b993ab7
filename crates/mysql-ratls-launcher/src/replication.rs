//! Group replication orchestration.
//!
//! Derives the node's replication identity, persists it in the data
//! directory and renders the two files the server reads at start-up: an
//! option file enabling the replication plugin and an init file holding
//! idempotent SQL. The server cannot start group replication from its init
//! file while the plugin is still settling, so the SQL schedules one-shot
//! events that do it a few seconds later.

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use gr_ifaddrs::AddressProbe;
use launcher_config::{
    AttestationSettings, GROUP_NAME_FILE, LauncherConfig, PeerAddress, ReplicationMode,
    SERVER_ID_FILE,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{LaunchError, Stage, StageError, settle};
use crate::files::{PRIVATE_MODE, PUBLIC_MODE, atomic_write};
use crate::identity::{IdentityError, IdentityStore};
use crate::reporter::StageReporter;

const REPLICATION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::replication");

/// Option file passed to the server through `--defaults-extra-file`.
pub const GR_CONFIG_FILE: &str = "group_replication.cnf";

/// SQL file passed to the server through `--init-file`.
pub const INIT_SQL_FILE: &str = "gr_bootstrap.sql";

/// Operator-visible copy of the group name in the public directory.
pub const PUBLIC_GROUP_NAME_FILE: &str = "gr_group_name.txt";

/// Origin ranges accepted by the group communication listener. Peers are
/// authenticated by their attested certificates, not by address.
pub const ALLOW_ALL_RANGES: &str = "0.0.0.0/0,::/0";

/// Account used by the distributed recovery channel.
pub const REPLICATION_USER: &str = "repl";

const EVENT_SCHEMA: &str = "ratls_launcher";

/// Group communication timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    /// How long a silent member may go unnoticed before it is suspected.
    pub detection_window: Duration,
    /// Timeout for establishing a connection to a peer.
    pub dial_timeout: Duration,
    /// Grace period before a suspected member is expelled.
    pub expel_timeout: Duration,
}

impl Tuning {
    /// Engine defaults.
    pub const STOCK: Self = Self {
        detection_window: Duration::from_secs(5),
        dial_timeout: Duration::from_secs(1),
        expel_timeout: Duration::from_secs(5),
    };

    /// Values used between attested peers, where every handshake generates
    /// and verifies a hardware quote.
    pub const ATTESTED: Self = Self {
        detection_window: Duration::from_secs(30),
        dial_timeout: Duration::from_secs(30),
        expel_timeout: Duration::from_secs(30),
    };
}

/// Errors raised while preparing replication.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The local address could not be detected.
    #[error("could not determine the local replication address: {source}")]
    LocalAddress {
        /// Underlying probe error.
        #[source]
        source: io::Error,
    },
    /// Persisting or reading identity failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// The configured group name differs from the persisted one.
    #[error(
        "group name '{configured}' differs from '{persisted}' persisted in '{path}'; delete the file to change groups"
    )]
    GroupNameMismatch {
        /// Configured name.
        configured: String,
        /// Persisted name.
        persisted: String,
        /// Persisted file.
        path: Utf8PathBuf,
    },
    /// Every seed points at this node.
    #[error("every configured seed is this node ({local}); joining needs another member")]
    OnlySelfSeeded {
        /// This node's replication endpoint.
        local: PeerAddress,
    },
    /// A generated server file could not be written.
    #[error("failed to write '{path}': {source}")]
    Write {
        /// File that failed.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Derives a server id from `ip:port`: the first four bytes of its SHA-256
/// digest read big-endian, with `0` mapped to `1` because the engine
/// reserves it.
#[must_use]
pub fn derive_server_id(address: IpAddr, port: u16) -> u32 {
    let digest = Sha256::digest(format!("{address}:{port}").as_bytes());
    let id = digest
        .iter()
        .take(4)
        .fold(0_u32, |id, byte| (id << 8) | u32::from(*byte));
    debug!(target: REPLICATION_TARGET, digest = %hex::encode(digest), id, "derived server id");
    id.max(1)
}

/// The node's replication identity for this boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationPlan {
    /// Bootstrap or join.
    pub mode: ReplicationMode,
    /// Persisted server id.
    pub server_id: u32,
    /// Persisted group name.
    pub group_name: String,
    /// Whether the group name was generated on this boot.
    pub group_name_created: bool,
    /// Address peers use to reach this node.
    pub local_address: IpAddr,
    /// Allocated group communication port.
    pub port: u16,
    /// Seeds, without this node.
    pub seeds: Vec<PeerAddress>,
    /// Verbose group communication diagnostics.
    pub debug: bool,
}

impl ReplicationPlan {
    /// This node's group communication endpoint.
    #[must_use]
    pub fn local_endpoint(&self) -> PeerAddress {
        PeerAddress::new(self.local_address.to_string(), self.port)
    }
}

/// Files generated for the server target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFiles {
    /// Replication option file, when replication is enabled.
    pub defaults_extra_file: Option<Utf8PathBuf>,
    /// Init SQL file.
    pub init_file: Utf8PathBuf,
    /// Replication identity, when replication is enabled.
    pub plan: Option<ReplicationPlan>,
}

fn resolve_local_address(
    configured: Option<IpAddr>,
    probe: &dyn AddressProbe,
) -> Result<IpAddr, ReplicationError> {
    if let Some(address) = configured {
        return Ok(address);
    }
    let detected = probe
        .detect()
        .map_err(|source| ReplicationError::LocalAddress { source })?;
    info!(target: REPLICATION_TARGET, address = %detected, "detected local replication address");
    Ok(IpAddr::V4(detected))
}

fn load_server_id(
    store: &IdentityStore,
    address: IpAddr,
    port: u16,
) -> Result<u32, ReplicationError> {
    let stored = store.get_or_create(SERVER_ID_FILE, || {
        derive_server_id(address, port).to_string()
    })?;
    match stored.value.parse::<u32>() {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(IdentityError::Invalid {
            path: store.path(SERVER_ID_FILE),
            value: stored.value,
        }
        .into()),
    }
}

fn load_group_name(
    store: &IdentityStore,
    configured: Option<&str>,
) -> Result<(String, bool), ReplicationError> {
    let stored = store.get_or_create(GROUP_NAME_FILE, || {
        configured.map_or_else(|| Uuid::new_v4().hyphenated().to_string(), ToOwned::to_owned)
    })?;
    if let Some(name) = configured
        && stored.value != name
    {
        return Err(ReplicationError::GroupNameMismatch {
            configured: name.to_owned(),
            persisted: stored.value,
            path: store.path(GROUP_NAME_FILE),
        });
    }
    let generated = stored.created && configured.is_none();
    Ok((stored.value, generated))
}

/// Resolves and persists the replication identity.
///
/// Returns `None` when replication is disabled.
pub fn plan_replication(
    config: &LauncherConfig,
    port: u16,
    probe: &dyn AddressProbe,
) -> Result<Option<ReplicationPlan>, ReplicationError> {
    let settings = config.replication();
    if !settings.mode.is_enabled() {
        return Ok(None);
    }

    let local_address = resolve_local_address(settings.local_address, probe)?;
    let local = PeerAddress::new(local_address.to_string(), port);
    let seeds: Vec<PeerAddress> = settings
        .seeds
        .iter()
        .filter(|seed| **seed != local)
        .cloned()
        .collect();
    if settings.mode == ReplicationMode::Join && seeds.is_empty() {
        return Err(ReplicationError::OnlySelfSeeded { local });
    }

    let store = IdentityStore::new(config.storage().data_dir.clone());
    let server_id = load_server_id(&store, local_address, port)?;
    let (group_name, group_name_created) =
        load_group_name(&store, settings.group_name.as_deref())?;

    let plan = ReplicationPlan {
        mode: settings.mode,
        server_id,
        group_name,
        group_name_created,
        local_address,
        port,
        seeds,
        debug: settings.debug,
    };
    info!(
        target: REPLICATION_TARGET,
        mode = %plan.mode,
        server_id = plan.server_id,
        group_name = %plan.group_name,
        generated = plan.group_name_created,
        local = %plan.local_endpoint(),
        seeds = plan.seeds.len(),
        "replication identity resolved"
    );
    Ok(Some(plan))
}

/// Renders the replication option file.
#[must_use]
pub fn render_option_file(plan: &ReplicationPlan, service_port: u16, tuning: Tuning) -> String {
    let seeds = plan
        .seeds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let mut lines = vec![
        "# Generated by mysql-ratls-launcher on every boot.".to_owned(),
        "[mysqld]".to_owned(),
        format!("server_id={}", plan.server_id),
        format!("report_host={}", plan.local_address),
        format!("report_port={service_port}"),
        "gtid_mode=ON".to_owned(),
        "enforce_gtid_consistency=ON".to_owned(),
        "event_scheduler=ON".to_owned(),
        "plugin_load_add=group_replication.so".to_owned(),
        format!("group_replication_group_name={}", plan.group_name),
        "group_replication_start_on_boot=OFF".to_owned(),
        "group_replication_bootstrap_group=OFF".to_owned(),
        format!("group_replication_local_address={}", plan.local_endpoint()),
        format!("group_replication_group_seeds={seeds}"),
        format!("group_replication_ip_allowlist={ALLOW_ALL_RANGES}"),
        "group_replication_ssl_mode=REQUIRED".to_owned(),
        "group_replication_recovery_use_ssl=ON".to_owned(),
        format!(
            "group_replication_member_expel_timeout={}",
            tuning.expel_timeout.as_secs()
        ),
        format!(
            "loose-group_replication_xcom_detection_window={}",
            tuning.detection_window.as_secs()
        ),
        format!(
            "loose-group_replication_xcom_dial_timeout={}",
            tuning.dial_timeout.as_secs()
        ),
    ];
    if plan.debug {
        lines.push("group_replication_communication_debug_options=GCS_DEBUG_ALL".to_owned());
        lines.push("log_error_verbosity=3".to_owned());
    }
    lines.push(String::new());
    lines.join("\n")
}

/// A one-shot event scheduled from the init file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredEvent {
    /// Event name inside the launcher schema.
    pub name: &'static str,
    /// Delay after server start.
    pub delay: Duration,
    /// Statement run by the event.
    pub body: String,
}

fn start_if_offline() -> String {
    "BEGIN IF NOT EXISTS (SELECT 1 FROM performance_schema.replication_group_members \
     WHERE MEMBER_ID = @@server_uuid AND MEMBER_STATE IN ('ONLINE', 'RECOVERING')) \
     THEN START GROUP_REPLICATION; END IF; END"
        .to_owned()
}

/// Events scheduled for `mode`, in firing order.
#[must_use]
pub fn deferred_events(mode: ReplicationMode) -> Vec<DeferredEvent> {
    match mode {
        ReplicationMode::Disabled => Vec::new(),
        ReplicationMode::Bootstrap => vec![
            DeferredEvent {
                name: "gr_enable_bootstrap",
                delay: Duration::from_secs(5),
                body: "SET GLOBAL group_replication_bootstrap_group = ON".to_owned(),
            },
            DeferredEvent {
                name: "gr_start",
                delay: Duration::from_secs(10),
                body: start_if_offline(),
            },
            DeferredEvent {
                name: "gr_disable_bootstrap",
                delay: Duration::from_secs(15),
                body: "SET GLOBAL group_replication_bootstrap_group = OFF".to_owned(),
            },
        ],
        ReplicationMode::Join => vec![DeferredEvent {
            name: "gr_start",
            delay: Duration::from_secs(10),
            body: start_if_offline(),
        }],
    }
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Renders the init SQL. Every statement is safe to run on each boot and
/// sits on a single line.
#[must_use]
pub fn render_init_sql(plan: Option<&ReplicationPlan>, attestation: &AttestationSettings) -> String {
    let mut lines = vec![
        "-- Generated by mysql-ratls-launcher on every boot.".to_owned(),
        // Seeded accounts must not become transactions other members lack.
        "SET SESSION sql_log_bin = 0;".to_owned(),
        "CREATE USER IF NOT EXISTS 'app'@'%' IDENTIFIED BY '' REQUIRE X509;".to_owned(),
        "GRANT ALL PRIVILEGES ON *.* TO 'app'@'%' WITH GRANT OPTION;".to_owned(),
        "CREATE USER IF NOT EXISTS 'reader'@'%' IDENTIFIED BY '' REQUIRE X509;".to_owned(),
        "GRANT SELECT ON *.* TO 'reader'@'%';".to_owned(),
    ];

    if let Some(plan) = plan {
        lines.extend([
            format!(
                "CREATE USER IF NOT EXISTS '{REPLICATION_USER}'@'%' IDENTIFIED BY '' REQUIRE X509;"
            ),
            format!(
                "GRANT REPLICATION SLAVE, BACKUP_ADMIN, GROUP_REPLICATION_STREAM, CONNECTION_ADMIN ON *.* TO '{REPLICATION_USER}'@'%';"
            ),
            format!(
                "CHANGE REPLICATION SOURCE TO SOURCE_USER='{REPLICATION_USER}', SOURCE_SSL=1, SOURCE_SSL_CERT={}, SOURCE_SSL_KEY={} FOR CHANNEL 'group_replication_recovery';",
                sql_literal(attestation.cert_path.as_str()),
                sql_literal(attestation.key_path.as_str()),
            ),
            format!("CREATE DATABASE IF NOT EXISTS {EVENT_SCHEMA};"),
        ]);
        for event in deferred_events(plan.mode) {
            lines.push(format!("DROP EVENT IF EXISTS {EVENT_SCHEMA}.{};", event.name));
            lines.push(format!(
                "CREATE EVENT {EVENT_SCHEMA}.{} ON SCHEDULE AT CURRENT_TIMESTAMP + INTERVAL {} SECOND ON COMPLETION NOT PRESERVE DO {};",
                event.name,
                event.delay.as_secs(),
                event.body,
            ));
        }
    }

    lines.push("FLUSH PRIVILEGES;".to_owned());
    lines.push("SET SESSION sql_log_bin = 1;".to_owned());
    lines.push(String::new());
    lines.join("\n")
}

fn write_file(path: Utf8PathBuf, contents: &str, mode: u32) -> Result<Utf8PathBuf, ReplicationError> {
    match atomic_write(&path, contents.as_bytes(), mode) {
        Ok(()) => Ok(path),
        Err(source) => Err(ReplicationError::Write { path, source }),
    }
}

fn publish_group_name(public_dir: &Utf8Path, group_name: &str) -> Result<(), StageError> {
    let path = public_dir.join(PUBLIC_GROUP_NAME_FILE);
    write_file(path, &format!("{group_name}\n"), PUBLIC_MODE)
        .map(|_| ())
        .map_err(|error| StageError::degraded(Stage::Replication, error.to_string()))
}

/// Resolves the replication identity and writes the server's generated
/// files.
pub fn prepare_server_files(
    config: &LauncherConfig,
    service_port: u16,
    replication_port: u16,
    probe: &dyn AddressProbe,
    reporter: &dyn StageReporter,
) -> Result<ServerFiles, LaunchError> {
    let plan = plan_replication(config, replication_port, probe)?;
    let storage = config.storage();

    let defaults_extra_file = plan
        .as_ref()
        .map(|plan| {
            write_file(
                storage.gr_config_dir.join(GR_CONFIG_FILE),
                &render_option_file(plan, service_port, Tuning::ATTESTED),
                PRIVATE_MODE,
            )
        })
        .transpose()?;
    let init_file = write_file(
        storage.gr_config_dir.join(INIT_SQL_FILE),
        &render_init_sql(plan.as_ref(), config.attestation()),
        PRIVATE_MODE,
    )?;

    if let Some(plan) = &plan {
        settle(
            publish_group_name(&storage.public_dir, &plan.group_name),
            || (),
            reporter,
        )?;
    }

    Ok(ServerFiles {
        defaults_extra_file,
        init_file,
        plan,
    })
}
