//! Stage sequencing from a validated configuration to the exec.

use std::io;
use std::sync::Arc;

use gr_ifaddrs::{AddressProbe, UdpRouteProbe};
use launcher_config::{LauncherConfig, ReplicationMode, TargetKind, env};

use crate::errors::{LaunchError, Stage};
use crate::launch::{ExecReplacer, HandoffInputs, ProcessReplacer, build_command, hand_off};
use crate::ports::{PortProbe, PortRequest, SocketPortProbe, allocate};
use crate::prepare::{DataDirectoryState, prepare_filesystem};
use crate::replication::{ServerFiles, prepare_server_files};
use crate::reporter::{StageReporter, StructuredStageReporter};
use crate::whitelist::{JsonRpcReaderFactory, ReaderFactory, resolve_whitelist};

/// Side-effecting services used by the pipeline.
pub struct Collaborators {
    /// Receives stage lifecycle events.
    pub reporter: Arc<dyn StageReporter>,
    /// Checks port availability.
    pub ports: Box<dyn PortProbe>,
    /// Detects the local address for group communication.
    pub address_probe: Box<dyn AddressProbe>,
    /// Connects to the whitelist contract.
    pub readers: Box<dyn ReaderFactory>,
    /// Replaces the launcher with the target.
    pub replacer: Box<dyn ProcessReplacer>,
}

impl Collaborators {
    /// Production services.
    #[must_use]
    pub fn system() -> Self {
        Self {
            reporter: Arc::new(StructuredStageReporter),
            ports: Box::new(SocketPortProbe),
            address_probe: Box::new(UdpRouteProbe),
            readers: Box::new(JsonRpcReaderFactory),
            replacer: Box::new(ExecReplacer),
        }
    }
}

/// Ports chosen for the server target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedPorts {
    /// Client connection port.
    pub service: u16,
    /// Group communication port.
    pub replication: u16,
}

pub(crate) fn run_stage<T>(
    stage: Stage,
    reporter: &dyn StageReporter,
    body: impl FnOnce() -> Result<T, LaunchError>,
) -> Result<T, LaunchError> {
    reporter.stage_starting(stage);
    let outcome = body();
    match &outcome {
        Ok(_) => reporter.stage_finished(stage),
        Err(error) => reporter.stage_failed(stage, error),
    }
    outcome
}

/// Allocates the service port, then the replication port, keeping them
/// distinct. An explicit replication port is reserved before the service
/// port is scanned; with replication disabled nothing is reserved.
pub fn allocate_ports(
    config: &LauncherConfig,
    probe: &dyn PortProbe,
) -> Result<AllocatedPorts, LaunchError> {
    let replication = config.replication();
    let enabled = replication.mode != ReplicationMode::Disabled;
    let reserved_for_replication: Vec<u16> = (enabled && replication.port_explicit)
        .then_some(replication.port)
        .into_iter()
        .collect();
    let service = allocate(
        PortRequest {
            port: config.service_port(),
            explicit: config.service_port_explicit(),
            setting: env::MYSQL_PORT,
        },
        probe,
        &reserved_for_replication,
    )?;
    let replication_port = if enabled {
        allocate(
            PortRequest {
                port: replication.port,
                explicit: replication.port_explicit,
                setting: env::MYSQL_GR_PORT,
            },
            probe,
            &[service],
        )?
    } else {
        replication.port
    };
    Ok(AllocatedPorts {
        service,
        replication: replication_port,
    })
}

fn write_plan_summary(
    stdout: &mut dyn io::Write,
    ports: Option<AllocatedPorts>,
    data_dir: Option<&DataDirectoryState>,
    files: Option<&ServerFiles>,
) -> io::Result<()> {
    if let Some(ports) = ports {
        writeln!(stdout, "service_port={}", ports.service)?;
    }
    if let Some(state) = data_dir {
        let label = match state {
            DataDirectoryState::Existing => "existing",
            DataDirectoryState::Initialised { .. } => "initialised",
        };
        writeln!(stdout, "data_dir={label}")?;
    }
    if let Some(plan) = files.and_then(|files| files.plan.as_ref()) {
        writeln!(stdout, "replication_mode={}", plan.mode)?;
        writeln!(stdout, "group_name={}", plan.group_name)?;
        writeln!(stdout, "server_id={}", plan.server_id)?;
        writeln!(stdout, "local_endpoint={}", plan.local_endpoint())?;
    }
    Ok(())
}

/// Runs every stage for a validated configuration and hands off to the
/// target.
///
/// Returns only in dry-run mode or on failure.
pub fn execute(
    config: &LauncherConfig,
    collaborators: &Collaborators,
    stdout: &mut dyn io::Write,
) -> Result<(), LaunchError> {
    let reporter = collaborators.reporter.as_ref();
    let server = config.target() == TargetKind::Server;

    let ports = if server {
        Some(run_stage(Stage::Ports, reporter, || {
            allocate_ports(config, collaborators.ports.as_ref())
        })?)
    } else {
        None
    };

    let data_dir = run_stage(Stage::Filesystem, reporter, || {
        prepare_filesystem(config, reporter)
    })?;

    let whitelist = run_stage(Stage::Whitelist, reporter, || {
        resolve_whitelist(
            config.attestation(),
            collaborators.readers.as_ref(),
            reporter,
        )
    })?;

    let server_files = ports
        .map(|allocated| {
            run_stage(Stage::Replication, reporter, || {
                prepare_server_files(
                    config,
                    allocated.service,
                    allocated.replication,
                    collaborators.address_probe.as_ref(),
                    reporter,
                )
            })
        })
        .transpose()?;

    run_stage(Stage::Handoff, reporter, || {
        let inputs = HandoffInputs {
            service_port: ports.map(|allocated| allocated.service),
            server_files,
            whitelist,
        };
        let command = build_command(config, &inputs, reporter)?;
        if config.dry_run() {
            write_plan_summary(
                stdout,
                ports,
                data_dir.as_ref(),
                inputs.server_files.as_ref(),
            )
            .map_err(|source| LaunchError::Output { source })?;
        }
        hand_off(
            &command,
            config.dry_run(),
            collaborators.replacer.as_ref(),
            stdout,
        )
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use launcher_config::EnvSnapshot;
    use rstest::rstest;

    use super::*;
    use crate::ports::MockPortProbe;

    fn config(pairs: &[(&str, &str)]) -> LauncherConfig {
        LauncherConfig::resolve(
            &[OsString::from("mysql-ratls-launcher")],
            &EnvSnapshot::from_pairs(pairs.iter().copied()),
        )
        .expect("resolve")
    }

    fn probe_with_busy(busy: &'static [u16]) -> MockPortProbe {
        let mut probe = MockPortProbe::new();
        probe
            .expect_is_available()
            .returning(move |port| !busy.contains(&port));
        probe
    }

    #[rstest]
    fn disabled_replication_only_allocates_the_service_port() {
        let mut probe = MockPortProbe::new();
        probe.expect_is_available().times(1).returning(|_| true);
        let ports = allocate_ports(&config(&[]), &probe).expect("ports");
        assert_eq!(ports.service, 3306);
        assert_eq!(ports.replication, 33061);
    }

    #[rstest]
    fn explicit_ports_are_used_as_given() {
        let config = config(&[
            ("MYSQL_GR_BOOTSTRAP", "true"),
            ("MYSQL_PORT", "40000"),
            ("MYSQL_GR_PORT", "40001"),
        ]);
        let ports = allocate_ports(&config, &probe_with_busy(&[])).expect("ports");
        assert_eq!(ports, AllocatedPorts {
            service: 40000,
            replication: 40001,
        });
    }

    #[rstest]
    fn default_service_port_skips_a_reserved_replication_port() {
        let config = config(&[("MYSQL_GR_BOOTSTRAP", "true"), ("MYSQL_GR_PORT", "3307")]);
        let ports = allocate_ports(&config, &probe_with_busy(&[3306])).expect("ports");
        assert_eq!(ports.service, 3308);
        assert_eq!(ports.replication, 3307);
    }

    #[rstest]
    fn disabled_replication_does_not_reserve_its_port() {
        let config = config(&[("MYSQL_PORT", "3306"), ("MYSQL_GR_PORT", "3306")]);
        let ports = allocate_ports(&config, &probe_with_busy(&[])).expect("ports");
        assert_eq!(ports.service, 3306);
    }

    #[rstest]
    fn occupied_explicit_port_is_fatal() {
        let config = config(&[("MYSQL_PORT", "3310")]);
        let error = allocate_ports(&config, &probe_with_busy(&[3310])).expect_err("occupied");
        assert!(error.to_string().contains("MYSQL_PORT"));
    }
}
