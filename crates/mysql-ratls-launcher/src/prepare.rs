//! Secure filesystem preparation.
//!
//! Creates the directories the target needs and, on first boot, fills the
//! data directory from the build-time template. The template was initialised
//! once for every image, so files that identify a single instance (the
//! server UUID, generated TLS material and replication identity) are removed
//! after the copy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use launcher_config::{GROUP_NAME_FILE, LauncherConfig, SERVER_ID_FILE, TargetKind};
use strum::Display;
use thiserror::Error;
use tracing::info;
use walkdir::WalkDir;

use crate::errors::{LaunchError, Stage, StageError, settle};
use crate::reporter::StageReporter;

#[cfg(unix)]
use std::os::unix::fs::DirBuilderExt;

const PREPARE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::prepare");

/// Engine system tablespace; its presence marks an initialised data
/// directory.
pub const INITIALISED_MARKER: &str = "mysql.ibd";

/// Per-instance files removed from a freshly copied data directory, in
/// addition to every `*.pem`.
pub const SCRUBBED_FILES: [&str; 3] = ["auto.cnf", SERVER_ID_FILE, GROUP_NAME_FILE];

/// Directories created before the data directory is initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DirectoryRole {
    /// Parent of the certificate path.
    #[strum(serialize = "certificate")]
    Certificate,
    /// Parent of the private key path.
    #[strum(serialize = "private key")]
    Key,
    /// Live data directory.
    #[strum(serialize = "data")]
    Data,
    /// Generated replication configuration.
    #[strum(serialize = "replication configuration")]
    ReplicationConfig,
    /// Server logs.
    #[strum(serialize = "log")]
    Log,
    /// Operator-visible identity copies.
    #[strum(serialize = "public")]
    Public,
}

impl DirectoryRole {
    /// Whether the boot path cannot continue without this directory.
    #[must_use]
    pub const fn is_required(self) -> bool {
        matches!(self, Self::Data | Self::ReplicationConfig)
    }

    /// Mode used when the directory has to be created.
    #[must_use]
    pub const fn mode(self) -> u32 {
        match self {
            Self::Key | Self::Data | Self::ReplicationConfig => 0o700,
            Self::Certificate | Self::Log | Self::Public => 0o755,
        }
    }
}

/// Errors raised while preparing the filesystem.
#[derive(Debug, Error)]
pub enum PrepareError {
    /// A directory could not be created.
    #[error("failed to create {role} directory '{path}': {source}")]
    Directory {
        /// What the directory is for.
        role: DirectoryRole,
        /// Directory path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The template directory does not exist.
    #[error("data directory template '{path}' does not exist")]
    MissingTemplate {
        /// Template path.
        path: Utf8PathBuf,
    },
    /// The template exists but was never initialised.
    #[error("data directory template '{path}' has no {INITIALISED_MARKER}")]
    InvalidTemplate {
        /// Template path.
        path: Utf8PathBuf,
    },
    /// Walking the template failed.
    #[error("failed to read the data directory template: {source}")]
    Walk {
        /// Underlying walk error.
        #[source]
        source: walkdir::Error,
    },
    /// Copying one template entry failed.
    #[error("failed to copy template entry to '{path}': {source}")]
    Copy {
        /// Destination path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Removing an instance identity file failed.
    #[error("failed to remove instance file '{path}': {source}")]
    Scrub {
        /// File that could not be removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// What [`initialise_data_dir`] found or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataDirectoryState {
    /// The data directory was already initialised; the template was not read.
    Existing,
    /// The template was copied on this boot.
    Initialised {
        /// Number of files and links copied.
        copied: usize,
        /// Names of the instance files removed afterwards, sorted.
        scrubbed: Vec<String>,
    },
}

/// Returns true when `data_dir` holds the engine system tablespace.
#[must_use]
pub fn is_initialised(data_dir: &Utf8Path) -> bool {
    data_dir.join(INITIALISED_MARKER).is_file()
}

/// Creates `path` and its parents. Only newly created directories get `mode`.
pub fn create_directory(path: &Utf8Path, mode: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path)
}

fn directories(config: &LauncherConfig) -> Vec<(DirectoryRole, Utf8PathBuf)> {
    let attestation = config.attestation();
    let mut wanted: Vec<(DirectoryRole, Utf8PathBuf)> = [
        (DirectoryRole::Certificate, attestation.cert_path.parent()),
        (DirectoryRole::Key, attestation.key_path.parent()),
    ]
    .into_iter()
    .filter_map(|(role, parent)| Some((role, parent?.to_owned())))
    .collect();

    if config.target() == TargetKind::Server {
        let storage = config.storage();
        wanted.extend([
            (DirectoryRole::Data, storage.data_dir.clone()),
            (DirectoryRole::ReplicationConfig, storage.gr_config_dir.clone()),
            (DirectoryRole::Log, storage.log_dir.clone()),
            (DirectoryRole::Public, storage.public_dir.clone()),
        ]);
    }
    wanted
}

/// Creates every directory the target needs and initialises the data
/// directory for the server target.
///
/// Returns `None` for targets without a data directory.
pub fn prepare_filesystem(
    config: &LauncherConfig,
    reporter: &dyn StageReporter,
) -> Result<Option<DataDirectoryState>, LaunchError> {
    for (role, path) in directories(config) {
        let outcome = create_directory(&path, role.mode()).map_err(|source| {
            let error = PrepareError::Directory { role, path, source };
            if role.is_required() {
                StageError::fatal(error)
            } else {
                StageError::degraded(Stage::Filesystem, error.to_string())
            }
        });
        settle(outcome, || (), reporter)?;
    }

    if config.target() == TargetKind::Client {
        return Ok(None);
    }
    let storage = config.storage();
    initialise_data_dir(&storage.template_dir, &storage.data_dir)
        .map(Some)
        .map_err(LaunchError::from)
}

/// Copies `template` into `data_dir` unless the data directory is already
/// initialised, then removes per-instance files from the copy.
pub fn initialise_data_dir(
    template: &Utf8Path,
    data_dir: &Utf8Path,
) -> Result<DataDirectoryState, PrepareError> {
    if is_initialised(data_dir) {
        info!(target: PREPARE_TARGET, data_dir = %data_dir, "data directory already initialised");
        return Ok(DataDirectoryState::Existing);
    }
    if !template.is_dir() {
        return Err(PrepareError::MissingTemplate {
            path: template.to_owned(),
        });
    }
    if !is_initialised(template) {
        return Err(PrepareError::InvalidTemplate {
            path: template.to_owned(),
        });
    }

    let copied = copy_tree(template.as_std_path(), data_dir.as_std_path())?;
    let scrubbed = scrub_instance_files(data_dir.as_std_path())?;
    info!(
        target: PREPARE_TARGET,
        template = %template,
        data_dir = %data_dir,
        copied,
        scrubbed = scrubbed.len(),
        "data directory initialised from template"
    );
    Ok(DataDirectoryState::Initialised { copied, scrubbed })
}

fn copy_failed(path: &Path) -> impl FnOnce(io::Error) -> PrepareError {
    let path = path.to_path_buf();
    move |source| PrepareError::Copy { path, source }
}

/// Copies the tree below `source` into `destination`, preserving file modes
/// and symlink targets. Directory modes are applied last so read-only
/// directories can still be filled.
fn copy_tree(source: &Path, destination: &Path) -> Result<usize, PrepareError> {
    let mut directories: Vec<(PathBuf, fs::Permissions)> = Vec::new();
    let mut copied = 0_usize;
    fs::create_dir_all(destination).map_err(copy_failed(destination))?;

    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|walk_error| PrepareError::Walk { source: walk_error })?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(copy_failed(&target))?;
            let metadata = entry
                .metadata()
                .map_err(|walk_error| PrepareError::Walk { source: walk_error })?;
            directories.push((target, metadata.permissions()));
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            copied += 1;
        } else {
            fs::copy(entry.path(), &target).map_err(copy_failed(&target))?;
            copied += 1;
        }
    }

    for (path, permissions) in directories.into_iter().rev() {
        fs::set_permissions(&path, permissions).map_err(copy_failed(&path))?;
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), PrepareError> {
    let points_to = fs::read_link(link).map_err(copy_failed(target))?;
    if fs::symlink_metadata(target).is_ok() {
        fs::remove_file(target).map_err(copy_failed(target))?;
    }
    std::os::unix::fs::symlink(points_to, target).map_err(copy_failed(target))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), PrepareError> {
    fs::copy(link, target)
        .map(|_| ())
        .map_err(copy_failed(target))
}

fn is_instance_file(name: &str) -> bool {
    SCRUBBED_FILES.contains(&name)
        || Path::new(name)
            .extension()
            .is_some_and(|extension| extension == "pem")
}

fn scrub_failed(path: &Path) -> impl FnOnce(io::Error) -> PrepareError {
    let path = path.to_path_buf();
    move |source| PrepareError::Scrub { path, source }
}

fn scrub_instance_files(data_dir: &Path) -> Result<Vec<String>, PrepareError> {
    let mut removed = Vec::new();
    for entry in fs::read_dir(data_dir).map_err(scrub_failed(data_dir))? {
        let entry = entry.map_err(scrub_failed(data_dir))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let is_dir = entry.file_type().is_ok_and(|file_type| file_type.is_dir());
        if is_dir || !is_instance_file(&name) {
            continue;
        }
        let path = entry.path();
        fs::remove_file(&path).map_err(scrub_failed(&path))?;
        removed.push(name);
    }
    removed.sort();
    Ok(removed)
}
