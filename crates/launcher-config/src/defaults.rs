//! Built-in defaults used when neither the manifest environment nor the
//! command line sets a value.

use camino::{Utf8Path, Utf8PathBuf};

use crate::TargetKind;

/// Default log filter expression used by the launcher.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Mount point of the encrypted partition holding secrets and data.
pub const DEFAULT_SECURE_ROOT: &str = "/app/wallet";

/// Default server certificate location (public material).
pub const DEFAULT_SERVER_CERT_PATH: &str = "/var/lib/mysql-ssl/server-cert.pem";

/// Server private key location relative to the secure root.
pub const SERVER_KEY_RELATIVE: &str = "mysql-keys/server-key.pem";

/// Default client certificate location.
pub const DEFAULT_CLIENT_CERT_PATH: &str = "/var/lib/mysql-client-ssl/client-cert.pem";

/// Client private key location relative to the secure root.
pub const CLIENT_KEY_RELATIVE: &str = "mysql-client-keys/client-key.pem";

/// Live data directory relative to the secure root.
pub const DATA_DIR_RELATIVE: &str = "mysql-data";

/// Build-time initialised data directory copied on first boot.
pub const DEFAULT_TEMPLATE_DIR: &str = "/opt/mysql-template/data";

/// Replication configuration directory relative to the secure root.
pub const GR_CONFIG_RELATIVE: &str = "mysql-gr";

/// Server log directory, kept outside the encrypted partition for visibility.
pub const DEFAULT_LOG_DIR: &str = "/var/log/mysql";

/// Directory for operator-visible, non-secret copies of identity data.
pub const DEFAULT_PUBLIC_DIR: &str = "/var/lib/mysql-public";

/// Certificate key algorithm requested from the attestation library.
pub const DEFAULT_CERT_ALGORITHM: &str = "secp256k1";

/// Default client-facing server port.
pub const DEFAULT_SERVICE_PORT: u16 = 3306;

/// Default group communication port.
pub const DEFAULT_REPLICATION_PORT: u16 = 33061;

/// Default log filter expression used by the launcher.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the launcher.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::default()
}

/// Default certificate path for the given target.
#[must_use]
pub fn default_cert_path(target: TargetKind) -> Utf8PathBuf {
    match target {
        TargetKind::Server => Utf8PathBuf::from(DEFAULT_SERVER_CERT_PATH),
        TargetKind::Client => Utf8PathBuf::from(DEFAULT_CLIENT_CERT_PATH),
    }
}

/// Default private key path for the given target under `secure_root`.
#[must_use]
pub fn default_key_path(target: TargetKind, secure_root: &Utf8Path) -> Utf8PathBuf {
    match target {
        TargetKind::Server => secure_root.join(SERVER_KEY_RELATIVE),
        TargetKind::Client => secure_root.join(CLIENT_KEY_RELATIVE),
    }
}

/// Default live data directory under `secure_root`.
#[must_use]
pub fn default_data_dir(secure_root: &Utf8Path) -> Utf8PathBuf {
    secure_root.join(DATA_DIR_RELATIVE)
}

/// Default replication configuration directory under `secure_root`.
#[must_use]
pub fn default_gr_config_dir(secure_root: &Utf8Path) -> Utf8PathBuf {
    secure_root.join(GR_CONFIG_RELATIVE)
}
