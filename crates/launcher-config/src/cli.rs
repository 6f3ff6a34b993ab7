//! Command-line surface of the launcher.
//!
//! Launcher flags mirror the environment variables one to one. Everything the
//! launcher does not recognise is handed to the target verbatim, so the
//! argument vector is split before `clap` sees it: known launcher flags (and
//! their values) go to the parser, the rest is kept in order as pass-through.
//! Server options the launcher sets itself are later removed from the
//! server's pass-through by [`remove_managed_server_options`].

use std::ffi::{OsStr, OsString};
use std::iter::Peekable;
use std::mem;

use clap::Parser;

use crate::env;

/// Flags parsed by the launcher itself.
#[derive(Parser, Debug, Default, Clone, PartialEq, Eq)]
#[command(name = "mysql-ratls-launcher", disable_help_flag = true, disable_version_flag = true)]
pub struct LauncherArgs {
    /// Contract holding the remote SGX configuration.
    #[arg(long)]
    pub contract_address: Option<String>,
    /// JSON-RPC endpoint for the contract call.
    #[arg(long)]
    pub rpc_url: Option<String>,
    /// Certificate path for the attestation library.
    #[arg(long)]
    pub cert_path: Option<String>,
    /// Server log directory.
    #[arg(long)]
    pub log_dir: Option<String>,
    /// Directory for operator-visible identity copies.
    #[arg(long)]
    pub public_dir: Option<String>,
    /// Certificate key algorithm.
    #[arg(long)]
    pub cert_algorithm: Option<String>,
    /// Peer verification toggle.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub enable_verify: Option<String>,
    /// Mutual authentication toggle.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub require_peer_cert: Option<String>,
    /// Replication group name (UUID).
    #[arg(long)]
    pub gr_group_name: Option<String>,
    /// Comma-separated replication seeds.
    #[arg(long)]
    pub gr_seeds: Option<String>,
    /// Local replication address override.
    #[arg(long)]
    pub gr_local_address: Option<String>,
    /// Bootstrap a new replication group.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub gr_bootstrap: Option<String>,
    /// Verbose replication diagnostics.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub gr_debug: Option<String>,
    /// Client-facing server port.
    #[arg(long)]
    pub port: Option<String>,
    /// Group communication port.
    #[arg(long)]
    pub gr_port: Option<String>,
    /// Skip the final exec and print the assembled command.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub dry_run: Option<String>,
    /// Launch target (`server` or `client`).
    #[arg(long)]
    pub target: Option<String>,
    /// Launcher log filter.
    #[arg(long)]
    pub log_filter: Option<String>,
    /// Launcher log format (`json` or `compact`).
    #[arg(long)]
    pub log_format: Option<String>,
}

/// How a flag consumes values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    /// `--flag value` or `--flag=value`.
    Value,
    /// `--flag` or `--flag=value`; never consumes the next token.
    Switch,
}

/// Launcher flags recognised by [`LauncherArgs`].
///
/// MAINTENANCE: keep in sync with the fields above.
const LAUNCHER_FLAGS: &[(&str, Arity)] = &[
    ("--contract-address", Arity::Value),
    ("--rpc-url", Arity::Value),
    ("--cert-path", Arity::Value),
    ("--log-dir", Arity::Value),
    ("--public-dir", Arity::Value),
    ("--cert-algorithm", Arity::Value),
    ("--enable-verify", Arity::Switch),
    ("--require-peer-cert", Arity::Switch),
    ("--gr-group-name", Arity::Value),
    ("--gr-seeds", Arity::Value),
    ("--gr-local-address", Arity::Value),
    ("--gr-bootstrap", Arity::Switch),
    ("--gr-debug", Arity::Switch),
    ("--port", Arity::Value),
    ("--gr-port", Arity::Value),
    ("--dry-run", Arity::Switch),
    ("--target", Arity::Value),
    ("--log-filter", Arity::Value),
    ("--log-format", Arity::Value),
];

/// Launcher settings that only the signed manifest environment may set.
const ENVIRONMENT_ONLY_FLAGS: &[(&str, &str)] = &[
    ("--whitelist-config", env::RATLS_WHITELIST_CONFIG),
    ("--key-path", env::RATLS_KEY_PATH),
    ("--data-dir", env::MYSQL_DATA_DIR),
    ("--secure-root", env::RATLS_SECURE_ROOT),
    ("--template-dir", env::MYSQL_TEMPLATE_DIR),
    ("--gr-config-dir", env::MYSQL_GR_CONFIG_DIR),
    ("--target-binary", env::RATLS_TARGET_BINARY),
    ("--preload-path", env::RATLS_PRELOAD_PATH),
];

/// Server options the launcher manages; callers may not override them.
///
/// Names are canonical: no leading dashes and `-` between words.
const MANAGED_SERVER_OPTIONS: &[(&str, Arity)] = &[
    ("datadir", Arity::Value),
    ("ssl-cert", Arity::Value),
    ("ssl-key", Arity::Value),
    ("ssl-ca", Arity::Value),
    ("init-file", Arity::Value),
    ("defaults-extra-file", Arity::Value),
    ("log-error", Arity::Value),
    ("port", Arity::Value),
    ("require-secure-transport", Arity::Switch),
    ("ssl", Arity::Switch),
];

/// Modifiers the server strips from a long option name before lookup.
const OPTION_MODIFIERS: &[&str] = &["loose-", "maximum-", "skip-", "disable-", "enable-"];

/// Short server options for managed settings (`-h` datadir, `-P` port).
const MANAGED_SHORT_OPTIONS: &[char] = &['h', 'P'];

/// Short server options that take the rest of their token as the value.
const VALUED_SHORT_OPTIONS: &[char] = &['#', 'b', 'C', 'L', 'T', 'u', 'W'];

/// Why an argument was removed from the pass-through list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DroppedArgument {
    /// A launcher setting that is environment-only.
    EnvironmentOnly {
        /// Flag as supplied.
        flag: String,
        /// Variable that alone may carry the setting.
        variable: &'static str,
    },
    /// A server option the launcher always sets itself.
    ManagedByLauncher {
        /// Flag as supplied.
        flag: String,
    },
}

/// Result of splitting the raw argument vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentSplit {
    /// Program name followed by launcher flags, ready for `clap`.
    pub launcher_arguments: Vec<OsString>,
    /// Arguments forwarded to the target, in their original order.
    pub passthrough: Vec<OsString>,
    /// Arguments removed for security reasons.
    pub dropped: Vec<DroppedArgument>,
}

#[derive(Debug, Clone, Copy)]
enum FlagAction {
    Launcher { needs_value: bool },
    Drop {
        needs_value: bool,
        variable: &'static str,
    },
    Forward,
}

fn classify(argument: &OsStr, literal: bool) -> FlagAction {
    let text = argument.to_string_lossy();
    if literal || !text.starts_with("--") {
        return FlagAction::Forward;
    }
    let mut parts = text.splitn(2, '=');
    let flag = parts.next().unwrap_or_default();
    let has_inline_value = parts.next().is_some();

    if let Some((_, arity)) = LAUNCHER_FLAGS.iter().find(|(name, _)| *name == flag) {
        return FlagAction::Launcher {
            needs_value: *arity == Arity::Value && !has_inline_value,
        };
    }
    ENVIRONMENT_ONLY_FLAGS
        .iter()
        .find(|(name, _)| *name == flag)
        .map_or(FlagAction::Forward, |(_, variable)| FlagAction::Drop {
            needs_value: !has_inline_value,
            variable: *variable,
        })
}

fn flag_name(argument: &OsStr) -> String {
    let text = argument.to_string_lossy();
    text.split('=').next().unwrap_or_default().to_owned()
}

fn value_follows<'a>(tokens: &mut Peekable<impl Iterator<Item = &'a OsString>>) -> bool {
    tokens
        .peek()
        .is_some_and(|next| !next.to_string_lossy().starts_with('-'))
}

/// Splits `args` (including the program name) into launcher flags and
/// pass-through arguments.
///
/// Tokens after a literal `--` are never treated as launcher flags.
/// Environment-only launcher settings are dropped together with their value.
#[must_use]
pub fn split_launcher_arguments(args: &[OsString]) -> ArgumentSplit {
    let mut split = ArgumentSplit::default();
    let mut tokens = args.iter().peekable();
    let Some(program) = tokens.next() else {
        return split;
    };
    split.launcher_arguments.push(program.clone());

    let mut literal = false;
    while let Some(argument) = tokens.next() {
        if !literal && argument.as_os_str() == OsStr::new("--") {
            literal = true;
            continue;
        }

        match classify(argument, literal) {
            FlagAction::Launcher { needs_value } => {
                split.launcher_arguments.push(argument.clone());
                if needs_value && let Some(value) = tokens.next() {
                    split.launcher_arguments.push(value.clone());
                }
            }
            FlagAction::Drop {
                needs_value,
                variable,
            } => {
                split.dropped.push(DroppedArgument::EnvironmentOnly {
                    flag: flag_name(argument),
                    variable,
                });
                if needs_value && value_follows(&mut tokens) {
                    tokens.next();
                }
            }
            FlagAction::Forward => split.passthrough.push(argument.clone()),
        }
    }

    split
}

/// Canonical form of a long server option: leading dashes removed, `_`
/// read as `-`, and any modifier prefixes stripped.
fn canonical_option(flag: &str) -> String {
    let mut name = flag.trim_start_matches('-').replace('_', "-");
    while let Some(rest) = OPTION_MODIFIERS
        .iter()
        .find_map(|modifier| name.strip_prefix(modifier))
    {
        name = rest.to_owned();
    }
    name
}

/// Matches a long option name against the managed set.
///
/// The server accepts any unambiguous prefix of an option name and rejects
/// ambiguous ones, so every prefix of a managed name counts as managed.
fn managed_long_option(flag: &str) -> Option<Arity> {
    let name = canonical_option(flag);
    if name.is_empty() {
        return None;
    }
    if let Some((_, arity)) = MANAGED_SERVER_OPTIONS
        .iter()
        .find(|(option, _)| *option == name)
    {
        return Some(*arity);
    }
    MANAGED_SERVER_OPTIONS
        .iter()
        .filter(|(option, _)| option.starts_with(name.as_str()))
        .map(|(_, arity)| *arity)
        .reduce(|left, right| if left == Arity::Value { left } else { right })
}

/// Finds a managed short option in a bundle such as `-h/path` or `-ah`.
///
/// Returns the letter and whether its value is the next token.
fn managed_short_option(text: &str) -> Option<(char, bool)> {
    let mut letters = text.strip_prefix('-')?.chars();
    while let Some(letter) = letters.next() {
        if MANAGED_SHORT_OPTIONS.contains(&letter) {
            return Some((letter, letters.as_str().is_empty()));
        }
        if VALUED_SHORT_OPTIONS.contains(&letter) {
            return None;
        }
    }
    None
}

/// Returns the reported flag and whether the next token is its value.
fn managed_server_option(argument: &OsStr) -> Option<(String, bool)> {
    let text = argument.to_string_lossy();
    let Some(long) = text.strip_prefix("--") else {
        return managed_short_option(&text)
            .map(|(letter, value_next)| (format!("-{letter}"), value_next));
    };
    let (name, has_inline_value) = long
        .split_once('=')
        .map_or((long, false), |(name, _)| (name, true));
    let arity = managed_long_option(name)?;
    Some((format!("--{name}"), arity == Arity::Value && !has_inline_value))
}

/// Removes the server options the launcher sets itself from `passthrough`.
///
/// Every spelling the server accepts is matched: `_` for `-`, the `loose-`,
/// `maximum-`, `skip-`, `disable-` and `enable-` modifiers, abbreviations,
/// and the short `-h` and `-P` forms. A removed option takes its value with
/// it when the value is the next token.
pub fn remove_managed_server_options(passthrough: &mut Vec<OsString>) -> Vec<DroppedArgument> {
    let arguments = mem::take(passthrough);
    let mut dropped = Vec::new();
    let mut tokens = arguments.iter().peekable();
    while let Some(argument) = tokens.next() {
        let Some((flag, needs_value)) = managed_server_option(argument) else {
            passthrough.push(argument.clone());
            continue;
        };
        dropped.push(DroppedArgument::ManagedByLauncher { flag });
        if needs_value && value_follows(&mut tokens) {
            tokens.next();
        }
    }
    dropped
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn os(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    #[test]
    fn launcher_flags_are_separated_from_passthrough() {
        let split = split_launcher_arguments(&os(&[
            "launcher",
            "--gr-seeds",
            "10.0.0.2:33061",
            "--max-connections=500",
            "--dry-run",
            "--skip-name-resolve",
        ]));
        assert_eq!(
            split.launcher_arguments,
            os(&["launcher", "--gr-seeds", "10.0.0.2:33061", "--dry-run"])
        );
        assert_eq!(
            split.passthrough,
            os(&["--max-connections=500", "--skip-name-resolve"])
        );
        assert!(split.dropped.is_empty());
    }

    #[test]
    fn switches_do_not_swallow_the_next_token() {
        let split = split_launcher_arguments(&os(&["launcher", "--gr-bootstrap", "extra"]));
        assert_eq!(split.launcher_arguments, os(&["launcher", "--gr-bootstrap"]));
        assert_eq!(split.passthrough, os(&["extra"]));
    }

    #[test]
    fn environment_only_flags_are_dropped_with_their_value() {
        let split = split_launcher_arguments(&os(&[
            "launcher",
            "--key-path",
            "/tmp/stolen.pem",
            "--data-dir=/tmp/elsewhere",
            "--verbose",
        ]));
        assert_eq!(split.passthrough, os(&["--verbose"]));
        assert_eq!(
            split.dropped,
            vec![
                DroppedArgument::EnvironmentOnly {
                    flag: "--key-path".to_owned(),
                    variable: env::RATLS_KEY_PATH,
                },
                DroppedArgument::EnvironmentOnly {
                    flag: "--data-dir".to_owned(),
                    variable: env::MYSQL_DATA_DIR,
                },
            ]
        );
    }

    #[test]
    fn separator_stops_launcher_flag_parsing() {
        let split = split_launcher_arguments(&os(&[
            "launcher",
            "--",
            "--port",
            "3307",
            "--key-path=/tmp/x",
        ]));
        assert_eq!(split.launcher_arguments, os(&["launcher"]));
        assert_eq!(
            split.passthrough,
            os(&["--port", "3307", "--key-path=/tmp/x"])
        );
        assert!(split.dropped.is_empty());
    }

    fn managed(flag: &str) -> DroppedArgument {
        DroppedArgument::ManagedByLauncher {
            flag: flag.to_owned(),
        }
    }

    #[rstest]
    #[case::exact("--datadir=/tmp/evil", "--datadir")]
    #[case::underscore("--ssl_key=/tmp/evil.pem", "--ssl_key")]
    #[case::underscore_init_file("--init_file=/tmp/evil.sql", "--init_file")]
    #[case::loose_prefix("--loose-datadir=/tmp/evil", "--loose-datadir")]
    #[case::loose_underscore("--loose_ssl_cert=/tmp/evil.pem", "--loose_ssl_cert")]
    #[case::maximum_prefix("--maximum-port=1", "--maximum-port")]
    #[case::abbreviation("--ssl-ke=/tmp/evil.pem", "--ssl-ke")]
    #[case::abbreviated_init_file("--init-f=/tmp/evil.sql", "--init-f")]
    #[case::transport_off("--require-secure-transport=OFF", "--require-secure-transport")]
    #[case::transport_skip("--skip-require-secure-transport", "--skip-require-secure-transport")]
    #[case::transport_abbreviated("--require=0", "--require")]
    #[case::tls_disabled("--skip-ssl", "--skip-ssl")]
    #[case::port("--port=3307", "--port")]
    #[case::short_datadir_attached("-h/tmp/evil", "-h")]
    #[case::short_datadir_bundled("-ah/tmp/evil", "-h")]
    #[case::short_port_attached("-P3307", "-P")]
    fn server_option_spellings_are_removed(#[case] argument: &str, #[case] flag: &str) {
        let mut passthrough = os(&[argument, "--max-connections=50"]);
        let dropped = remove_managed_server_options(&mut passthrough);
        assert_eq!(passthrough, os(&["--max-connections=50"]));
        assert_eq!(dropped, vec![managed(flag)]);
    }

    #[rstest]
    #[case::short_datadir(&["-h", "/tmp/evil", "--skip-name-resolve"], "-h")]
    #[case::short_port(&["-P", "3307", "--skip-name-resolve"], "-P")]
    #[case::long_port(&["--port", "3307", "--skip-name-resolve"], "--port")]
    #[case::underscore_key(&["--ssl_key", "/tmp/evil.pem", "--skip-name-resolve"], "--ssl_key")]
    fn separate_values_are_removed_with_their_option(
        #[case] arguments: &[&str],
        #[case] flag: &str,
    ) {
        let mut passthrough = os(arguments);
        let dropped = remove_managed_server_options(&mut passthrough);
        assert_eq!(passthrough, os(&["--skip-name-resolve"]));
        assert_eq!(dropped, vec![managed(flag)]);
    }

    #[rstest]
    #[case::unrelated_ssl_option("--ssl-cipher=ECDHE-RSA-AES256-GCM-SHA384")]
    #[case::longer_name("--port-open-timeout=10")]
    #[case::modifier_on_other_option("--skip-name-resolve")]
    #[case::log_verbosity("--log-error-verbosity=3")]
    #[case::valued_short_option("-uphil")]
    #[case::plain_value("/var/run/mysqld.sock")]
    fn other_server_options_are_kept(#[case] argument: &str) {
        let mut passthrough = os(&[argument]);
        let dropped = remove_managed_server_options(&mut passthrough);
        assert_eq!(passthrough, os(&[argument]));
        assert!(dropped.is_empty());
    }

    #[test]
    fn every_override_after_the_separator_is_removed() {
        let split = split_launcher_arguments(&os(&[
            "launcher",
            "--",
            "--ssl_key=/tmp/evil.pem",
            "--loose-datadir=/tmp/evil",
            "-h/tmp/evil",
            "--init_file=/tmp/evil.sql",
            "--ssl-ke=/tmp/evil2.pem",
            "--require-secure-transport=OFF",
            "--port",
            "3307",
        ]));
        let mut passthrough = split.passthrough;
        let dropped = remove_managed_server_options(&mut passthrough);
        assert!(passthrough.is_empty(), "kept: {passthrough:?}");
        assert_eq!(dropped.len(), 7);
    }

    #[test]
    fn parses_launcher_arguments_with_clap() {
        let split = split_launcher_arguments(&os(&[
            "launcher",
            "--gr-port=33071",
            "--gr-bootstrap",
            "--target",
            "client",
        ]));
        let parsed = LauncherArgs::try_parse_from(split.launcher_arguments)
            .expect("launcher arguments should parse");
        assert_eq!(parsed.gr_port.as_deref(), Some("33071"));
        assert_eq!(parsed.gr_bootstrap.as_deref(), Some("true"));
        assert_eq!(parsed.target.as_deref(), Some("client"));
    }
}
