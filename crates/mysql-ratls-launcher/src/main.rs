//! Enclave entrypoint: prepares the attested environment and execs the
//! configured target.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

use launcher_config::EnvSnapshot;

fn main() -> ExitCode {
    let env = EnvSnapshot::from_process();
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    mysql_ratls_launcher::run(std::env::args_os(), &env, &mut stdout, &mut stderr)
}
