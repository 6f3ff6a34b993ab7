use std::io::{self, Write};

use camino::Utf8Path;
use tempfile::Builder;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Permissions for secrets and identity files.
pub(crate) const PRIVATE_MODE: u32 = 0o600;

/// Permissions for operator-visible files.
pub(crate) const PUBLIC_MODE: u32 = 0o644;

/// Writes `contents` to `path` through a synced temporary file in the same
/// directory, so readers never observe a partial payload.
pub(crate) fn atomic_write(path: &Utf8Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "target path did not have a parent directory",
        )
    })?;

    let mut builder = Builder::new();
    builder.prefix(path.file_name().unwrap_or("launcher"));
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        builder.permissions(Permissions::from_mode(mode));
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}
