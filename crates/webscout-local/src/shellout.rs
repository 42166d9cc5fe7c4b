//! Locating the worker executable and staging its instruction file.

use std::io::Write;
use std::path::{Path, PathBuf};
use webscout_core::{Error, Result};

pub fn which(bin: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let cand = dir.join(bin);
        if cand.is_file() {
            return Some(cand);
        }
        if cfg!(windows) {
            let cand = dir.join(format!("{bin}.exe"));
            if cand.is_file() {
                return Some(cand);
            }
        }
    }
    None
}

pub fn has(bin: &str) -> bool {
    resolve_bin(bin).is_some()
}

/// `bin` as given when it names a path, otherwise looked up on `PATH`.
pub fn resolve_bin(bin: &str) -> Option<PathBuf> {
    let p = Path::new(bin);
    if p.components().count() > 1 || p.is_absolute() {
        return p.is_file().then(|| p.to_path_buf());
    }
    which(bin)
}

/// Fresh private directory for one run; removed when the handle drops.
pub fn run_temp_dir() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("webscout-")
        .tempdir()
        .map_err(|e| Error::Io(format!("creating temp dir: {e}")))
}

/// Write `contents` to `dir/name`, readable by the owner only.
pub fn write_private_file(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut f = opts
        .open(&path)
        .map_err(|e| Error::Io(format!("writing {}: {e}", path.display())))?;
    f.write_all(contents.as_bytes())
        .and_then(|_| f.flush())
        .map_err(|e| Error::Io(format!("writing {}: {e}", path.display())))?;
    Ok(path)
}
