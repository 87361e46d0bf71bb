//! Path containment checks used to decide whether an `open()` call should be
//! redirected through HVAC instead of passed to the real libc call.
//!
//! Mirrors `hvac_track_file`'s decision tree: reject the rendezvous file
//! itself, reject any write-capable open, then require the file's
//! canonical parent directory to sit under `HVAC_DATA_DIR` (if configured)
//! or under the current working directory.

use std::path::{Path, PathBuf};

/// Open-mode bits relevant to the tracking decision, independent of libc's
/// platform-specific `O_*` constant values so callers in `hvac-shim` can
/// pass `libc::O_WRONLY`/`O_APPEND` straight through.
pub struct OpenFlags {
    pub write_only: bool,
    pub append: bool,
}

/// Returns `true` if `path` should be handed to the remote HVAC path instead
/// of the local filesystem.
///
/// `data_dir` is `Config::data_dir`; when `None`, containment is checked
/// against the process's current working directory instead.
pub fn is_tracked(path: &Path, flags: &OpenFlags, data_dir: Option<&Path>) -> bool {
    if path.to_string_lossy().contains(".ports.cfg.") {
        return false;
    }
    if flags.write_only || flags.append {
        return false;
    }

    let canonical = match path.canonicalize() {
        Ok(p) => p,
        Err(_) => return false,
    };
    let parent = match canonical.parent() {
        Some(p) => p,
        None => return false,
    };

    match data_dir {
        Some(dir) => match dir.canonicalize() {
            Ok(dir) => parent.starts_with(&dir),
            Err(_) => false,
        },
        None => match std::env::current_dir() {
            Ok(cwd) => parent == cwd,
            Err(_) => false,
        },
    }
}

/// Canonicalizes `path`, used once tracking has been decided so the fd
/// table and remote open RPC agree on the same absolute path string.
pub fn canonicalize(path: &Path) -> std::io::Result<PathBuf> {
    path.canonicalize()
}
