//! Discovery and resolution of external commands.
//!
//! [`CommandIndex`] maps bare command names to the executables found in
//! the PATH directories. The index is scanned once at startup and is a
//! deliberate snapshot: a lookup miss triggers exactly one re-scan, and
//! there is no other invalidation, since PATH content rarely changes
//! mid-session. Names containing a path separator bypass the index and
//! are checked on the filesystem directly.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Cache of external command names to resolved executable paths.
#[derive(Debug, Clone, Default)]
pub struct CommandIndex {
    commands: BTreeMap<String, PathBuf>,
}

impl CommandIndex {
    /// Builds the index by scanning every directory in `$PATH`.
    pub fn scan() -> Self {
        match env::var_os("PATH") {
            Some(paths) => Self::scan_dirs(env::split_paths(&paths)),
            None => Self::default(),
        }
    }

    /// Builds the index from an explicit directory list.
    pub fn scan_dirs<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut commands = BTreeMap::new();
        for dir in dirs {
            let Ok(entries) = fs::read_dir(dir.as_ref()) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !is_executable(&path) {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    // First hit along PATH wins, like execvp.
                    commands.entry(name.to_string()).or_insert(path);
                }
            }
        }
        CommandIndex { commands }
    }

    /// Resolves a command name to an executable path.
    ///
    /// A miss on a bare name re-scans PATH once before giving up, so
    /// commands installed after startup are still found.
    pub fn resolve(&mut self, name: &str) -> Option<PathBuf> {
        if name.contains('/') {
            let path = Path::new(name);
            return is_executable(path).then(|| path.to_path_buf());
        }
        if let Some(path) = self.commands.get(name) {
            return Some(path.clone());
        }
        *self = Self::scan();
        self.commands.get(name).cloned()
    }

    /// The names in the snapshot, in lexicographic order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
