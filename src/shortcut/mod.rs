//! Shortcut files: shell links (`.lnk`) and internet shortcuts (`.url`).

pub mod lnk;
pub mod url;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::error::{IconError, Result};
use crate::utils::paths::{expand_env_vars, has_extension};

/// An icon file plus the frame or group index inside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IconLocation {
    pub path: PathBuf,
    pub index: i32,
}

impl IconLocation {
    pub fn new(path: impl Into<PathBuf>, index: i32) -> Self {
        Self {
            path: path.into(),
            index,
        }
    }

    /// Builds a location from a raw file string, expanding `%VAR%`
    /// references. Blank strings yield `None`.
    pub fn expanded(raw: &str, index: i32) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(Self::new(expand_env_vars(raw), index))
    }
}

impl FromStr for IconLocation {
    type Err = IconError;

    /// Parses `<file>,<index>`. The split is at the last comma so file
    /// names containing commas survive; a non-numeric index reads as 0.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (file, index) = match s.rsplit_once(',') {
            Some((file, index)) => (file.trim(), index.trim().parse().unwrap_or(0)),
            None => (s, 0),
        };
        if file.is_empty() {
            return Err(IconError::not_found("empty icon location"));
        }
        Ok(Self::new(expand_env_vars(file), index))
    }
}

impl fmt::Display for IconLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.path.display(), self.index)
    }
}

/// What a shortcut points at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShortcutTarget {
    pub target: Option<PathBuf>,
    pub icon: Option<IconLocation>,
}

/// Reads the target and icon location stored in a shell link.
pub trait ShortcutMetadata: Send + Sync {
    fn read(&self, lnk: &Path) -> Result<ShortcutTarget>;
}

/// Tries each provider in order and returns the first answer.
pub struct FirstOf(pub Vec<Arc<dyn ShortcutMetadata>>);

impl ShortcutMetadata for FirstOf {
    fn read(&self, lnk: &Path) -> Result<ShortcutTarget> {
        let mut last = IconError::PlatformUnavailable("no shortcut provider".into());
        for provider in &self.0 {
            match provider.read(lnk) {
                Ok(target) => return Ok(target),
                Err(e) => {
                    debug!(path = %lnk.display(), error = %e, "shortcut provider failed");
                    last = e;
                }
            }
        }
        Err(last)
    }
}

/// The host's shortcut reader: the shell's own `IShellLinkW` on Windows,
/// backed by the built-in link parser everywhere.
pub fn default_metadata() -> Arc<dyn ShortcutMetadata> {
    #[cfg(windows)]
    {
        Arc::new(FirstOf(vec![
            Arc::new(lnk::ComShellLink),
            Arc::new(lnk::ShellLinkParser),
        ]))
    }
    #[cfg(not(windows))]
    {
        Arc::new(lnk::ShellLinkParser)
    }
}

/// The target of a `.lnk`, or `path` itself for anything else or when the
/// link cannot be read.
pub fn resolve_target(path: &Path) -> PathBuf {
    resolve_target_with(default_metadata().as_ref(), path)
}

pub fn resolve_target_with(provider: &dyn ShortcutMetadata, path: &Path) -> PathBuf {
    if !has_extension(path, "lnk") {
        return path.to_path_buf();
    }
    match provider.read(path) {
        Ok(ShortcutTarget {
            target: Some(target),
            ..
        }) if !target.as_os_str().is_empty() => target,
        _ => path.to_path_buf(),
    }
}
