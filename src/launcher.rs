//! Game-launcher shortcuts (`steam://rungameid/<id>`).
//!
//! The launcher's own `.url` files carry a low-resolution cached icon. The
//! game's executable has the real one, so the id is followed through the
//! app manifest to the install directory and its main executable.

use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern, glob_with};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{IconError, Result};

/// Finds the executable that best represents a launcher URL.
pub trait LauncherLocator: Send + Sync {
    fn locate(&self, url: &str) -> Result<PathBuf>;
}

/// Substrings that mark helper executables shipped next to a game.
const HELPER_EXE_WORDS: &[&str] = &[
    "unins", "setup", "install", "redist", "crash", "report", "register", "activate", "help",
    "update", "patch", "vcredist", "directx", "dxsetup", "vc_redist",
];

/// Memoized result of the install-root lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RootLookup {
    Unchecked,
    Checked(Option<PathBuf>),
}

static STEAM_ROOT: Mutex<RootLookup> = Mutex::new(RootLookup::Unchecked);

/// The Steam install root, looked up once per process.
pub fn steam_root() -> Option<PathBuf> {
    let mut lookup = STEAM_ROOT.lock();
    if let RootLookup::Checked(root) = &*lookup {
        return root.clone();
    }
    let root = find_steam_root();
    debug!(root = ?root, "steam install root");
    *lookup = RootLookup::Checked(root.clone());
    root
}

/// Forgets the memoized root so the next [`steam_root`] call looks again.
pub fn reset_steam_root() {
    *STEAM_ROOT.lock() = RootLookup::Unchecked;
}

#[cfg(windows)]
fn find_steam_root() -> Option<PathBuf> {
    use winreg::RegKey;
    use winreg::enums::HKEY_LOCAL_MACHINE;

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    [r"SOFTWARE\WOW6432Node\Valve\Steam", r"SOFTWARE\Valve\Steam"]
        .into_iter()
        .filter_map(|key| hklm.open_subkey(key).ok())
        .filter_map(|key| key.get_value::<String, _>("InstallPath").ok())
        .map(PathBuf::from)
        .find(|path| path.is_dir())
}

#[cfg(not(windows))]
fn find_steam_root() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    [
        ".steam/steam",
        ".local/share/Steam",
        "Library/Application Support/Steam",
    ]
    .into_iter()
    .map(|rel| home.join(rel))
    .find(|path| path.is_dir())
}

/// Numeric app id of a `steam://` URL, taken from its path
/// (`steam://rungameid/440`, `steam://run/440`).
pub fn steam_app_id(url: &str) -> Option<u64> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    if parsed.scheme() != "steam" {
        return None;
    }
    parsed.path().trim_matches('/').parse().ok()
}

/// The `"installdir"` value of an app manifest: the text between the last
/// two quotes on the first line that starts with that key.
pub fn manifest_install_dir(manifest: &str) -> Option<String> {
    const KEY: &str = "\"installdir\"";
    let line = manifest.lines().map(str::trim).find(|t| {
        t.get(..KEY.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(KEY))
    })?;
    let last = line.rfind('"')?;
    let prev = line[..last].rfind('"')?;
    let dir = &line[prev + 1..last];
    (!dir.trim().is_empty()).then(|| dir.to_owned())
}

fn is_helper_exe(path: &Path) -> bool {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    HELPER_EXE_WORDS.iter().any(|w| stem.contains(w))
}

/// Largest top-level `.exe` in `dir` that is not an installer or tool.
/// Ties keep the first file found; empty files never win.
pub fn pick_game_exe(dir: &Path) -> Result<PathBuf> {
    let pattern = format!("{}/*.exe", Pattern::escape(&dir.to_string_lossy()));
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    let entries = glob_with(&pattern, options)
        .map_err(|e| IconError::not_found(format!("bad install dir {}: {e}", dir.display())))?;

    let mut best: Option<(PathBuf, u64)> = None;
    for exe in entries.filter_map(std::result::Result::ok) {
        if !exe.is_file() || is_helper_exe(&exe) {
            continue;
        }
        let size = exe.metadata().map(|m| m.len()).unwrap_or(0);
        trace!(exe = %exe.display(), size, "candidate game executable");
        if size > best.as_ref().map_or(0, |(_, s)| *s) {
            best = Some((exe, size));
        }
    }
    best.map(|(exe, _)| exe)
        .ok_or_else(|| IconError::not_found(format!("no game executable in {}", dir.display())))
}

/// Resolves `steam://` URLs through a Steam library.
#[derive(Debug, Default, Clone)]
pub struct SteamLocator {
    root: Option<PathBuf>,
}

impl SteamLocator {
    /// Uses the installed client found by [`steam_root`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a fixed library root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn root(&self) -> Option<PathBuf> {
        self.root.clone().or_else(steam_root)
    }
}

impl LauncherLocator for SteamLocator {
    fn locate(&self, url: &str) -> Result<PathBuf> {
        let id = steam_app_id(url)
            .ok_or_else(|| IconError::unsupported(format!("not a game launcher url: {url}")))?;
        let root = self
            .root()
            .ok_or_else(|| IconError::not_found("steam is not installed"))?;
        let apps = root.join("steamapps");

        let manifest = apps.join(format!("appmanifest_{id}.acf"));
        let text = fs::read(&manifest)
            .map_err(|e| IconError::not_found(format!("{}: {e}", manifest.display())))?;
        let install_dir = manifest_install_dir(&String::from_utf8_lossy(&text))
            .ok_or_else(|| IconError::decode(format!("{} has no installdir", manifest.display())))?;

        let game_dir = apps.join("common").join(install_dir);
        if !game_dir.is_dir() {
            return Err(IconError::not_found(game_dir.display().to_string()));
        }
        pick_game_exe(&game_dir)
    }
}
