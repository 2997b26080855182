//! Source classification and the fallback chain.
//!
//! Every stage yields an image or an error. Errors are logged and dropped
//! at the stage boundary, the first image wins, and nothing escapes
//! [`IconResolver::resolve`] except `Some` or `None`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageReader};
use tracing::debug;

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::favicon::{FaviconSource, HttpFavicons};
use crate::ico;
use crate::launcher::{LauncherLocator, SteamLocator};
use crate::module_icons::{self, ModuleLoader, extract_module_icon};
use crate::shell::{self, ShellIcons};
use crate::shortcut::url::InternetShortcut;
use crate::shortcut::{self, IconLocation, ShortcutMetadata};
use crate::utils::image_utils::{ResolvedIcon, render_canonical};
use crate::utils::paths::{extension_of, same_path};

/// Extensions decoded as ordinary raster images.
const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp", "tif", "tiff"];

/// One request for a glyph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IconRequest {
    pub path: PathBuf,
    /// Explicit icon file and index tried before anything else.
    pub icon_override: Option<IconLocation>,
}

impl IconRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            icon_override: None,
        }
    }

    pub fn with_override(mut self, location: IconLocation) -> Self {
        self.icon_override = Some(location);
        self
    }
}

/// How a path is resolved, by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    InternetShortcut,
    ShellLink,
    IconFile,
    Module,
    Other,
}

impl SourceKind {
    pub fn of(path: &Path) -> Self {
        match extension_of(path).as_str() {
            "url" => SourceKind::InternetShortcut,
            "lnk" => SourceKind::ShellLink,
            "ico" => SourceKind::IconFile,
            "exe" | "dll" => SourceKind::Module,
            _ => SourceKind::Other,
        }
    }
}

fn is_raster_image(path: &Path) -> bool {
    RASTER_EXTENSIONS.contains(&extension_of(path).as_str())
}

/// The host capabilities the chain calls into.
#[derive(Clone)]
pub struct Platform {
    pub modules: Arc<dyn ModuleLoader>,
    pub shortcuts: Arc<dyn ShortcutMetadata>,
    pub shell: Arc<dyn ShellIcons>,
    pub favicons: Arc<dyn FaviconSource>,
    pub launcher: Arc<dyn LauncherLocator>,
}

impl Platform {
    /// The real implementations for this host.
    pub fn native(config: &ResolverConfig) -> Self {
        Self {
            modules: module_icons::default_loader(),
            shortcuts: shortcut::default_metadata(),
            shell: shell::default_shell(),
            favicons: Arc::new(HttpFavicons::new(config)),
            launcher: Arc::new(SteamLocator::new()),
        }
    }
}

fn stage(name: &'static str, path: &Path, result: Result<DynamicImage>) -> Option<DynamicImage> {
    match result {
        Ok(image) => {
            debug!(stage = name, path = %path.display(), "icon resolved");
            Some(image)
        }
        Err(e) => {
            debug!(stage = name, path = %path.display(), error = %e, "stage produced nothing");
            None
        }
    }
}

/// Turns paths into canonical glyphs.
#[derive(Clone)]
pub struct IconResolver {
    config: ResolverConfig,
    platform: Platform,
}

impl IconResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let platform = Platform::native(&config);
        Self { config, platform }
    }

    pub fn with_platform(config: ResolverConfig, platform: Platform) -> Self {
        Self { config, platform }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Runs the full chain for one request.
    pub fn resolve(&self, request: &IconRequest) -> Option<ResolvedIcon> {
        self.decode(request)
            .map(|image| render_canonical(&image, self.config.icon_size))
    }

    /// Loads a user-chosen icon file.
    ///
    /// Icon containers, modules and raster images are read directly; any
    /// other existing file goes through the full chain.
    pub fn load_icon_sync(&self, path: &Path) -> Option<ResolvedIcon> {
        if path.as_os_str().is_empty() || !path.exists() {
            return None;
        }
        let image = match SourceKind::of(path) {
            SourceKind::IconFile => stage("icon file", path, self.read_container(path)),
            SourceKind::Module => self.module_or_shell(path),
            _ if is_raster_image(path) => stage("image file", path, decode_image_file(path)),
            _ => self.decode(&IconRequest::new(path)),
        }?;
        Some(render_canonical(&image, self.config.icon_size))
    }

    /// Decodes `index` of an explicit icon source, picking the reader from
    /// the extension.
    pub fn load_from_icon_source(&self, path: &Path, index: i32) -> Result<DynamicImage> {
        if SourceKind::of(path) == SourceKind::IconFile {
            self.read_container(path)
        } else if is_raster_image(path) {
            decode_image_file(path)
        } else {
            extract_module_icon(self.platform.modules.as_ref(), path, index)
        }
    }

    fn decode(&self, request: &IconRequest) -> Option<DynamicImage> {
        let path = request.path.as_path();
        let from_override = request
            .icon_override
            .as_ref()
            .filter(|loc| loc.path.is_file())
            .and_then(|loc| {
                stage(
                    "override",
                    &loc.path,
                    self.load_from_icon_source(&loc.path, loc.index),
                )
            });
        if from_override.is_some() {
            return from_override;
        }

        match SourceKind::of(path) {
            SourceKind::InternetShortcut => self.internet_shortcut(path),
            SourceKind::ShellLink => self.shell_link(path),
            SourceKind::IconFile => stage("icon file", path, self.read_container(path)),
            SourceKind::Module => self.module_or_shell(path),
            SourceKind::Other => self.shell_icon(path),
        }
    }

    fn read_container(&self, path: &Path) -> Result<DynamicImage> {
        ico::decode_container(&fs::read(path)?)
    }

    fn shell_icon(&self, path: &Path) -> Option<DynamicImage> {
        stage("shell", path, self.platform.shell.icon_for(path))
    }

    fn module_or_shell(&self, path: &Path) -> Option<DynamicImage> {
        stage(
            "module",
            path,
            extract_module_icon(self.platform.modules.as_ref(), path, 0),
        )
        .or_else(|| self.shell_icon(path))
    }

    fn icon_location(&self, location: Option<&IconLocation>) -> Option<DynamicImage> {
        let location = location.filter(|loc| loc.path.is_file())?;
        stage(
            "icon location",
            &location.path,
            self.load_from_icon_source(&location.path, location.index),
        )
    }

    fn shell_link(&self, path: &Path) -> Option<DynamicImage> {
        let link = match self.platform.shortcuts.read(path) {
            Ok(link) => link,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "unreadable shell link");
                Default::default()
            }
        };

        self.icon_location(link.icon.as_ref())
            .or_else(|| {
                let target = link
                    .target
                    .as_deref()
                    .filter(|t| !same_path(t, path) && t.exists())?;
                stage(
                    "link target",
                    target,
                    extract_module_icon(self.platform.modules.as_ref(), target, 0),
                )
            })
            .or_else(|| self.shell_icon(path))
    }

    fn internet_shortcut(&self, path: &Path) -> Option<DynamicImage> {
        let shortcut = match InternetShortcut::read(path) {
            Ok(shortcut) => shortcut,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "unreadable internet shortcut");
                InternetShortcut::default()
            }
        };
        let url = shortcut.url.as_deref().unwrap_or_default();
        let web = shortcut.is_web();

        let from_launcher = || {
            if web || shortcut.scheme().is_none() {
                return None;
            }
            let exe = match self.platform.launcher.locate(url) {
                Ok(exe) => exe,
                Err(e) => {
                    debug!(url, error = %e, "launcher lookup failed");
                    return None;
                }
            };
            stage(
                "launcher",
                &exe,
                extract_module_icon(self.platform.modules.as_ref(), &exe, 0),
            )
        };

        from_launcher()
            .or_else(|| self.icon_location(shortcut.icon_location().as_ref()))
            .or_else(|| self.shell_icon(path))
            .or_else(|| {
                if !web {
                    return None;
                }
                stage("favicon", path, self.platform.favicons.fetch(url))
            })
    }
}

fn decode_image_file(path: &Path) -> Result<DynamicImage> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}
