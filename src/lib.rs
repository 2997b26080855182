pub mod utils {
    pub mod bytes;
    #[cfg(windows)]
    pub(crate) mod com;
    pub mod image_utils;
    pub mod paths;
}
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod favicon;
pub mod ico;
pub mod launcher;
pub mod module_icons;
pub mod pe;
pub mod resolver;
pub mod shell;
pub mod shortcut;

#[cfg(test)]
mod fixtures;

pub use config::ResolverConfig;
pub use dispatcher::{Executor, IconDispatcher, Inline};
pub use error::{IconError, Result};
pub use resolver::{IconRequest, IconResolver, Platform, SourceKind};
pub use shortcut::IconLocation;
pub use utils::image_utils::ResolvedIcon;

use std::path::Path;

use image::RgbaImage;

/// Resolves one path synchronously with the default configuration.
pub fn get_icon_by_path<P: AsRef<Path>>(path: P) -> Result<RgbaImage> {
    let path = path.as_ref();
    IconResolver::new(ResolverConfig::default())
        .resolve(&IconRequest::new(path))
        .map(|icon| icon.to_rgba_image())
        .ok_or_else(|| IconError::not_found(format!("no icon for {}", path.display())))
}

/// [`get_icon_by_path`], encoded as base64 PNG.
pub fn get_icon_base64_by_path<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    IconResolver::new(ResolverConfig::default())
        .resolve(&IconRequest::new(path))
        .ok_or_else(|| IconError::not_found(format!("no icon for {}", path.display())))?
        .to_base64()
}
