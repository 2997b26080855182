//! The platform shell's icon for a path, the universal last local fallback.

use std::path::Path;

use image::DynamicImage;

use crate::error::{IconError, Result};

/// Asks the host shell which icon it shows for a path.
///
/// Paths that do not exist are looked up by extension alone.
pub trait ShellIcons: Send + Sync {
    fn icon_for(&self, path: &Path) -> Result<DynamicImage>;
}

/// Hosts without a queryable shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

impl ShellIcons for Unsupported {
    fn icon_for(&self, path: &Path) -> Result<DynamicImage> {
        Err(IconError::PlatformUnavailable(format!(
            "no shell icon lookup for {}",
            path.display()
        )))
    }
}

#[cfg(windows)]
pub use win::SystemShell;

#[cfg(windows)]
mod win {
    use std::ffi::OsStr;
    use std::mem::{self, MaybeUninit};
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;

    use image::DynamicImage;
    use windows::{
        Win32::{
            Storage::FileSystem::{FILE_ATTRIBUTE_NORMAL, FILE_FLAGS_AND_ATTRIBUTES},
            UI::Shell::{
                SHFILEINFOW, SHGFI_ICON, SHGFI_LARGEICON, SHGFI_USEFILEATTRIBUTES,
                SHGetFileInfoW,
            },
        },
        core::PCWSTR,
    };

    use super::ShellIcons;
    use crate::error::{IconError, Result};
    use crate::utils::com::ComApartment;
    use crate::utils::image_utils::hicon_to_image;

    /// `SHGetFileInfoW`-backed lookup.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SystemShell;

    impl ShellIcons for SystemShell {
        fn icon_for(&self, path: &Path) -> Result<DynamicImage> {
            // icon handler extensions need an STA on the calling thread
            let _apartment = ComApartment::enter();
            let wide_path: Vec<u16> = OsStr::new(path).encode_wide().chain(Some(0)).collect();
            let mut flags = SHGFI_ICON | SHGFI_LARGEICON;
            let mut attributes = FILE_FLAGS_AND_ATTRIBUTES(0);
            if !path.exists() {
                flags |= SHGFI_USEFILEATTRIBUTES;
                attributes = FILE_ATTRIBUTE_NORMAL;
            }

            let mut shfileinfo = MaybeUninit::<SHFILEINFOW>::zeroed();
            let result = unsafe {
                SHGetFileInfoW(
                    PCWSTR::from_raw(wide_path.as_ptr()),
                    attributes,
                    Some(shfileinfo.as_mut_ptr()),
                    mem::size_of::<SHFILEINFOW>() as u32,
                    flags,
                )
            };
            if result == 0 {
                let last_error = windows::core::Error::from_win32();
                return Err(IconError::PlatformUnavailable(format!(
                    "no shell icon for {}: {last_error}",
                    path.display()
                )));
            }

            let shfileinfo = unsafe { shfileinfo.assume_init() };
            if shfileinfo.hIcon.0.is_null() {
                return Err(IconError::not_found(path.display().to_string()));
            }
            let image = unsafe { hicon_to_image(shfileinfo.hIcon) }?;
            Ok(DynamicImage::ImageRgba8(image))
        }
    }
}

/// The host's shell lookup.
pub fn default_shell() -> std::sync::Arc<dyn ShellIcons> {
    #[cfg(windows)]
    {
        std::sync::Arc::new(SystemShell)
    }
    #[cfg(not(windows))]
    {
        std::sync::Arc::new(Unsupported)
    }
}
