//! Icons embedded in executables and libraries.
//!
//! A module is only ever opened as passive data. The platform adapters
//! behind [`ModuleLoader`] hand back raw `RT_GROUP_ICON` and `RT_ICON`
//! bytes; frame selection and decoding happen here on every host.

use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use tracing::trace;

use crate::error::{IconError, Result};
use crate::ico::{self, FrameSource};
use crate::utils::paths::has_extension;

/// Name of a resource entry: an integer id or a string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceName {
    Id(u16),
    Name(String),
}

/// Icon resources of one opened module.
///
/// Dropping the value releases whatever handle or mapping backs it.
pub trait ResourceModule {
    /// Icon groups in enumeration order.
    fn icon_groups(&self) -> Vec<ResourceName>;
    /// Raw group directory (`GRPICONDIR`) of one group.
    fn group_directory(&self, name: &ResourceName) -> Option<Cow<'_, [u8]>>;
    /// Raw payload of one `RT_ICON` resource.
    fn icon_image(&self, id: u16) -> Option<Cow<'_, [u8]>>;
}

/// Opens modules for resource reading without executing them.
pub trait ModuleLoader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ResourceModule>>;
}

/// Group id the shell falls back to when no ordinal matches.
const DEFAULT_GROUP_ID: u16 = 1;

/// The host's preferred loader.
pub fn default_loader() -> Arc<dyn ModuleLoader> {
    #[cfg(windows)]
    {
        Arc::new(data_file::DataFileLoader)
    }
    #[cfg(not(windows))]
    {
        Arc::new(crate::pe::MappedLoader)
    }
}

/// Decodes the largest frame of one icon group.
///
/// `index` is a group ordinal. A negative or out-of-range ordinal selects
/// the first group.
pub fn extract_module_icon(
    loader: &dyn ModuleLoader,
    path: &Path,
    index: i32,
) -> Result<DynamicImage> {
    if !path.is_file() {
        return Err(IconError::not_found(path.display().to_string()));
    }
    if has_extension(path, "ico") {
        return ico::decode_container(&fs::read(path)?);
    }

    let module = loader.open(path)?;
    let groups = module.icon_groups();
    let Some(wanted) = select_group(&groups, index) else {
        return Err(IconError::not_found(format!(
            "{} has no icon groups",
            path.display()
        )));
    };
    trace!(path = %path.display(), index, group = ?wanted, "selected icon group");

    let directory = module
        .group_directory(wanted)
        .or_else(|| module.group_directory(&ResourceName::Id(DEFAULT_GROUP_ID)))
        .ok_or_else(|| IconError::decode(format!("unreadable icon group {wanted:?}")))?;
    let best = ico::largest_frame(ico::group_frames(&directory)?)
        .ok_or_else(|| IconError::decode("icon group is empty"))?;
    let FrameSource::ResourceId(id) = best.source else {
        return Err(IconError::decode("group entry without resource id"));
    };
    let payload = module
        .icon_image(id)
        .ok_or_else(|| IconError::decode(format!("missing icon resource {id}")))?;
    ico::decode_frame(&payload, best.width)
}

fn select_group(groups: &[ResourceName], index: i32) -> Option<&ResourceName> {
    let first = groups.first()?;
    let picked = usize::try_from(index).ok().and_then(|i| groups.get(i));
    Some(picked.unwrap_or(first))
}

#[cfg(windows)]
pub use data_file::DataFileLoader;

#[cfg(windows)]
mod data_file {
    use std::borrow::Cow;
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;

    use windows::{
        Win32::{
            Foundation::{BOOL, FreeLibrary, HMODULE, TRUE},
            System::LibraryLoader::{
                EnumResourceNamesW, FindResourceW, LOAD_LIBRARY_AS_DATAFILE,
                LOAD_LIBRARY_AS_IMAGE_RESOURCE, LoadLibraryExW, LoadResource, LockResource,
                SizeofResource,
            },
        },
        core::PCWSTR,
    };

    use super::{ModuleLoader, ResourceModule, ResourceName};
    use crate::error::Result;
    use crate::pe::{RT_GROUP_ICON, RT_ICON};

    struct AutoModule(HMODULE);

    impl Drop for AutoModule {
        fn drop(&mut self) {
            if !self.0.0.is_null() {
                let _ = unsafe { FreeLibrary(self.0) };
            }
        }
    }

    #[allow(non_snake_case)]
    fn MAKEINTRESOURCEW(id: u16) -> PCWSTR {
        PCWSTR(usize::from(id) as *const u16)
    }

    /// Maps modules with `LOAD_LIBRARY_AS_DATAFILE | LOAD_LIBRARY_AS_IMAGE_RESOURCE`
    /// so the loader never runs their code.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct DataFileLoader;

    impl ModuleLoader for DataFileLoader {
        fn open(&self, path: &Path) -> Result<Box<dyn ResourceModule>> {
            let wide_path: Vec<u16> = OsStr::new(path).encode_wide().chain(Some(0)).collect();
            let module = unsafe {
                LoadLibraryExW(
                    PCWSTR::from_raw(wide_path.as_ptr()),
                    None,
                    LOAD_LIBRARY_AS_DATAFILE | LOAD_LIBRARY_AS_IMAGE_RESOURCE,
                )
            }?;
            Ok(Box::new(DataFileModule(AutoModule(module))))
        }
    }

    struct DataFileModule(AutoModule);

    unsafe extern "system" fn collect_name(
        _module: HMODULE,
        _kind: PCWSTR,
        name: PCWSTR,
        param: isize,
    ) -> BOOL {
        let names = unsafe { &mut *(param as *mut Vec<ResourceName>) };
        let raw = name.0 as usize;
        if raw >> 16 == 0 {
            names.push(ResourceName::Id(raw as u16));
        } else if let Ok(s) = unsafe { name.to_string() } {
            names.push(ResourceName::Name(s));
        }
        TRUE
    }

    impl DataFileModule {
        fn resource(&self, kind: u16, name: PCWSTR) -> Option<&[u8]> {
            let module = self.0.0;
            unsafe {
                let info = FindResourceW(Some(module), name, MAKEINTRESOURCEW(kind));
                if info.is_invalid() {
                    return None;
                }
                let handle = LoadResource(Some(module), info).ok()?;
                let data = LockResource(handle);
                let size = SizeofResource(Some(module), info);
                if data.is_null() || size == 0 {
                    return None;
                }
                // lives as long as the module stays mapped, which `self` guarantees
                Some(std::slice::from_raw_parts(data as *const u8, size as usize))
            }
        }
    }

    impl ResourceModule for DataFileModule {
        fn icon_groups(&self) -> Vec<ResourceName> {
            let mut names: Vec<ResourceName> = Vec::new();
            let _ = unsafe {
                EnumResourceNamesW(
                    Some(self.0.0),
                    MAKEINTRESOURCEW(RT_GROUP_ICON),
                    Some(collect_name),
                    &mut names as *mut Vec<ResourceName> as isize,
                )
            };
            names
        }

        fn group_directory(&self, name: &ResourceName) -> Option<Cow<'_, [u8]>> {
            let data = match name {
                ResourceName::Id(id) => self.resource(RT_GROUP_ICON, MAKEINTRESOURCEW(*id)),
                ResourceName::Name(s) => {
                    let wide: Vec<u16> = s.encode_utf16().chain(Some(0)).collect();
                    self.resource(RT_GROUP_ICON, PCWSTR::from_raw(wide.as_ptr()))
                }
            };
            data.map(Cow::Borrowed)
        }

        fn icon_image(&self, id: u16) -> Option<Cow<'_, [u8]>> {
            self.resource(RT_ICON, MAKEINTRESOURCEW(id)).map(Cow::Borrowed)
        }
    }
}
