//! Shell link (`.lnk`) reading.
//!
//! [`ShellLinkParser`] decodes the binary format directly and works on any
//! host. On Windows, [`ComShellLink`] asks the shell through `IShellLinkW`
//! first, which also resolves links whose target only lives in the item
//! id list.

use std::fs;
use std::path::{Path, PathBuf};

use super::{IconLocation, ShortcutMetadata, ShortcutTarget};
use crate::error::{IconError, Result};
use crate::utils::bytes::{ByteCursor, cstr_at, slice_at, u32_at, wstr_at};
use crate::utils::paths::expand_env_vars;

const HEADER_SIZE: u32 = 0x4c;
const LINK_CLSID: [u8; 16] = [
    0x01, 0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x46,
];

const HAS_TARGET_ID_LIST: u32 = 0x0000_0001;
const HAS_LINK_INFO: u32 = 0x0000_0002;
const HAS_NAME: u32 = 0x0000_0004;
const HAS_RELATIVE_PATH: u32 = 0x0000_0008;
const HAS_WORKING_DIR: u32 = 0x0000_0010;
const HAS_ARGUMENTS: u32 = 0x0000_0020;
const HAS_ICON_LOCATION: u32 = 0x0000_0040;
const IS_UNICODE: u32 = 0x0000_0080;

const VOLUME_ID_AND_LOCAL_BASE_PATH: u32 = 0x1;
const COMMON_NETWORK_RELATIVE_LINK: u32 = 0x2;

const ENVIRONMENT_BLOCK: u32 = 0xA000_0001;
const ICON_ENVIRONMENT_BLOCK: u32 = 0xA000_0007;
const ENV_BLOCK_SIZE: usize = 0x314;
const ANSI_PATH_LEN: usize = 260;

/// Fields of a shell link that matter for icon lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkFile {
    pub icon_index: i32,
    /// Local or network path assembled from the `LinkInfo` structure.
    pub link_info_path: Option<String>,
    pub name: Option<String>,
    pub relative_path: Option<String>,
    pub working_dir: Option<String>,
    pub arguments: Option<String>,
    pub icon_location: Option<String>,
    /// Unexpanded target from an `EnvironmentVariableDataBlock`.
    pub env_target: Option<String>,
    /// Unexpanded icon path from an `IconEnvironmentDataBlock`.
    pub env_icon: Option<String>,
}

impl LinkFile {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if u32_at(data, 0) != Some(HEADER_SIZE) || slice_at(data, 4, 16) != Some(&LINK_CLSID[..]) {
            return Err(IconError::unsupported("not a shell link"));
        }
        let truncated = || IconError::decode("shell link truncated");

        let flags = u32_at(data, 0x14).ok_or_else(truncated)?;
        let mut link = LinkFile {
            icon_index: u32_at(data, 0x38).ok_or_else(truncated)? as i32,
            ..Default::default()
        };

        let mut cursor = ByteCursor::at(data, HEADER_SIZE as usize);
        if flags & HAS_TARGET_ID_LIST != 0 {
            let len = cursor.u16().ok_or_else(truncated)?;
            cursor.skip(usize::from(len)).ok_or_else(truncated)?;
        }
        if flags & HAS_LINK_INFO != 0 {
            let start = cursor.position();
            let size = cursor.u32().ok_or_else(truncated)? as usize;
            let info = slice_at(data, start, size).ok_or_else(truncated)?;
            link.link_info_path = link_info_path(info);
            cursor = ByteCursor::at(data, start + size);
        }

        let unicode = flags & IS_UNICODE != 0;
        for (flag, slot) in [
            (HAS_NAME, &mut link.name),
            (HAS_RELATIVE_PATH, &mut link.relative_path),
            (HAS_WORKING_DIR, &mut link.working_dir),
            (HAS_ARGUMENTS, &mut link.arguments),
            (HAS_ICON_LOCATION, &mut link.icon_location),
        ] {
            if flags & flag != 0 {
                *slot = Some(string_data(&mut cursor, unicode).ok_or_else(truncated)?);
            }
        }

        // extra data is optional; a damaged tail keeps what was read so far
        while let Some(size) = cursor.u32() {
            let size = size as usize;
            if size < 8 {
                break;
            }
            let start = cursor.position() - 4;
            let Some(block) = slice_at(data, start, size) else {
                break;
            };
            match u32_at(block, 4) {
                Some(ENVIRONMENT_BLOCK) => link.env_target = env_block_path(block),
                Some(ICON_ENVIRONMENT_BLOCK) => link.env_icon = env_block_path(block),
                _ => {}
            }
            cursor = ByteCursor::at(data, start + size);
        }
        Ok(link)
    }

    /// Where the link points. Relative paths resolve against `lnk_dir`.
    pub fn target(&self, lnk_dir: &Path) -> Option<PathBuf> {
        if let Some(env) = non_empty(&self.env_target) {
            return Some(PathBuf::from(expand_env_vars(env)));
        }
        if let Some(path) = non_empty(&self.link_info_path) {
            return Some(PathBuf::from(path));
        }
        non_empty(&self.relative_path).map(|rel| lnk_dir.join(rel))
    }

    /// The explicit icon location, environment references expanded.
    pub fn icon(&self) -> Option<IconLocation> {
        non_empty(&self.env_icon)
            .or_else(|| non_empty(&self.icon_location))
            .and_then(|raw| IconLocation::expanded(raw, self.icon_index))
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.trim().is_empty())
}

fn string_data(cursor: &mut ByteCursor<'_>, unicode: bool) -> Option<String> {
    let chars = usize::from(cursor.u16()?);
    if unicode {
        let raw = cursor.take(chars * 2)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Some(String::from_utf16_lossy(&units))
    } else {
        cursor
            .take(chars)
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
    }
}

fn link_info_path(info: &[u8]) -> Option<String> {
    let header_size = u32_at(info, 4)?;
    let flags = u32_at(info, 8)?;
    let unicode_offsets = header_size >= 0x24;

    let suffix = if unicode_offsets {
        u32_at(info, 32)
            .filter(|&at| at != 0)
            .and_then(|at| wstr_at(info, at as usize))
    } else {
        None
    }
    .or_else(|| u32_at(info, 24).and_then(|at| cstr_at(info, at as usize)))
    .unwrap_or_default();

    if flags & VOLUME_ID_AND_LOCAL_BASE_PATH != 0 {
        let base = if unicode_offsets {
            u32_at(info, 28)
                .filter(|&at| at != 0)
                .and_then(|at| wstr_at(info, at as usize))
        } else {
            None
        }
        .or_else(|| u32_at(info, 16).and_then(|at| cstr_at(info, at as usize)))?;
        return Some(base + &suffix);
    }
    if flags & COMMON_NETWORK_RELATIVE_LINK != 0 {
        let link = u32_at(info, 20)? as usize;
        let net_name = cstr_at(info, link.checked_add(u32_at(info, link + 8)? as usize)?)?;
        if suffix.is_empty() {
            return Some(net_name);
        }
        return Some(format!("{net_name}\\{suffix}"));
    }
    None
}

fn env_block_path(block: &[u8]) -> Option<String> {
    if block.len() < ENV_BLOCK_SIZE {
        return None;
    }
    wstr_at(&block[..ENV_BLOCK_SIZE], 8 + ANSI_PATH_LEN)
        .filter(|s| !s.is_empty())
        .or_else(|| cstr_at(&block[..8 + ANSI_PATH_LEN], 8))
        .filter(|s| !s.is_empty())
}

/// Portable reader built on [`LinkFile::parse`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellLinkParser;

impl ShortcutMetadata for ShellLinkParser {
    fn read(&self, lnk: &Path) -> Result<ShortcutTarget> {
        let link = LinkFile::parse(&fs::read(lnk)?)?;
        let dir = lnk.parent().unwrap_or(Path::new(""));
        Ok(ShortcutTarget {
            target: link.target(dir),
            icon: link.icon(),
        })
    }
}

#[cfg(windows)]
pub use com::ComShellLink;

#[cfg(windows)]
mod com {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::path::{Path, PathBuf};

    use windows::{
        Win32::{
            Storage::FileSystem::WIN32_FIND_DATAW,
            System::Com::{CLSCTX_INPROC_SERVER, CoCreateInstance, IPersistFile, STGM_READ},
            UI::Shell::{IShellLinkW, SLGP_UNCPRIORITY, ShellLink},
        },
        core::{Interface, PCWSTR},
    };

    use super::{IconLocation, ShortcutMetadata, ShortcutTarget};
    use crate::error::Result;
    use crate::utils::com::ComApartment;

    fn from_wide(buf: &[u16]) -> String {
        let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
        String::from_utf16_lossy(&buf[..len])
    }

    /// Reads links through the shell's `IShellLinkW`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ComShellLink;

    impl ShortcutMetadata for ComShellLink {
        fn read(&self, lnk: &Path) -> Result<ShortcutTarget> {
            let _apartment = ComApartment::enter();
            let wide_path: Vec<u16> = OsStr::new(lnk).encode_wide().chain(Some(0)).collect();

            unsafe {
                let shell_link: IShellLinkW =
                    CoCreateInstance(&ShellLink, None, CLSCTX_INPROC_SERVER)?;
                let persist_file: IPersistFile = shell_link.cast()?;
                persist_file.Load(PCWSTR::from_raw(wide_path.as_ptr()), STGM_READ)?;

                let mut target = [0u16; 260];
                let mut find_data = WIN32_FIND_DATAW::default();
                shell_link.GetPath(&mut target, &mut find_data, SLGP_UNCPRIORITY.0 as u32)?;

                let mut icon = [0u16; 260];
                let mut index = 0i32;
                let icon = match shell_link.GetIconLocation(&mut icon, &mut index) {
                    Ok(()) => IconLocation::expanded(&from_wide(&icon), index),
                    Err(_) => None,
                };

                let target = from_wide(&target);
                Ok(ShortcutTarget {
                    target: (!target.is_empty()).then(|| PathBuf::from(target)),
                    icon,
                })
            }
        }
    }
}
