//! Read-only walk of a PE image's resource tree.
//!
//! Only the headers needed to find `.rsrc` are parsed. Nothing in the
//! image is executed, relocated or imported; the file is treated as bytes.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{IconError, Result};
use crate::module_icons::{ModuleLoader, ResourceModule, ResourceName};
use crate::utils::bytes::{slice_at, u16_at, u32_at};

pub const RT_ICON: u16 = 3;
pub const RT_GROUP_ICON: u16 = 14;

const RESOURCE_DIRECTORY_INDEX: usize = 2;
const SECTION_HEADER_LEN: usize = 40;
const SUBDIRECTORY_FLAG: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy)]
struct Section {
    virtual_address: u32,
    raw_offset: u32,
    raw_size: u32,
}

/// A parsed view over the bytes of a PE file.
pub struct PeImage<D> {
    data: D,
    sections: Vec<Section>,
    rsrc_root: Option<usize>,
}

impl<D: AsRef<[u8]>> PeImage<D> {
    pub fn parse(data: D) -> Result<Self> {
        let bytes = data.as_ref();
        if bytes.get(0..2) != Some(b"MZ".as_slice()) {
            return Err(IconError::unsupported("missing MZ signature"));
        }
        let pe = u32_at(bytes, 0x3c).ok_or_else(|| IconError::decode("DOS header truncated"))? as usize;
        if slice_at(bytes, pe, 4) != Some(b"PE\0\0".as_slice()) {
            return Err(IconError::unsupported("missing PE signature"));
        }

        let coff = pe + 4;
        let section_count = u16_at(bytes, coff + 2).ok_or_else(|| IconError::decode("COFF header truncated"))?;
        let optional_len = u16_at(bytes, coff + 16).ok_or_else(|| IconError::decode("COFF header truncated"))?;
        let optional = coff + 20;

        let (count_at, dirs_at) = match u16_at(bytes, optional) {
            Some(0x10b) => (92, 96),
            Some(0x20b) => (108, 112),
            _ => return Err(IconError::unsupported("unknown optional header magic")),
        };
        let dir_count = u32_at(bytes, optional + count_at).unwrap_or(0) as usize;
        let rsrc_rva = if dir_count > RESOURCE_DIRECTORY_INDEX {
            u32_at(bytes, optional + dirs_at + RESOURCE_DIRECTORY_INDEX * 8).unwrap_or(0)
        } else {
            0
        };

        let table = optional + usize::from(optional_len);
        let mut sections = Vec::with_capacity(usize::from(section_count));
        for i in 0..usize::from(section_count) {
            let Some(header) = slice_at(bytes, table + i * SECTION_HEADER_LEN, SECTION_HEADER_LEN) else {
                return Err(IconError::decode("section table truncated"));
            };
            sections.push(Section {
                virtual_address: u32_at(header, 12).unwrap_or(0),
                raw_size: u32_at(header, 16).unwrap_or(0),
                raw_offset: u32_at(header, 20).unwrap_or(0),
            });
        }

        let mut image = Self {
            data,
            sections,
            rsrc_root: None,
        };
        if rsrc_rva != 0 {
            image.rsrc_root = image.rva_to_offset(rsrc_rva);
        }
        Ok(image)
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        self.sections.iter().find_map(|s| {
            let delta = rva.checked_sub(s.virtual_address)?;
            // bytes past the raw size are zero-fill and not in the file
            if delta >= s.raw_size {
                return None;
            }
            Some(s.raw_offset as usize + delta as usize)
        })
    }

    /// File offset of a position given relative to the resource root.
    fn rsrc_offset(&self, rel: u32) -> Option<usize> {
        let at = self.rsrc_root?.checked_add(rel as usize)?;
        (at < self.bytes().len()).then_some(at)
    }

    /// `(name field, offset field)` pairs of the directory at `rel`.
    fn directory(&self, rel: u32) -> Vec<(u32, u32)> {
        let Some(at) = self.rsrc_offset(rel) else {
            return Vec::new();
        };
        let bytes = self.bytes();
        let named = u16_at(bytes, at + 12).unwrap_or(0) as usize;
        let ids = u16_at(bytes, at + 14).unwrap_or(0) as usize;
        (0..named + ids)
            .map_while(|i| {
                let entry = at + 16 + i * 8;
                Some((u32_at(bytes, entry)?, u32_at(bytes, entry + 4)?))
            })
            .collect()
    }

    fn entry_name(&self, field: u32) -> Option<ResourceName> {
        if field & SUBDIRECTORY_FLAG == 0 {
            return Some(ResourceName::Id(field as u16));
        }
        let bytes = self.bytes();
        let at = self.rsrc_offset(field & !SUBDIRECTORY_FLAG)?;
        let len = usize::from(u16_at(bytes, at)?);
        let raw = slice_at(bytes, at + 2, len * 2)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Some(ResourceName::Name(String::from_utf16_lossy(&units)))
    }

    fn type_directory(&self, type_id: u16) -> Option<u32> {
        self.directory(0).into_iter().find_map(|(name, target)| {
            (name == u32::from(type_id) && target & SUBDIRECTORY_FLAG != 0)
                .then_some(target & !SUBDIRECTORY_FLAG)
        })
    }

    /// Names of every resource of `type_id`, in directory order (named
    /// entries first, then ids ascending).
    pub fn resource_names(&self, type_id: u16) -> Vec<ResourceName> {
        let Some(dir) = self.type_directory(type_id) else {
            return Vec::new();
        };
        self.directory(dir)
            .into_iter()
            .filter_map(|(name, _)| self.entry_name(name))
            .collect()
    }

    /// Raw bytes of the first language variant of a resource.
    pub fn resource_data(&self, type_id: u16, wanted: &ResourceName) -> Option<&[u8]> {
        let dir = self.type_directory(type_id)?;
        let (_, languages) = self
            .directory(dir)
            .into_iter()
            .find(|(name, target)| {
                target & SUBDIRECTORY_FLAG != 0 && self.entry_name(*name).as_ref() == Some(wanted)
            })?;
        let (_, leaf) = self
            .directory(languages & !SUBDIRECTORY_FLAG)
            .into_iter()
            .next()?;
        if leaf & SUBDIRECTORY_FLAG != 0 {
            return None;
        }

        let bytes = self.bytes();
        let entry = self.rsrc_offset(leaf)?;
        let rva = u32_at(bytes, entry)?;
        let size = u32_at(bytes, entry + 4)? as usize;
        slice_at(bytes, self.rva_to_offset(rva)?, size)
    }
}

impl<D: AsRef<[u8]>> ResourceModule for PeImage<D> {
    fn icon_groups(&self) -> Vec<ResourceName> {
        self.resource_names(RT_GROUP_ICON)
    }

    fn group_directory(&self, name: &ResourceName) -> Option<Cow<'_, [u8]>> {
        self.resource_data(RT_GROUP_ICON, name).map(Cow::Borrowed)
    }

    fn icon_image(&self, id: u16) -> Option<Cow<'_, [u8]>> {
        self.resource_data(RT_ICON, &ResourceName::Id(id)).map(Cow::Borrowed)
    }
}

/// Opens modules as read-only memory maps and walks them with [`PeImage`].
///
/// Works on every host, including for Windows binaries inspected elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct MappedLoader;

impl ModuleLoader for MappedLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn ResourceModule>> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(IconError::unsupported("empty module file"));
        }
        // SAFETY: the map is read-only and private to this attempt; a
        // concurrent truncation is the only hazard and every access is
        // bounds-checked against the length captured at map time.
        let map = unsafe { Mmap::map(&file) }?;
        Ok(Box::new(PeImage::parse(map)?))
    }
}
