//! Byte-level builders for the file formats the resolver reads.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;

use crate::ResolvedIcon;
use crate::error::{IconError, Result};
use crate::favicon::{FaviconSource, web_host};
use crate::launcher::LauncherLocator;
use crate::pe::MappedLoader;
use crate::resolver::Platform;
use crate::shell::ShellIcons;
use crate::shortcut::{ShortcutMetadata, ShortcutTarget};

pub(crate) fn solid_png(size: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(size, size, Rgba(rgba));
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// 32-bit `BITMAPINFOHEADER` DIB with an all-opaque AND mask.
pub(crate) fn solid_dib(size: u32, rgba: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&(size as i32).to_le_bytes());
    out.extend_from_slice(&((size * 2) as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&32u16.to_le_bytes());
    out.extend_from_slice(&[0u8; 24]);
    for _ in 0..size * size {
        out.extend_from_slice(&[rgba[2], rgba[1], rgba[0], rgba[3]]);
    }
    let mask_row = size.div_ceil(32) * 4;
    out.extend(std::iter::repeat_n(0u8, (mask_row * size) as usize));
    out
}

/// Container file; each frame is `(declared width byte, payload)`.
pub(crate) fn ico(frames: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&[0, 0, 1, 0]);
    out.extend_from_slice(&(frames.len() as u16).to_le_bytes());
    let mut offset = 6 + 16 * frames.len() as u32;
    for (width, payload) in frames {
        out.extend_from_slice(&[*width, *width, 0, 0]);
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&32u16.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        offset += payload.len() as u32;
    }
    for (_, payload) in frames {
        out.extend_from_slice(payload);
    }
    out
}

/// Group directory; each entry is `(declared width byte, icon id)`.
pub(crate) fn group_dir(entries: &[(u8, u16)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&[0, 0, 1, 0]);
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (width, id) in entries {
        out.extend_from_slice(&[*width, *width, 0, 0]);
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&32u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&id.to_le_bytes());
    }
    out
}

pub(crate) fn center_pixel(icon: &ResolvedIcon) -> [u8; 4] {
    let size = icon.size();
    icon.premultiplied().get_pixel(size / 2, size / 2).0
}

#[derive(Clone)]
enum Name {
    Id(u16),
    Str(String),
}

/// Minimal PE image whose only section is `.rsrc`.
pub(crate) struct PeBuilder {
    pe32_plus: bool,
    next_icon_id: u16,
    icons: Vec<(u16, Vec<u8>)>,
    groups: Vec<(Name, Vec<u8>)>,
}

const SECTION_RVA: u32 = 0x1000;
const FILE_ALIGN: usize = 0x200;

impl PeBuilder {
    pub(crate) fn new() -> Self {
        Self {
            pe32_plus: false,
            next_icon_id: 1,
            icons: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub(crate) fn pe32_plus(mut self) -> Self {
        self.pe32_plus = true;
        self
    }

    fn add_frames(&mut self, frames: Vec<(u8, Vec<u8>)>) -> Vec<u8> {
        let mut entries = Vec::new();
        for (width, payload) in frames {
            let id = self.next_icon_id;
            self.next_icon_id += 1;
            self.icons.push((id, payload));
            entries.push((width, id));
        }
        group_dir(&entries)
    }

    /// Adds an icon group with numeric id; frames are `(width byte, payload)`.
    pub(crate) fn group(mut self, id: u16, frames: Vec<(u8, Vec<u8>)>) -> Self {
        let dir = self.add_frames(frames);
        self.groups.push((Name::Id(id), dir));
        self
    }

    pub(crate) fn named_group(mut self, name: &str, frames: Vec<(u8, Vec<u8>)>) -> Self {
        let dir = self.add_frames(frames);
        self.groups.push((Name::Str(name.to_owned()), dir));
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let pe32_plus = self.pe32_plus;
        let mut groups = self.groups;
        // named entries first, then ids ascending
        groups.sort_by(|a, b| match (&a.0, &b.0) {
            (Name::Str(x), Name::Str(y)) => x.cmp(y),
            (Name::Str(_), Name::Id(_)) => std::cmp::Ordering::Less,
            (Name::Id(_), Name::Str(_)) => std::cmp::Ordering::Greater,
            (Name::Id(x), Name::Id(y)) => x.cmp(y),
        });
        let icons: Vec<(Name, Vec<u8>)> = self
            .icons
            .into_iter()
            .map(|(id, data)| (Name::Id(id), data))
            .collect();
        let rsrc = build_rsrc(&[(3, icons), (14, groups)]);
        with_pe_headers(pe32_plus, rsrc)
    }
}

fn with_pe_headers(pe32_plus: bool, rsrc: Vec<u8>) -> Vec<u8> {
    let (opt_size, magic, num_rva_off, dirs_off) = if pe32_plus {
        (0xF0usize, 0x20bu16, 108usize, 112usize)
    } else {
        (0xE0, 0x10b, 92, 96)
    };

    let mut out = vec![0u8; FILE_ALIGN];
    out[0..2].copy_from_slice(b"MZ");
    out[0x3c..0x40].copy_from_slice(&0x40u32.to_le_bytes());
    out[0x40..0x44].copy_from_slice(b"PE\0\0");
    let coff = 0x44;
    out[coff..coff + 2].copy_from_slice(&0x14cu16.to_le_bytes());
    out[coff + 2..coff + 4].copy_from_slice(&1u16.to_le_bytes());
    out[coff + 16..coff + 18].copy_from_slice(&(opt_size as u16).to_le_bytes());
    out[coff + 18..coff + 20].copy_from_slice(&0x2102u16.to_le_bytes());

    let opt = coff + 20;
    out[opt..opt + 2].copy_from_slice(&magic.to_le_bytes());
    out[opt + num_rva_off..opt + num_rva_off + 4].copy_from_slice(&16u32.to_le_bytes());
    let rsrc_dir = opt + dirs_off + 2 * 8;
    out[rsrc_dir..rsrc_dir + 4].copy_from_slice(&SECTION_RVA.to_le_bytes());
    out[rsrc_dir + 4..rsrc_dir + 8].copy_from_slice(&(rsrc.len() as u32).to_le_bytes());

    let section = opt + opt_size;
    out[section..section + 8].copy_from_slice(b".rsrc\0\0\0");
    out[section + 8..section + 12].copy_from_slice(&(rsrc.len() as u32).to_le_bytes());
    out[section + 12..section + 16].copy_from_slice(&SECTION_RVA.to_le_bytes());
    out[section + 16..section + 20].copy_from_slice(&(rsrc.len() as u32).to_le_bytes());
    out[section + 20..section + 24].copy_from_slice(&(FILE_ALIGN as u32).to_le_bytes());
    out[section + 36..section + 40].copy_from_slice(&0x4000_0040u32.to_le_bytes());

    out.extend_from_slice(&rsrc);
    let padded = out.len().div_ceil(FILE_ALIGN) * FILE_ALIGN;
    out.resize(padded, 0);
    out
}

fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn build_rsrc(types: &[(u16, Vec<(Name, Vec<u8>)>)]) -> Vec<u8> {
    let leaves: Vec<&(Name, Vec<u8>)> = types.iter().flat_map(|(_, e)| e.iter()).collect();

    let mut cursor = 16 + 8 * types.len();
    let mut type_dirs = Vec::new();
    for (_, entries) in types {
        type_dirs.push(cursor);
        cursor += 16 + 8 * entries.len();
    }
    let mut lang_dirs = Vec::new();
    for _ in &leaves {
        lang_dirs.push(cursor);
        cursor += 16 + 8;
    }
    let mut data_entries = Vec::new();
    for _ in &leaves {
        data_entries.push(cursor);
        cursor += 16;
    }
    let mut strings = Vec::new();
    for (name, _) in &leaves {
        strings.push(cursor);
        if let Name::Str(s) = name {
            cursor += 2 + 2 * s.encode_utf16().count();
        }
    }
    cursor = cursor.div_ceil(4) * 4;
    let mut blobs = Vec::new();
    for (_, data) in &leaves {
        blobs.push(cursor);
        cursor = (cursor + data.len()).div_ceil(4) * 4;
    }

    let mut buf = vec![0u8; cursor];
    put_u16(&mut buf, 14, types.len() as u16);
    let mut leaf = 0;
    for (t, (type_id, entries)) in types.iter().enumerate() {
        put_u32(&mut buf, 16 + 8 * t, u32::from(*type_id));
        put_u32(&mut buf, 16 + 8 * t + 4, 0x8000_0000 | type_dirs[t] as u32);

        let dir = type_dirs[t];
        let named = entries.iter().filter(|(n, _)| matches!(n, Name::Str(_))).count();
        put_u16(&mut buf, dir + 12, named as u16);
        put_u16(&mut buf, dir + 14, (entries.len() - named) as u16);
        for (i, (name, data)) in entries.iter().enumerate() {
            let entry = dir + 16 + 8 * i;
            match name {
                Name::Id(id) => put_u32(&mut buf, entry, u32::from(*id)),
                Name::Str(s) => {
                    let at = strings[leaf];
                    let units: Vec<u16> = s.encode_utf16().collect();
                    put_u16(&mut buf, at, units.len() as u16);
                    for (k, u) in units.iter().enumerate() {
                        put_u16(&mut buf, at + 2 + 2 * k, *u);
                    }
                    put_u32(&mut buf, entry, 0x8000_0000 | at as u32);
                }
            }
            put_u32(&mut buf, entry + 4, 0x8000_0000 | lang_dirs[leaf] as u32);

            let lang = lang_dirs[leaf];
            put_u16(&mut buf, lang + 14, 1);
            put_u32(&mut buf, lang + 16, 0x0409);
            put_u32(&mut buf, lang + 20, data_entries[leaf] as u32);

            let data_entry = data_entries[leaf];
            put_u32(&mut buf, data_entry, SECTION_RVA + blobs[leaf] as u32);
            put_u32(&mut buf, data_entry + 4, data.len() as u32);

            buf[blobs[leaf]..blobs[leaf] + data.len()].copy_from_slice(data);
            leaf += 1;
        }
    }
    buf
}

/// Shell-link (`.lnk`) file with the fields the resolver reads.
#[derive(Default)]
pub(crate) struct LnkBuilder {
    target: Option<String>,
    relative_path: Option<String>,
    icon_location: Option<String>,
    icon_index: i32,
    icon_env: Option<String>,
}

impl LnkBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn target(mut self, path: &str) -> Self {
        self.target = Some(path.to_owned());
        self
    }

    pub(crate) fn relative_path(mut self, path: &str) -> Self {
        self.relative_path = Some(path.to_owned());
        self
    }

    pub(crate) fn icon(mut self, path: &str, index: i32) -> Self {
        self.icon_location = Some(path.to_owned());
        self.icon_index = index;
        self
    }

    pub(crate) fn icon_env(mut self, path: &str) -> Self {
        self.icon_env = Some(path.to_owned());
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut flags = 0x80u32;
        if self.target.is_some() {
            flags |= 0x2;
        }
        if self.relative_path.is_some() {
            flags |= 0x8;
        }
        if self.icon_location.is_some() {
            flags |= 0x40;
        }
        if self.icon_env.is_some() {
            flags |= 0x4000;
        }

        let mut out = vec![0u8; 0x4c];
        put_u32(&mut out, 0, 0x4c);
        out[4..20].copy_from_slice(&[
            0x01, 0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x46,
        ]);
        put_u32(&mut out, 0x14, flags);
        put_u32(&mut out, 0x38, self.icon_index as u32);
        put_u32(&mut out, 0x3c, 1);

        if let Some(target) = &self.target {
            let volume_id = [0x11u8, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0x10, 0, 0, 0, 0];
            let base_offset = 0x1c + volume_id.len();
            let suffix_offset = base_offset + target.len() + 1;
            let size = suffix_offset + 1;

            let mut info = vec![0u8; 0x1c];
            put_u32(&mut info, 0, size as u32);
            put_u32(&mut info, 4, 0x1c);
            put_u32(&mut info, 8, 1);
            put_u32(&mut info, 12, 0x1c);
            put_u32(&mut info, 16, base_offset as u32);
            put_u32(&mut info, 24, suffix_offset as u32);
            info.extend_from_slice(&volume_id);
            info.extend_from_slice(target.as_bytes());
            info.push(0);
            info.push(0);
            out.extend_from_slice(&info);
        }

        for s in [&self.relative_path, &self.icon_location].into_iter().flatten() {
            let units: Vec<u16> = s.encode_utf16().collect();
            out.extend_from_slice(&(units.len() as u16).to_le_bytes());
            for u in units {
                out.extend_from_slice(&u.to_le_bytes());
            }
        }

        if let Some(icon) = &self.icon_env {
            let mut block = vec![0u8; 0x314];
            put_u32(&mut block, 0, 0x314);
            put_u32(&mut block, 4, 0xA000_0007);
            block[8..8 + icon.len()].copy_from_slice(icon.as_bytes());
            for (k, u) in icon.encode_utf16().enumerate() {
                put_u16(&mut block, 8 + 260 + 2 * k, u);
            }
            out.extend_from_slice(&block);
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }
}

/// Shell stand-in that paints a solid glyph and counts lookups.
pub(crate) struct FakeShell {
    pub(crate) color: Option<[u8; 4]>,
    pub(crate) calls: AtomicUsize,
}

impl FakeShell {
    pub(crate) fn painting(color: [u8; 4]) -> Arc<Self> {
        Arc::new(Self {
            color: Some(color),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            color: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ShellIcons for FakeShell {
    fn icon_for(&self, path: &Path) -> Result<DynamicImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.color {
            Some(color) => Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(32, 32, Rgba(color)))),
            None => Err(IconError::PlatformUnavailable(path.display().to_string())),
        }
    }
}

/// Favicon stand-in that never touches the network.
pub(crate) struct FakeFavicons {
    pub(crate) color: [u8; 4],
    pub(crate) requests: Mutex<Vec<String>>,
}

impl FakeFavicons {
    pub(crate) fn painting(color: [u8; 4]) -> Arc<Self> {
        Arc::new(Self {
            color,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

impl FaviconSource for FakeFavicons {
    fn fetch(&self, page_url: &str) -> Result<DynamicImage> {
        self.requests.lock().push(page_url.to_owned());
        web_host(page_url)?;
        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba(self.color))))
    }
}

/// Shortcut metadata keyed by link path.
#[derive(Default)]
pub(crate) struct FakeShortcuts(pub(crate) HashMap<PathBuf, ShortcutTarget>);

impl FakeShortcuts {
    pub(crate) fn with(mut self, lnk: &Path, target: ShortcutTarget) -> Self {
        self.0.insert(lnk.to_path_buf(), target);
        self
    }
}

impl ShortcutMetadata for FakeShortcuts {
    fn read(&self, lnk: &Path) -> Result<ShortcutTarget> {
        self.0
            .get(lnk)
            .cloned()
            .ok_or_else(|| IconError::not_found(lnk.display().to_string()))
    }
}

/// Launcher stand-in that knows no games and counts lookups.
#[derive(Default)]
pub(crate) struct NoLauncher(pub(crate) AtomicUsize);

impl LauncherLocator for NoLauncher {
    fn locate(&self, url: &str) -> Result<PathBuf> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(IconError::not_found(format!("no manifest for {url}")))
    }
}

/// Every capability faked except module reading, which uses the real
/// memory-mapped parser.
pub(crate) fn fake_platform(shell: Arc<FakeShell>, favicons: Arc<FakeFavicons>) -> Platform {
    Platform {
        modules: Arc::new(MappedLoader),
        shortcuts: Arc::new(FakeShortcuts::default()),
        shell,
        favicons,
        launcher: Arc::new(NoLauncher::default()),
    }
}
