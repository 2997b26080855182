//! Icon-container (`.ico`) and icon-group directory decoding.
//!
//! Layout of a container file:
//!
//! ```text
//! ICONDIR       6 bytes   reserved(2) type(2) count(2)
//! ICONDIRENTRY 16 bytes   width(1) height(1) colors(1) reserved(1)
//!                         planes(2) bit_count(2) bytes_in_res(4) image_offset(4)
//! ```
//!
//! A group directory stored inside an executable uses the same header but
//! 14-byte entries that end in a resource id instead of a file offset.
//!
//! Frame payloads are either a complete PNG stream or a headerless DIB
//! (`BITMAPINFOHEADER` + XOR pixels + AND mask).

use image::{DynamicImage, ImageFormat};

use crate::error::{IconError, Result};
use crate::utils::bytes::{i32_at, slice_at, u16_at, u32_at};

pub const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G'];

const DIR_HEADER_LEN: usize = 6;
const CONTAINER_ENTRY_LEN: usize = 16;
const GROUP_ENTRY_LEN: usize = 14;
const BITMAPINFOHEADER_LEN: u32 = 40;

/// Where a frame's payload lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSource {
    /// Byte offset inside the container file.
    Offset(u32),
    /// `RT_ICON` resource id inside a module.
    ResourceId(u16),
}

/// One directory entry, as far as frame selection cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCandidate {
    /// Effective width; a declared width of 0 means 256.
    pub width: u32,
    pub byte_len: u32,
    pub source: FrameSource,
}

pub fn effective_width(declared: u8) -> u32 {
    if declared == 0 { 256 } else { u32::from(declared) }
}

/// Picks the widest frame. Ties keep the first one seen.
pub fn largest_frame<I>(frames: I) -> Option<FrameCandidate>
where
    I: IntoIterator<Item = FrameCandidate>,
{
    let mut best: Option<FrameCandidate> = None;
    for frame in frames {
        if best.is_none_or(|b| frame.width > b.width) {
            best = Some(frame);
        }
    }
    best
}

fn directory_entries(data: &[u8], entry_len: usize) -> Result<impl Iterator<Item = &[u8]>> {
    let count = u16_at(data, 4).ok_or_else(|| IconError::decode("icon directory header truncated"))?;
    if count == 0 {
        return Err(IconError::decode("icon directory declares no frames"));
    }
    let table = slice_at(data, DIR_HEADER_LEN, usize::from(count) * entry_len)
        .ok_or_else(|| IconError::decode(format!("icon directory truncated ({count} entries)")))?;
    Ok(table.chunks_exact(entry_len))
}

/// Reads the directory of a standalone container file.
pub fn container_frames(data: &[u8]) -> Result<Vec<FrameCandidate>> {
    directory_entries(data, CONTAINER_ENTRY_LEN)?
        .map(|entry| {
            let byte_len = u32_at(entry, 8).ok_or_else(|| IconError::decode("entry truncated"))?;
            let offset = u32_at(entry, 12).ok_or_else(|| IconError::decode("entry truncated"))?;
            Ok(FrameCandidate {
                width: effective_width(entry[0]),
                byte_len,
                source: FrameSource::Offset(offset),
            })
        })
        .collect()
}

/// Reads an `RT_GROUP_ICON` directory.
pub fn group_frames(data: &[u8]) -> Result<Vec<FrameCandidate>> {
    directory_entries(data, GROUP_ENTRY_LEN)?
        .map(|entry| {
            let byte_len = u32_at(entry, 8).ok_or_else(|| IconError::decode("entry truncated"))?;
            let id = u16_at(entry, 12).ok_or_else(|| IconError::decode("entry truncated"))?;
            Ok(FrameCandidate {
                width: effective_width(entry[0]),
                byte_len,
                source: FrameSource::ResourceId(id),
            })
        })
        .collect()
}

/// Decodes the widest frame of a container file.
pub fn decode_container(data: &[u8]) -> Result<DynamicImage> {
    let best = largest_frame(container_frames(data)?)
        .ok_or_else(|| IconError::decode("icon directory is empty"))?;
    let FrameSource::Offset(offset) = best.source else {
        return Err(IconError::decode("container entry without file offset"));
    };
    if best.byte_len == 0 {
        return Err(IconError::decode("selected frame is empty"));
    }
    let payload = slice_at(data, offset as usize, best.byte_len as usize).ok_or_else(|| {
        IconError::decode(format!(
            "frame at {offset}+{} lies outside the {}-byte buffer",
            best.byte_len,
            data.len()
        ))
    })?;
    decode_frame(payload, best.width)
}

/// Decodes a single frame payload, PNG or headerless DIB.
pub fn decode_frame(payload: &[u8], declared_width: u32) -> Result<DynamicImage> {
    if payload.starts_with(PNG_SIGNATURE) {
        return Ok(image::load_from_memory_with_format(payload, ImageFormat::Png)?);
    }
    let wrapped = wrap_dib(payload, declared_width);
    Ok(image::load_from_memory_with_format(&wrapped, ImageFormat::Ico)?)
}

/// Prefixes a bare DIB with a one-frame container header so a generic ICO
/// decoder accepts it.
///
/// Dimensions come from the DIB's own `BITMAPINFOHEADER` when it is
/// readable (its height covers XOR and AND planes, hence the halving), and
/// from the directory's declared width otherwise.
pub fn wrap_dib(dib: &[u8], declared_width: u32) -> Vec<u8> {
    let (width, height, bit_count) = dib_dimensions(dib)
        .unwrap_or((declared_width, declared_width, 32));
    let dim_byte = |v: u32| if v >= 256 { 0u8 } else { v as u8 };
    let image_offset = (DIR_HEADER_LEN + CONTAINER_ENTRY_LEN) as u32;

    let mut out = Vec::with_capacity(image_offset as usize + dib.len());
    out.extend_from_slice(&0u16.to_le_bytes()); // reserved
    out.extend_from_slice(&1u16.to_le_bytes()); // type: icon
    out.extend_from_slice(&1u16.to_le_bytes()); // count
    out.push(dim_byte(width));
    out.push(dim_byte(height));
    out.push(0); // palette size
    out.push(0); // reserved
    out.extend_from_slice(&1u16.to_le_bytes()); // planes
    out.extend_from_slice(&bit_count.to_le_bytes());
    out.extend_from_slice(&(dib.len() as u32).to_le_bytes());
    out.extend_from_slice(&image_offset.to_le_bytes());
    out.extend_from_slice(dib);
    out
}

fn dib_dimensions(dib: &[u8]) -> Option<(u32, u32, u16)> {
    if u32_at(dib, 0)? < BITMAPINFOHEADER_LEN {
        return None;
    }
    let width = i32_at(dib, 4)?.unsigned_abs();
    let height = i32_at(dib, 8)?.unsigned_abs() / 2;
    let bit_count = u16_at(dib, 14)?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height, bit_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn center(image: &DynamicImage) -> [u8; 4] {
        let rgba = image.to_rgba8();
        rgba.get_pixel(rgba.width() / 2, rgba.height() / 2).0
    }

    #[test]
    fn picks_the_256_frame_among_standard_sizes() {
        let data = fixtures::ico(&[
            (16, fixtures::solid_png(16, [255, 0, 0, 255])),
            (32, fixtures::solid_png(32, [0, 255, 0, 255])),
            (0, fixtures::solid_png(256, [0, 0, 255, 255])),
            (48, fixtures::solid_png(48, [9, 9, 9, 255])),
        ]);

        let image = decode_container(&data).unwrap();
        assert_eq!(image.width(), 256);
        assert_eq!(center(&image), [0, 0, 255, 255]);
    }

    #[test]
    fn ties_keep_first_frame() {
        let frames = [
            FrameCandidate { width: 48, byte_len: 1, source: FrameSource::ResourceId(7) },
            FrameCandidate { width: 48, byte_len: 1, source: FrameSource::ResourceId(8) },
            FrameCandidate { width: 16, byte_len: 1, source: FrameSource::ResourceId(9) },
        ];
        assert_eq!(largest_frame(frames).unwrap().source, FrameSource::ResourceId(7));
        assert_eq!(largest_frame(Vec::new()), None);
    }

    #[test]
    fn zero_width_means_256() {
        assert_eq!(effective_width(0), 256);
        assert_eq!(effective_width(255), 255);
    }

    #[test]
    fn zero_count_is_rejected() {
        let data = [0u8, 0, 1, 0, 0, 0];
        assert!(matches!(decode_container(&data), Err(IconError::DecodeFailure(_))));
    }

    #[test]
    fn truncated_directory_is_rejected() {
        let data = fixtures::ico(&[
            (16, fixtures::solid_png(16, [1, 2, 3, 255])),
            (32, fixtures::solid_png(32, [1, 2, 3, 255])),
        ]);
        for cut in [0, 3, 6, 21, 30] {
            assert!(decode_container(&data[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn payload_outside_buffer_is_rejected() {
        let mut data = fixtures::ico(&[(16, fixtures::solid_png(16, [1, 2, 3, 255]))]);
        // point the only entry far past the end
        data[18..22].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode_container(&data).is_err());

        let mut data = fixtures::ico(&[(16, fixtures::solid_png(16, [1, 2, 3, 255]))]);
        data[14..18].copy_from_slice(&0x00ff_ffffu32.to_le_bytes());
        assert!(decode_container(&data).is_err());
    }

    #[test]
    fn garbage_never_panics() {
        let mut seed = 0x2545_f491u32;
        for len in 0..200usize {
            let data: Vec<u8> = (0..len)
                .map(|_| {
                    seed ^= seed << 13;
                    seed ^= seed >> 17;
                    seed ^= seed << 5;
                    seed as u8
                })
                .collect();
            let _ = decode_container(&data);
            let _ = group_frames(&data);
            let _ = decode_frame(&data, 32);
        }
    }

    #[test]
    fn bare_dib_frame_is_rewrapped() {
        let data = fixtures::ico(&[
            (16, fixtures::solid_png(16, [255, 0, 0, 255])),
            (32, fixtures::solid_dib(32, [10, 200, 30, 255])),
        ]);

        let image = decode_container(&data).unwrap();
        assert_eq!((image.width(), image.height()), (32, 32));
        let [r, g, b, _] = center(&image);
        assert_eq!([r, g, b], [10, 200, 30]);
    }

    #[test]
    fn wrapped_dib_header_uses_dib_dimensions() {
        let dib = fixtures::solid_dib(48, [0, 0, 0, 255]);
        let wrapped = wrap_dib(&dib, 16);
        assert_eq!(&wrapped[..6], &[0, 0, 1, 0, 1, 0]);
        assert_eq!(wrapped[6], 48);
        assert_eq!(wrapped[7], 48);
        assert_eq!(u32_at(&wrapped, 14), Some(dib.len() as u32));
        assert_eq!(u32_at(&wrapped, 18), Some(22));
        assert_eq!(&wrapped[22..], &dib[..]);
    }

    #[test]
    fn wrapped_header_falls_back_to_declared_width() {
        let wrapped = wrap_dib(&[1, 2, 3], 256);
        assert_eq!(wrapped[6], 0);
        assert_eq!(wrapped[7], 0);
    }

    #[test]
    fn group_directory_reports_resource_ids() {
        let dir = fixtures::group_dir(&[(32, 5), (0, 6), (48, 7)]);
        let frames = group_frames(&dir).unwrap();
        assert_eq!(frames.len(), 3);
        let best = largest_frame(frames).unwrap();
        assert_eq!(best.width, 256);
        assert_eq!(best.source, FrameSource::ResourceId(6));
    }
}
