use std::io::Cursor;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose};
use image::{DynamicImage, ImageFormat, RgbaImage, imageops::FilterType};

use crate::error::Result;

/// A fixed-size square glyph with premultiplied alpha.
///
/// Cloning shares the pixel buffer; the pixels never change after creation.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedIcon(Arc<RgbaImage>);

impl ResolvedIcon {
    /// Edge length in pixels.
    pub fn size(&self) -> u32 {
        self.0.width()
    }

    /// Pixels as stored, with color channels premultiplied by alpha.
    pub fn premultiplied(&self) -> &RgbaImage {
        &self.0
    }

    /// A straight-alpha copy, as most encoders and UI toolkits expect.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = (*self.0).clone();
        for px in out.pixels_mut() {
            let a = u32::from(px[3]);
            if a == 0 {
                px.0 = [0, 0, 0, 0];
                continue;
            }
            for c in &mut px.0[..3] {
                *c = ((u32::from(*c) * 255 + a / 2) / a).min(255) as u8;
            }
        }
        out
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.to_rgba_image()
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        Ok(buf)
    }

    /// PNG bytes, standard base64 alphabet.
    pub fn to_base64(&self) -> Result<String> {
        Ok(general_purpose::STANDARD.encode(self.to_png_bytes()?))
    }
}

fn premultiply(image: &mut RgbaImage) {
    for px in image.pixels_mut() {
        let a = u16::from(px[3]);
        for c in &mut px.0[..3] {
            *c = ((u16::from(*c) * a + 127) / 255) as u8;
        }
    }
}

/// Resamples any decoded frame into a `size`×`size` premultiplied raster.
///
/// Non-square sources are stretched to the square, as the shell does.
pub fn render_canonical(image: &DynamicImage, size: u32) -> ResolvedIcon {
    let size = size.max(1);
    let mut rgba = image.to_rgba8();
    premultiply(&mut rgba);

    if rgba.dimensions() != (size, size) {
        rgba = image::imageops::resize(&rgba, size, size, FilterType::CatmullRom);
        // bicubic overshoot can push color above alpha
        for px in rgba.pixels_mut() {
            let a = px[3];
            for c in &mut px.0[..3] {
                *c = (*c).min(a);
            }
        }
    }
    ResolvedIcon(Arc::new(rgba))
}

#[cfg(windows)]
pub(crate) use win::hicon_to_image;

#[cfg(windows)]
mod win {
    use std::mem::{self, MaybeUninit};

    use image::RgbaImage;
    use windows::Win32::{
        Graphics::Gdi::{
            BI_RGB, BITMAP, BITMAPINFO, BITMAPINFOHEADER, DIB_RGB_COLORS, DeleteObject, GetDC,
            GetDIBits, GetObjectW, HBITMAP, HDC, HGDIOBJ, ReleaseDC,
        },
        UI::WindowsAndMessaging::{DestroyIcon, GetIconInfo, HICON},
    };

    use crate::error::{IconError, Result};

    struct ScopedDc(HDC);

    impl Drop for ScopedDc {
        fn drop(&mut self) {
            if !self.0.0.is_null() {
                unsafe {
                    ReleaseDC(None, self.0);
                }
            }
        }
    }

    struct AutoBitmap(HBITMAP);

    impl Drop for AutoBitmap {
        fn drop(&mut self) {
            if !self.0.0.is_null() {
                unsafe {
                    let _ = DeleteObject(HGDIOBJ::from(self.0));
                }
            }
        }
    }

    pub(crate) struct AutoIcon(pub(crate) HICON);

    impl Drop for AutoIcon {
        fn drop(&mut self) {
            if !self.0.0.is_null() {
                unsafe {
                    let _ = DestroyIcon(self.0);
                }
            }
        }
    }

    fn gdi(msg: impl Into<String>) -> IconError {
        IconError::PlatformUnavailable(msg.into())
    }

    /// Copies an icon's color plane into an RGBA image. Takes ownership of
    /// `icon` and destroys it on every path.
    pub(crate) unsafe fn hicon_to_image(icon: HICON) -> Result<RgbaImage> {
        let _icon_guard = AutoIcon(icon);
        let bitmap_size = mem::size_of::<BITMAP>() as i32;

        let mut info = MaybeUninit::uninit();
        unsafe { GetIconInfo(icon, info.as_mut_ptr()) }
            .map_err(|e| gdi(format!("GetIconInfo failed: {e}")))?;
        let info = unsafe { info.assume_init() };

        let _hbm_mask = AutoBitmap(info.hbmMask);
        let _hbm_color = AutoBitmap(info.hbmColor);
        if info.hbmColor.0.is_null() {
            return Err(gdi("monochrome icon without a color plane"));
        }

        let mut bitmap: MaybeUninit<BITMAP> = MaybeUninit::uninit();
        let result = unsafe {
            GetObjectW(
                HGDIOBJ::from(info.hbmColor),
                bitmap_size,
                Some(bitmap.as_mut_ptr().cast()),
            )
        };
        if result != bitmap_size {
            return Err(gdi(format!(
                "GetObjectW failed, expected {bitmap_size}, got {result}"
            )));
        }
        let bitmap = unsafe { bitmap.assume_init() };

        let width = bitmap.bmWidth.unsigned_abs();
        let height = bitmap.bmHeight.unsigned_abs();
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| gdi("buffer size overflow"))?;
        let mut buf = vec![0u32; pixels];

        let dc = unsafe { GetDC(None) };
        if dc.0.is_null() {
            return Err(gdi("GetDC returned null"));
        }
        let _dc_guard = ScopedDc(dc);

        let mut bitmap_info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: bitmap.bmWidth,
                biHeight: -bitmap.bmHeight,
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let lines = unsafe {
            GetDIBits(
                dc,
                info.hbmColor,
                0,
                height,
                Some(buf.as_mut_ptr().cast()),
                &mut bitmap_info,
                DIB_RGB_COLORS,
            )
        };
        if lines != height as i32 {
            let last_error = windows::core::Error::from_win32();
            return Err(gdi(format!(
                "GetDIBits copied {lines} of {height} lines: {last_error}"
            )));
        }

        // legacy icons carry transparency only in the AND mask
        let opaque = buf.iter().all(|px| px >> 24 == 0);

        // BGRA -> RGBA
        let rgba = buf
            .iter()
            .flat_map(|px| {
                let [b, g, r, a] = px.to_le_bytes();
                [r, g, b, if opaque { 255 } else { a }]
            })
            .collect::<Vec<_>>();

        RgbaImage::from_raw(width, height, rgba)
            .ok_or_else(|| IconError::decode("pixel buffer smaller than the bitmap"))
    }
}
