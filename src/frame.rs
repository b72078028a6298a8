//! Frame geometry and views over shared frame memory.
//!
//! - `FrameGeometry`: compiled-in image layout (width, height, bits per pixel).
//! - `FrameView`: borrowed overlay on frame memory: the shared buffer inside a
//!   locked section of the owning `FrameSource`, or an `OwnedFrame`.
//! - `OwnedFrame`: a copy taken under the lock, safe to use after release.
//!
//! Geometry is not negotiated with the producer. A producer writing a different
//! layout yields wrongly decoded images, not an error.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

/// 848x480 RGB, the default camera profile.
pub const GEOMETRY_848X480: FrameGeometry = FrameGeometry::new(848, 480, 24);

/// 1280x960 RGB, the high-resolution camera profile.
pub const GEOMETRY_1280X960: FrameGeometry = FrameGeometry::new(1280, 960, 24);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
}

impl FrameGeometry {
    pub const fn new(width: u32, height: u32, bits_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            bits_per_pixel,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel / 8) as usize
    }

    /// Number of bytes a single frame occupies.
    pub fn frame_len(&self) -> Result<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(self.bytes_per_pixel()))
            .ok_or_else(|| anyhow!("frame dimensions overflow: {}", self))
    }
}

impl std::fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.bits_per_pixel)
    }
}

// ----------------------------------------------------------------------------
// FrameView: borrowed, lock-scoped
// ----------------------------------------------------------------------------

/// Read-only image overlay on the current contents of a shared buffer.
///
/// Over shared memory the lifetime ties the view to the locked section it was
/// created in, so it cannot outlive the lock. Copy with `to_owned_frame` to
/// keep the pixels.
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    pixels: &'a [u8],
    geometry: FrameGeometry,
}

impl<'a> FrameView<'a> {
    /// Overlay `geometry` on the start of `buffer`. Trailing bytes are ignored.
    pub fn new(buffer: &'a [u8], geometry: FrameGeometry) -> Result<Self> {
        let len = geometry.frame_len()?;
        if buffer.len() < len {
            return Err(anyhow!(
                "buffer holds {} bytes but a {} frame needs {}",
                buffer.len(),
                geometry,
                len
            ));
        }
        Ok(Self {
            pixels: &buffer[..len],
            geometry,
        })
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.geometry.bits_per_pixel
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }

    pub fn to_owned_frame(&self) -> OwnedFrame {
        OwnedFrame {
            data: self.pixels.to_vec(),
            geometry: self.geometry,
        }
    }
}

impl std::fmt::Debug for FrameView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameView")
            .field("geometry", &self.geometry)
            .field("len", &self.pixels.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// OwnedFrame: copy taken under the lock
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct OwnedFrame {
    data: Vec<u8>,
    geometry: FrameGeometry,
}

impl OwnedFrame {
    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// View over the copy, usable without any lock.
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            pixels: &self.data,
            geometry: self.geometry,
        }
    }

    /// Convert to an RGB image for encoding. Alpha is dropped, gray is expanded.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let FrameGeometry {
            width,
            height,
            bits_per_pixel,
        } = self.geometry;
        let data = self.data.clone();
        let image = match bits_per_pixel {
            24 => RgbImage::from_raw(width, height, data),
            32 => RgbaImage::from_raw(width, height, data)
                .map(|rgba| DynamicImage::ImageRgba8(rgba).into_rgb8()),
            8 => GrayImage::from_raw(width, height, data)
                .map(|gray| DynamicImage::ImageLuma8(gray).into_rgb8()),
            other => return Err(anyhow!("unsupported pixel depth: {} bpp", other)),
        };
        image.ok_or_else(|| anyhow!("frame buffer does not match {}", self.geometry))
    }
}

impl std::fmt::Debug for OwnedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedFrame")
            .field("geometry", &self.geometry)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_len_matches_geometry() -> Result<()> {
        assert_eq!(GEOMETRY_848X480.frame_len()?, 848 * 480 * 3);
        assert_eq!(GEOMETRY_1280X960.frame_len()?, 1280 * 960 * 3);
        assert_eq!(GEOMETRY_848X480.bytes_per_pixel(), 3);
        Ok(())
    }

    #[test]
    fn frame_len_overflow_is_rejected() {
        let geometry = FrameGeometry::new(u32::MAX, u32::MAX, 32);
        if usize::BITS == 64 {
            // u32::MAX^2 * 4 overflows u64.
            assert!(geometry.frame_len().is_err());
        }
    }

    #[test]
    fn view_rejects_short_buffer() {
        let geometry = FrameGeometry::new(4, 4, 24);
        let buffer = vec![0u8; 47];
        assert!(FrameView::new(&buffer, geometry).is_err());
    }

    #[test]
    fn view_trims_trailing_bytes() -> Result<()> {
        let geometry = FrameGeometry::new(2, 2, 24);
        let buffer: Vec<u8> = (0..20).collect();
        let view = FrameView::new(&buffer, geometry)?;
        assert_eq!(view.pixels().len(), 12);
        assert_eq!(view.width(), 2);
        assert_eq!(view.height(), 2);
        let owned = view.to_owned_frame();
        assert_eq!(owned.pixels(), &buffer[..12]);
        assert_eq!(owned.view().pixels(), &buffer[..12]);
        assert_eq!(owned.view().geometry(), geometry);
        Ok(())
    }

    #[test]
    fn owned_frame_converts_rgba_and_gray() -> Result<()> {
        let rgba = [10u8, 20, 30, 255, 40, 50, 60, 0];
        let frame = FrameView::new(&rgba, FrameGeometry::new(2, 1, 32))?.to_owned_frame();
        let rgb = frame.to_rgb_image()?;
        assert_eq!(rgb.get_pixel(0, 0).0, [10, 20, 30]);
        assert_eq!(rgb.get_pixel(1, 0).0, [40, 50, 60]);

        let gray = [7u8, 9];
        let frame = FrameView::new(&gray, FrameGeometry::new(2, 1, 8))?.to_owned_frame();
        assert_eq!(frame.to_rgb_image()?.get_pixel(1, 0).0, [9, 9, 9]);
        Ok(())
    }

    #[test]
    fn owned_frame_rejects_unknown_depth() -> Result<()> {
        let data = [0u8; 4];
        let frame = FrameView::new(&data, FrameGeometry::new(1, 1, 16))?.to_owned_frame();
        assert!(frame.to_rgb_image().is_err());
        Ok(())
    }
}
