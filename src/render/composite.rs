use crate::foundation::core::{BandSpecification, ImageSize, OutputBuffer};
use crate::foundation::error::{BandError, BandResult};

/// Caller-side assembly of band buffers into one RGBA8 frame.
///
/// Each relayed buffer covers only its own band, so placing the latest buffer of every band
/// yields the current state of the whole image. Pixels of bands that have not reported yet stay
/// transparent black.
#[derive(Clone, Debug)]
pub struct FrameCompositor {
    size: ImageSize,
    data: Vec<u8>,
    placed: u64,
}

impl FrameCompositor {
    /// Create a transparent frame of `size`.
    pub fn new(size: ImageSize) -> Self {
        Self {
            size,
            data: vec![0; size.rgba_len()],
            placed: 0,
        }
    }

    /// Frame dimensions.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Number of buffers placed so far.
    pub fn placed(&self) -> u64 {
        self.placed
    }

    /// Copy `buffer` into the rows described by `band`.
    pub fn place(&mut self, band: &BandSpecification, buffer: &OutputBuffer) -> BandResult<()> {
        if band.image_size() != self.size {
            return Err(BandError::validation(format!(
                "band belongs to a {}x{} image, frame is {}x{}",
                band.image_width, band.image_height, self.size.width, self.size.height
            )));
        }
        band.validate()?;
        if buffer.len() != band.rgba_len() {
            return Err(BandError::validation(format!(
                "band buffer has {} bytes, expected {}",
                buffer.len(),
                band.rgba_len()
            )));
        }

        let frame_stride = self.size.width as usize * 4;
        let band_stride = band.draw_width as usize * 4;
        let x0 = band.draw_offset_x as usize * 4;
        if band_stride > 0 {
            for (r, src) in buffer.as_bytes().chunks_exact(band_stride).enumerate() {
                let start = (band.draw_offset_y as usize + r) * frame_stride + x0;
                self.data[start..start + band_stride].copy_from_slice(src);
            }
        }
        self.placed += 1;
        Ok(())
    }

    /// Borrow the frame bytes (RGBA8, row-major, row 0 at the top).
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Convert into an [`image::RgbaImage`] for encoding.
    pub fn into_image(self) -> BandResult<image::RgbaImage> {
        image::RgbaImage::from_raw(self.size.width, self.size.height, self.data)
            .ok_or_else(|| BandError::validation("frame buffer does not match its dimensions"))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/composite.rs"]
mod tests;
