use std::fmt;

use crate::foundation::error::{BandError, BandResult};

/// Dense 0-based compute unit index (`0..unit_count`).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct UnitId(pub u32);

impl UnitId {
    /// Index into the orchestrator's handle table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run generation. Every `start` call opens a new, strictly larger run.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output image dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImageSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ImageSize {
    /// Create a size, rejecting a zero width.
    ///
    /// A zero height is legal: every band is then empty.
    pub fn new(width: u32, height: u32) -> BandResult<Self> {
        if width == 0 {
            return Err(BandError::validation("image width must be >= 1"));
        }
        Ok(Self { width, height })
    }

    /// Tightly packed RGBA8 byte length of the full image.
    pub fn rgba_len(self) -> usize {
        (self.width as usize) * (self.height as usize) * 4
    }
}

/// Half-open interval `[offset, offset + extent)` along one image axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Band {
    /// First row (or column) covered by the band.
    pub offset: u32,
    /// Number of rows (or columns) covered. May be zero.
    pub extent: u32,
}

impl Band {
    /// Exclusive end of the interval.
    pub fn end(self) -> u32 {
        self.offset + self.extent
    }

    /// Return `true` when the band covers nothing.
    pub fn is_empty(self) -> bool {
        self.extent == 0
    }
}

/// Everything a compute unit needs to render its band.
///
/// Geometry is fixed at initialization; `samples_per_pixel` and `random_seed` are filled in per
/// run, and `random_seed` is identical for every unit of the same run.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BandSpecification {
    /// Full output width, shared by all units.
    pub image_width: u32,
    /// Full output height, shared by all units.
    pub image_height: u32,
    /// Band origin column within the full image.
    pub draw_offset_x: u32,
    /// Band origin row within the full image (row 0 is the top).
    pub draw_offset_y: u32,
    /// Band width in pixels.
    pub draw_width: u32,
    /// Band height in pixels. Zero-height bands render as a no-op.
    pub draw_height: u32,
    /// Optional quality parameter supplied by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples_per_pixel: Option<u32>,
    /// Optional seed shared by all units of one run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
}

impl BandSpecification {
    /// Full-width specification for a horizontal band of `size`.
    pub fn horizontal(size: ImageSize, rows: Band) -> Self {
        Self {
            image_width: size.width,
            image_height: size.height,
            draw_offset_x: 0,
            draw_offset_y: rows.offset,
            draw_width: size.width,
            draw_height: rows.extent,
            samples_per_pixel: None,
            random_seed: None,
        }
    }

    /// Copy of this specification carrying per-run sampling parameters.
    pub fn with_sampling(&self, samples_per_pixel: Option<u32>, random_seed: Option<u64>) -> Self {
        Self {
            samples_per_pixel,
            random_seed,
            ..self.clone()
        }
    }

    /// Full image size the band belongs to.
    pub fn image_size(&self) -> ImageSize {
        ImageSize {
            width: self.image_width,
            height: self.image_height,
        }
    }

    /// Row interval covered by the band.
    pub fn rows(&self) -> Band {
        Band {
            offset: self.draw_offset_y,
            extent: self.draw_height,
        }
    }

    /// Return `true` when the band has no pixels.
    pub fn is_empty(&self) -> bool {
        self.draw_width == 0 || self.draw_height == 0
    }

    /// Tightly packed RGBA8 byte length of one band buffer.
    pub fn rgba_len(&self) -> usize {
        (self.draw_width as usize) * (self.draw_height as usize) * 4
    }

    /// Check that the band lies inside its image.
    pub fn validate(&self) -> BandResult<()> {
        let x_end = u64::from(self.draw_offset_x) + u64::from(self.draw_width);
        let y_end = u64::from(self.draw_offset_y) + u64::from(self.draw_height);
        if x_end > u64::from(self.image_width) || y_end > u64::from(self.image_height) {
            return Err(BandError::validation(format!(
                "band {}x{}+{}+{} exceeds image {}x{}",
                self.draw_width,
                self.draw_height,
                self.draw_offset_x,
                self.draw_offset_y,
                self.image_width,
                self.image_height
            )));
        }
        if self.samples_per_pixel == Some(0) {
            return Err(BandError::validation("samples_per_pixel must be >= 1"));
        }
        Ok(())
    }
}

/// Bytes emitted by a compute unit for the current rendered state of **its band only**.
///
/// Layout is RGBA8, row-major, tightly packed, `draw_width * draw_height * 4` bytes, with the
/// band's first row first. Callers place it with the accompanying [`BandSpecification`].
///
/// The buffer is moved, never copied: unit to orchestrator to caller. Units allocate a fresh
/// buffer per emission, so nothing upstream can observe or mutate a relayed buffer.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct OutputBuffer {
    data: Vec<u8>,
}

impl OutputBuffer {
    /// Take ownership of rendered bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Byte length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Return `true` when the buffer holds no bytes (empty bands).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Release the underlying allocation to the caller.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for OutputBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
