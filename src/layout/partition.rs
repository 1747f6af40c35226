use crate::foundation::core::{Band, BandSpecification, ImageSize};
use crate::foundation::error::{BandError, BandResult};

/// Split `[0, total_extent)` into `unit_count` contiguous bands.
///
/// Every band has extent `total_extent / unit_count` except the last, which also absorbs the
/// remainder. Band `i` starts at `i * base`. When `total_extent < unit_count` the interior bands
/// are empty.
pub fn partition(total_extent: u32, unit_count: u32) -> BandResult<Vec<Band>> {
    if unit_count == 0 {
        return Err(BandError::validation("partition unit_count must be >= 1"));
    }

    let base = total_extent / unit_count;
    let remainder = total_extent % unit_count;
    let last = unit_count - 1;

    Ok((0..unit_count)
        .map(|i| Band {
            offset: i * base,
            extent: if i == last { base + remainder } else { base },
        })
        .collect())
}

/// Per-unit horizontal band specifications for an image of `size`.
pub fn band_specifications(size: ImageSize, unit_count: u32) -> BandResult<Vec<BandSpecification>> {
    Ok(partition(size.height, unit_count)?
        .into_iter()
        .map(|rows| BandSpecification::horizontal(size, rows))
        .collect())
}

#[cfg(test)]
#[path = "../../tests/unit/layout/partition.rs"]
mod tests;
