//! `units`
//!
//! Conversions between the pixel grid that designs are rasterised on and
//! the millimetres that the machine moves in.

/// Millimetres in one inch.
pub const MM_PER_INCH: f64 = 25.4;

/// Converts a pixel coordinate at a given resolution into millimetres.
///
/// # Arguments
/// * `pixels`: The coordinate, in pixels.
/// * `resolution_dpi`: Pixels per inch. Assumed to be positive.
///
/// # Returns
/// The same coordinate in mm.
#[must_use]
pub fn px_to_mm(pixels: f64, resolution_dpi: f64) -> f64 {
    pixels / resolution_dpi * MM_PER_INCH
}

/// Converts millimetres back into pixels at a given resolution.
///
/// # Arguments
/// * `mm`: The coordinate, in mm.
/// * `resolution_dpi`: Pixels per inch. Assumed to be positive.
///
/// # Returns
/// The same coordinate in pixels.
#[must_use]
pub fn mm_to_px(mm: f64, resolution_dpi: f64) -> f64 {
    mm / MM_PER_INCH * resolution_dpi
}

/// Mirrors a value about an axis of the given length if `flip` is set.
///
/// Applying this twice with the same `length` returns the original value.
///
/// # Arguments
/// * `mm`: The coordinate, in mm.
/// * `length`: The length of the bed along this axis, in mm.
/// * `flip`: Whether to mirror.
#[must_use]
pub fn flip(mm: f64, length: f64, flip: bool) -> f64 {
    if flip {
        length - mm
    } else {
        mm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_px_to_mm() {
        assert!((px_to_mm(500.0, 500.0) - 25.4).abs() < 1e-9, "one inch");
        assert!((px_to_mm(0.0, 300.0)).abs() < 1e-12, "origin");
        assert!((px_to_mm(96.0, 96.0) - 25.4).abs() < 1e-9, "one inch at 96dpi");
    }

    #[test]
    fn test_unit_round_trip() {
        for resolution in [1.0, 72.0, 96.0, 250.0, 333.0, 500.0, 1000.0] {
            for px in [0.0, 0.5, 1.0, 17.0, 499.0, 12_345.0, 1_000_000.0] {
                let back = mm_to_px(px_to_mm(px, resolution), resolution);
                assert!(
                    (back - px).abs() <= 0.5,
                    "{px}px at {resolution}dpi came back as {back}"
                );
            }
        }
    }

    #[test]
    fn test_flip_is_involution() {
        for value in [0.0, 25.4, 150.0, 299.9, 300.0, -10.0] {
            assert_eq!(flip(value, 300.0, false), value, "no flip");
            let twice = flip(flip(value, 300.0, true), 300.0, true);
            assert!((twice - value).abs() < 1e-9, "flipping {value} twice");
        }
        assert!((flip(25.4, 300.0, true) - 274.6).abs() < 1e-9, "flipped");
    }
}
