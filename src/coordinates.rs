//! Coordinate axis searches.
//!
//! Helpers for mapping coordinate-space requests (`bounds`, dates) onto
//! index space (`extent`, steps). Axes may be ascending or descending;
//! they are assumed monotone.

use crate::array::VariantArray;
use crate::error::{Error, Result};

/// Index of the value in `coords` closest to `value`.
pub fn index_of(coords: &[f64], value: f64) -> Option<usize> {
    if coords.is_empty() {
        return None;
    }
    let mut best = 0;
    let mut best_d = (coords[0] - value).abs();
    for (i, c) in coords.iter().enumerate().skip(1) {
        let d = (c - value).abs();
        if d < best_d {
            best = i;
            best_d = d;
        }
    }
    Some(best)
}

/// First index with `coords[i] >= value` on an ascending axis.
pub fn lower_bound(coords: &[f64], value: f64) -> Option<usize> {
    coords.iter().position(|c| *c >= value)
}

/// Last index with `coords[i] <= value` on an ascending axis.
pub fn upper_bound(coords: &[f64], value: f64) -> Option<usize> {
    coords.iter().rposition(|c| *c <= value)
}

/// Inclusive index span of one axis covering `[lo, hi]`.
///
/// The span is the smallest index interval whose coordinate values
/// contain the requested interval, clamped to the axis. A request
/// entirely outside the axis is a semantic error.
fn axis_span(coords: &[f64], lo: f64, hi: f64, axis: &str) -> Result<(u64, u64)> {
    if coords.is_empty() {
        return Err(Error::semantic(format!("{axis} axis is empty")));
    }
    let n = coords.len();
    if n == 1 {
        return Ok((0, 0));
    }
    let ascending = coords[0] <= coords[n - 1];
    let (axis_lo, axis_hi) = if ascending {
        (coords[0], coords[n - 1])
    } else {
        (coords[n - 1], coords[0])
    };
    if hi < axis_lo || lo > axis_hi {
        return Err(Error::semantic(format!(
            "requested {axis} bounds [{lo}, {hi}] are outside the domain [{axis_lo}, {axis_hi}]"
        )));
    }
    if ascending {
        // widest cover: step one out from the strict interior
        let i0 = coords.iter().rposition(|c| *c <= lo).unwrap_or(0);
        let i1 = coords.iter().position(|c| *c >= hi).unwrap_or(n - 1);
        Ok((i0 as u64, i1 as u64))
    } else {
        let i0 = coords.iter().rposition(|c| *c >= hi).unwrap_or(0);
        let i1 = coords.iter().position(|c| *c <= lo).unwrap_or(n - 1);
        Ok((i0 as u64, i1 as u64))
    }
}

/// Convert coordinate `bounds` to the inclusive `extent` covering them.
pub fn bounds_to_extent(
    bounds: &[f64; 6],
    x: &VariantArray,
    y: &VariantArray,
    z: &VariantArray,
) -> Result<[u64; 6]> {
    let (x, y, z) = (x.to_f64_vec()?, y.to_f64_vec()?, z.to_f64_vec()?);
    let (i0, i1) = axis_span(&x, bounds[0], bounds[1], "x")?;
    let (j0, j1) = axis_span(&y, bounds[2], bounds[3], "y")?;
    let (k0, k1) = axis_span(&z, bounds[4], bounds[5], "z")?;
    Ok([i0, i1, j0, j1, k0, k1])
}

/// Back-fill coordinate bounds from an extent.
pub fn extent_to_bounds(
    extent: &[u64; 6],
    x: &VariantArray,
    y: &VariantArray,
    z: &VariantArray,
) -> Result<[f64; 6]> {
    Ok([
        x.get_f64(extent[0] as usize)?,
        x.get_f64(extent[1] as usize)?,
        y.get_f64(extent[2] as usize)?,
        y.get_f64(extent[3] as usize)?,
        z.get_f64(extent[4] as usize)?,
        z.get_f64(extent[5] as usize)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(v: Vec<f64>) -> VariantArray {
        VariantArray::from_vec(v)
    }

    #[test]
    fn test_bounds_to_extent_exact_coordinates() {
        let x = axis(vec![0.0, 10.0, 20.0, 30.0]);
        let y = axis(vec![0.0, 5.0, 10.0]);
        let z = axis(vec![0.0]);
        let extent =
            bounds_to_extent(&[10.0, 20.0, 0.0, 5.0, 0.0, 0.0], &x, &y, &z).unwrap();
        assert_eq!(extent, [1, 2, 0, 1, 0, 0]);
    }

    #[test]
    fn test_bounds_to_extent_covers_interior_values() {
        let x = axis(vec![0.0, 10.0, 20.0, 30.0]);
        let y = axis(vec![0.0, 5.0]);
        let z = axis(vec![0.0]);
        // 12.5 lies between points; the cover extends outward
        let extent =
            bounds_to_extent(&[12.5, 12.5, 0.0, 5.0, 0.0, 0.0], &x, &y, &z).unwrap();
        assert_eq!(extent[0], 1);
        assert_eq!(extent[1], 2);
    }

    #[test]
    fn test_descending_axis() {
        let y = axis(vec![10.0, 0.0, -10.0]);
        let x = axis(vec![0.0, 1.0]);
        let z = axis(vec![0.0]);
        let extent =
            bounds_to_extent(&[0.0, 1.0, -10.0, 0.0, 0.0, 0.0], &x, &y, &z).unwrap();
        assert_eq!((extent[2], extent[3]), (1, 2));
    }

    #[test]
    fn test_out_of_domain_is_error() {
        let x = axis(vec![0.0, 10.0]);
        let y = axis(vec![0.0, 10.0]);
        let z = axis(vec![0.0]);
        assert!(bounds_to_extent(&[50.0, 60.0, 0.0, 10.0, 0.0, 0.0], &x, &y, &z).is_err());
    }

    #[test]
    fn test_extent_to_bounds_round_trip() {
        let x = axis(vec![0.0, 10.0, 20.0]);
        let y = axis(vec![5.0, 15.0]);
        let z = axis(vec![0.0]);
        let bounds = extent_to_bounds(&[0, 2, 0, 1, 0, 0], &x, &y, &z).unwrap();
        assert_eq!(bounds, [0.0, 20.0, 5.0, 15.0, 0.0, 0.0]);
        assert_eq!(bounds_to_extent(&bounds, &x, &y, &z).unwrap(), [0, 2, 0, 1, 0, 0]);
    }

    #[test]
    fn test_bound_searches() {
        let t = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(lower_bound(&t, 1.5), Some(2));
        assert_eq!(upper_bound(&t, 1.5), Some(1));
        assert_eq!(lower_bound(&t, 5.0), None);
        assert_eq!(index_of(&t, 2.2), Some(2));
    }
}
