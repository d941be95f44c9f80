//! Hilbert curve mapping from coordinates to tree keys.
//!
//! The Hilbert curve is a continuous space-filling curve that maps 2D
//! coordinates to a 1D index while preserving spatial locality: points close
//! on the map stay close along the curve, so sorting records by their Hilbert
//! key clusters neighbours into the same leaves.
//!
//! The index engine only ever compares keys; this module is what loaders use
//! to produce them.

use crate::record::HilbertKey;

/// Maximum order for Hilbert curve encoding (32 bits per axis)
pub const MAX_HILBERT_ORDER: u32 = 32;

/// Grid order used when callers have no better choice (256 x 256 cells)
pub const DEFAULT_PRECISION: u32 = 8;

/// Latitude/longitude extent that coordinates are normalized against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl GeoBounds {
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        }
    }

    /// The whole globe.
    pub fn world() -> Self {
        Self::new(-90.0, 90.0, -180.0, 180.0)
    }

    /// Tightest bounds around `(lat, lon)` points; `None` for no points.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut points = points.into_iter();
        let (lat, lon) = points.next()?;
        let mut bounds = Self::new(lat, lat, lon, lon);
        for (lat, lon) in points {
            bounds.lat_min = bounds.lat_min.min(lat);
            bounds.lat_max = bounds.lat_max.max(lat);
            bounds.lon_min = bounds.lon_min.min(lon);
            bounds.lon_max = bounds.lon_max.max(lon);
        }
        Some(bounds)
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.lat_min..=self.lat_max).contains(&lat) && (self.lon_min..=self.lon_max).contains(&lon)
    }
}

/// Encodes 2D coordinates to a Hilbert curve index.
///
/// # Arguments
/// * `x` - X coordinate (normalized to [0, 1])
/// * `y` - Y coordinate (normalized to [0, 1])
/// * `order` - Hilbert curve order (1-32, higher = more precision)
///
/// # Example
/// ```
/// use lstree::hilbert::hilbert_index;
///
/// let index = hilbert_index(0.5, 0.5, 16);
/// assert!(index < (1u64 << 32)); // At order 16, max index is 2^32-1
/// ```
pub fn hilbert_index(x: f64, y: f64, order: u32) -> HilbertKey {
    debug_assert!((0.0..=1.0).contains(&x), "x must be in [0,1]");
    debug_assert!((0.0..=1.0).contains(&y), "y must be in [0,1]");
    debug_assert!(order > 0 && order <= MAX_HILBERT_ORDER, "order must be 1-32");

    let n = 1u64 << order;
    let xi = ((x * (n - 1) as f64) as u64).min(n - 1);
    let yi = ((y * (n - 1) as f64) as u64).min(n - 1);
    xy2d(n, xi, yi)
}

/// Hilbert key of a geographic point on a `2^precision` square grid laid
/// over `bounds`. Longitude runs along x, latitude along y; points outside
/// the bounds are clamped onto the grid edge.
///
/// # Example
/// ```
/// use lstree::hilbert::{hilbert_key, GeoBounds};
///
/// let bounds = GeoBounds::new(39.0, 41.0, 116.0, 117.0);
/// let key = hilbert_key(40.0, 116.5, &bounds, 8);
/// assert!(key < 1 << 16);
/// ```
pub fn hilbert_key(lat: f64, lon: f64, bounds: &GeoBounds, precision: u32) -> HilbertKey {
    let x = normalize(lon, bounds.lon_min, bounds.lon_max);
    let y = normalize(lat, bounds.lat_min, bounds.lat_max);
    hilbert_index(x, y, precision)
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range > 0.0 && value.is_finite() {
        ((value - min) / range).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Converts (x, y) grid coordinates to their distance along the curve.
fn xy2d(n: u64, x: u64, y: u64) -> u64 {
    let mut d = 0u64;
    let mut x = x;
    let mut y = y;
    let mut s = n / 2;

    while s > 0 {
        let rx = ((x & s) > 0) as u64;
        let ry = ((y & s) > 0) as u64;
        d += s * s * ((3 * rx) ^ ry);
        rotate(n, &mut x, &mut y, rx, ry);
        s /= 2;
    }

    d
}

/// Rotates and reflects the quadrant so the sub-curve has the right orientation.
fn rotate(n: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = n.wrapping_sub(1).wrapping_sub(*x);
            *y = n.wrapping_sub(1).wrapping_sub(*y);
        }
        std::mem::swap(x, y);
    }
}
