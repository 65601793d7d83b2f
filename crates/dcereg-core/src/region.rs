//! Registration region and spatial mask in the slice plane.

use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, Result};
use crate::image::ImageGeometry;

/// Axis-aligned pixel rectangle in the slice plane of the full-resolution
/// fixed image. For volumes it spans every slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Region covering a whole `width` x `height` slice.
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Check the region is non-empty and lies inside a `width` x `height` slice.
    pub fn validate(&self, width: usize, height: usize) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RegistrationError::invalid_config(format!(
                "region {}x{} is empty",
                self.width, self.height
            )));
        }
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        let inside = matches!((right, bottom), (Some(r), Some(b)) if r <= width && b <= height);
        if !inside {
            return Err(RegistrationError::invalid_config(format!(
                "region ({}, {}) {}x{} exceeds image bounds {}x{}",
                self.x, self.y, self.width, self.height, width, height
            )));
        }
        Ok(())
    }

    /// Whether the continuous pixel position `(x, y)` falls inside the region.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x as f64 - 0.5
            && x < (self.x + self.width) as f64 - 0.5
            && y >= self.y as f64 - 0.5
            && y < (self.y + self.height) as f64 - 0.5
    }

    /// Physical bounding box of the region extruded over `depth` slices.
    pub fn physical_bounds(&self, geometry: &ImageGeometry, depth: usize) -> ([f64; 3], [f64; 3]) {
        let xs = [self.x as f64, (self.x + self.width - 1) as f64];
        let ys = [self.y as f64, (self.y + self.height - 1) as f64];
        let zs = [0.0, depth.saturating_sub(1) as f64];

        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for &x in &xs {
            for &y in &ys {
                for &z in &zs {
                    let p = geometry.index_to_physical([x, y, z]);
                    for d in 0..3 {
                        lo[d] = lo[d].min(p[d]);
                        hi[d] = hi[d].max(p[d]);
                    }
                }
            }
        }
        (lo, hi)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}) {}x{}",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Polygon in pixel coordinates of the slice plane. Extruded through every
/// slice when the images are volumes.
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialMask {
    points: Vec<[f64; 2]>,
}

impl SpatialMask {
    pub fn new(points: Vec<[f64; 2]>) -> Result<Self> {
        if points.len() < 3 {
            return Err(RegistrationError::invalid_config(format!(
                "mask polygon needs at least 3 points, got {}",
                points.len()
            )));
        }
        if points.iter().flatten().any(|v| !v.is_finite()) {
            return Err(RegistrationError::invalid_config(
                "mask polygon has non-finite coordinates",
            ));
        }
        Ok(Self { points })
    }

    /// Parse the flat `x0, y0, x1, y1, ...` list a viewer ROI provides.
    pub fn from_flat(coords: &[f64]) -> Result<Self> {
        if coords.len() % 2 != 0 {
            return Err(RegistrationError::invalid_config(format!(
                "mask coordinate list has odd length {}",
                coords.len()
            )));
        }
        Self::new(coords.chunks_exact(2).map(|c| [c[0], c[1]]).collect())
    }

    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    /// Check every vertex lies on a `width` x `height` slice and that the
    /// polygon covers at least one pixel centre of `region`.
    pub fn validate(&self, region: &Region, width: usize, height: usize) -> Result<()> {
        if let Some([x, y]) = self
            .points
            .iter()
            .find(|[x, y]| *x < 0.0 || *y < 0.0 || *x > width as f64 || *y > height as f64)
        {
            return Err(RegistrationError::invalid_config(format!(
                "mask point ({x}, {y}) lies outside image bounds {width}x{height}"
            )));
        }
        let covers_region = (region.y..region.y + region.height).any(|y| {
            (region.x..region.x + region.width).any(|x| self.contains(x as f64, y as f64))
        });
        if !covers_region {
            return Err(RegistrationError::invalid_config(format!(
                "mask does not overlap region {region}"
            )));
        }
        Ok(())
    }

    /// Even-odd point-in-polygon test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = false;
        let n = self.points.len();
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = self.points[i];
            let [xj, yj] = self.points[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// The set of fixed-image points a metric may sample: region, optional mask,
/// expressed against the full-resolution fixed geometry so it applies
/// unchanged at every pyramid level.
#[derive(Clone, Debug)]
pub struct SampleDomain {
    pub region: Region,
    pub mask: Option<SpatialMask>,
    pub geometry: ImageGeometry,
    pub depth: usize,
}

impl SampleDomain {
    pub fn new(
        region: Region,
        mask: Option<SpatialMask>,
        geometry: ImageGeometry,
        depth: usize,
    ) -> Self {
        Self {
            region,
            mask,
            geometry,
            depth,
        }
    }

    pub fn contains_physical(&self, point: [f64; 3]) -> bool {
        let idx = self.geometry.physical_to_index(point);
        if !self.region.contains(idx[0], idx[1]) {
            return false;
        }
        self.mask
            .as_ref()
            .map_or(true, |mask| mask.contains(idx[0], idx[1]))
    }

    pub fn physical_bounds(&self) -> ([f64; 3], [f64; 3]) {
        self.region.physical_bounds(&self.geometry, self.depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_outside_bounds_rejected() {
        let r = Region::new(100, 0, 40, 10);
        assert!(matches!(
            r.validate(128, 128),
            Err(RegistrationError::InvalidConfiguration(_))
        ));
        assert!(Region::new(0, 0, 0, 5).validate(8, 8).is_err());
        assert!(Region::new(88, 0, 40, 10).validate(128, 128).is_ok());
    }

    #[test]
    fn test_region_overflowing_offset_rejected() {
        assert!(matches!(
            Region::new(usize::MAX, 0, 2, 10).validate(128, 128),
            Err(RegistrationError::InvalidConfiguration(_))
        ));
        assert!(Region::new(0, usize::MAX - 1, 4, 4).validate(128, 128).is_err());
    }

    #[test]
    fn test_mask_must_overlap_region() {
        let region = Region::new(0, 0, 20, 20);
        let inside = SpatialMask::from_flat(&[2.0, 2.0, 12.0, 2.0, 7.0, 12.0]).unwrap();
        assert!(inside.validate(&region, 64, 64).is_ok());

        let elsewhere = SpatialMask::from_flat(&[30.0, 30.0, 40.0, 30.0, 35.0, 40.0]).unwrap();
        assert!(elsewhere.validate(&region, 64, 64).is_err());

        let off_image =
            SpatialMask::from_flat(&[200.0, 200.0, 210.0, 200.0, 205.0, 210.0]).unwrap();
        assert!(matches!(
            off_image.validate(&region, 64, 64),
            Err(RegistrationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_mask_needs_three_points() {
        assert!(SpatialMask::from_flat(&[0.0, 0.0, 1.0, 1.0]).is_err());
        assert!(SpatialMask::from_flat(&[0.0, 0.0, 1.0]).is_err());
    }

    #[test]
    fn test_mask_contains() {
        let mask = SpatialMask::from_flat(&[0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0]).unwrap();
        assert!(mask.contains(5.0, 5.0));
        assert!(!mask.contains(11.0, 5.0));
        assert!(!mask.contains(-1.0, -1.0));
    }
}
