//! Cubic B-spline free-form deformation over the fixed-image region.
//!
//! The control grid covers the region bounding box with `nodes - 3` mesh
//! cells per axis plus one node of margin on each side. Parameters are the
//! control-point displacements stored dimension-major: all x coefficients,
//! then all y (then all z).

use tracing::debug;

use crate::consts::BSPLINE_ORDER;
use crate::error::{RegistrationError, Result};

use super::kernel::bspline3;

/// Support of the cubic kernel along one axis.
const SUPPORT: usize = BSPLINE_ORDER + 1;

/// Pole of the cubic B-spline interpolation prefilter.
const CUBIC_POLE: f64 = -0.267_949_192_431_122_7;

#[derive(Clone, Debug, PartialEq)]
pub struct BSplineTransform {
    dims: usize,
    domain: ([f64; 3], [f64; 3]),
    grid_size: [usize; 3],
    grid_origin: [f64; 3],
    grid_spacing: [f64; 3],
    coefficients: Vec<f64>,
}

impl BSplineTransform {
    /// Identity deformation with `grid_size` control points per axis over the
    /// physical box `domain`. Only the first `dims` axes are deformed.
    pub fn new(domain: ([f64; 3], [f64; 3]), grid_size: [usize; 3], dims: usize) -> Result<Self> {
        if !(dims == 2 || dims == 3) {
            return Err(RegistrationError::invalid_config(format!(
                "B-spline transform needs 2 or 3 dimensions, got {dims}"
            )));
        }
        let mut size = [1usize; 3];
        let mut origin = domain.0;
        let mut spacing = [1.0; 3];
        for d in 0..dims {
            if grid_size[d] <= BSPLINE_ORDER {
                return Err(RegistrationError::invalid_config(format!(
                    "B-spline grid needs more than {BSPLINE_ORDER} nodes per axis, got {grid_size:?}"
                )));
            }
            size[d] = grid_size[d];
            let mesh = (grid_size[d] - BSPLINE_ORDER) as f64;
            let extent = domain.1[d] - domain.0[d];
            spacing[d] = if extent > 0.0 { extent / mesh } else { 1.0 };
            origin[d] = domain.0[d] - spacing[d];
        }
        let nodes = size.iter().product::<usize>();
        Ok(Self {
            dims,
            domain,
            grid_size: size,
            grid_origin: origin,
            grid_spacing: spacing,
            coefficients: vec![0.0; dims * nodes],
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn grid_size(&self) -> [usize; 3] {
        self.grid_size
    }

    pub fn number_of_nodes(&self) -> usize {
        self.grid_size.iter().product()
    }

    pub fn parameters(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        if params.len() != self.coefficients.len() {
            return Err(RegistrationError::DimensionMismatch {
                expected: format!("{} B-spline coefficients", self.coefficients.len()),
                actual: params.len().to_string(),
            });
        }
        self.coefficients.copy_from_slice(params);
        Ok(())
    }

    /// Call `f(node, weight)` for every control point supporting `p`.
    fn for_each_support(&self, p: [f64; 3], mut f: impl FnMut(usize, f64)) {
        let mut base = [0isize; 3];
        let mut weights = [[0.0f64; SUPPORT]; 3];
        let mut counts = [1usize; 3];
        for d in 0..3 {
            if d >= self.dims {
                weights[d][0] = 1.0;
                continue;
            }
            let u = (p[d] - self.grid_origin[d]) / self.grid_spacing[d];
            if !u.is_finite() {
                return;
            }
            base[d] = u.floor() as isize - 1;
            counts[d] = SUPPORT;
            for (k, w) in weights[d].iter_mut().enumerate() {
                *w = bspline3(u - (base[d] + k as isize) as f64);
            }
        }

        let [nx, ny, nz] = self.grid_size;
        for kz in 0..counts[2] {
            let iz = base[2] + kz as isize;
            if iz < 0 || iz >= nz as isize {
                continue;
            }
            for ky in 0..counts[1] {
                let iy = base[1] + ky as isize;
                if iy < 0 || iy >= ny as isize {
                    continue;
                }
                let wzy = weights[2][kz] * weights[1][ky];
                for kx in 0..counts[0] {
                    let ix = base[0] + kx as isize;
                    if ix < 0 || ix >= nx as isize {
                        continue;
                    }
                    let node = (iz as usize * ny + iy as usize) * nx + ix as usize;
                    f(node, wzy * weights[0][kx]);
                }
            }
        }
    }

    pub fn displacement(&self, p: [f64; 3]) -> [f64; 3] {
        let n = self.number_of_nodes();
        let mut u = [0.0; 3];
        self.for_each_support(p, |node, w| {
            for (d, ud) in u.iter_mut().enumerate().take(self.dims) {
                *ud += w * self.coefficients[d * n + node];
            }
        });
        u
    }

    pub fn transform_point(&self, p: [f64; 3]) -> [f64; 3] {
        let u = self.displacement(p);
        [p[0] + u[0], p[1] + u[1], p[2] + u[2]]
    }

    pub fn accumulate_jacobian(&self, p: [f64; 3], grad: [f64; 3], weight: f64, out: &mut [f64]) {
        let n = self.number_of_nodes();
        self.for_each_support(p, |node, w| {
            for d in 0..self.dims {
                out[d * n + node] += weight * grad[d] * w;
            }
        });
    }

    /// Move to a new control grid, preserving the current deformation.
    ///
    /// The deformation is sampled at the new node positions and converted to
    /// interpolating B-spline coefficients.
    pub fn refine(&mut self, grid_size: [usize; 3]) -> Result<()> {
        let mut wanted = [1usize; 3];
        wanted[..self.dims].copy_from_slice(&grid_size[..self.dims]);
        if wanted == self.grid_size {
            return Ok(());
        }

        let mut refined = Self::new(self.domain, grid_size, self.dims)?;
        let [nx, ny, nz] = refined.grid_size;
        let n = refined.number_of_nodes();
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    let idx = [ix, iy, iz];
                    let mut p = [0.0; 3];
                    for d in 0..3 {
                        p[d] = if d < self.dims {
                            refined.grid_origin[d] + idx[d] as f64 * refined.grid_spacing[d]
                        } else {
                            self.domain.0[d]
                        };
                    }
                    let u = self.displacement(p);
                    let node = (iz * ny + iy) * nx + ix;
                    for (d, ud) in u.iter().enumerate().take(self.dims) {
                        refined.coefficients[d * n + node] = *ud;
                    }
                }
            }
        }

        for d in 0..self.dims {
            let component = &mut refined.coefficients[d * n..(d + 1) * n];
            for axis in 0..self.dims {
                prefilter_axis(component, refined.grid_size, axis);
            }
        }

        debug!(from = ?self.grid_size, to = ?refined.grid_size, "B-spline grid refined");
        *self = refined;
        Ok(())
    }
}

/// Apply the cubic interpolation prefilter along one axis of a node grid.
fn prefilter_axis(values: &mut [f64], size: [usize; 3], axis: usize) {
    let [nx, ny, nz] = size;
    let len = size[axis];
    if len < 2 {
        return;
    }
    let stride = match axis {
        0 => 1,
        1 => nx,
        _ => nx * ny,
    };
    let mut line = vec![0.0; len];
    for iz in 0..nz {
        for iy in 0..ny {
            for ix in 0..nx {
                let start_idx = [ix, iy, iz];
                if start_idx[axis] != 0 {
                    continue;
                }
                let start = (iz * ny + iy) * nx + ix;
                for (k, v) in line.iter_mut().enumerate() {
                    *v = values[start + k * stride];
                }
                prefilter_line(&mut line);
                for (k, v) in line.iter().enumerate() {
                    values[start + k * stride] = *v;
                }
            }
        }
    }
}

/// Recursive cubic B-spline decomposition with mirror boundaries.
fn prefilter_line(c: &mut [f64]) {
    let n = c.len();
    let z = CUBIC_POLE;
    let lambda = (1.0 - z) * (1.0 - 1.0 / z);
    for v in c.iter_mut() {
        *v *= lambda;
    }

    let horizon = n.min((f64::EPSILON.ln() / z.abs().ln()).ceil() as usize);
    let mut sum = c[0];
    let mut zn = z;
    for v in c.iter().take(horizon).skip(1) {
        sum += zn * v;
        zn *= z;
    }
    c[0] = sum;
    for k in 1..n {
        c[k] += z * c[k - 1];
    }

    c[n - 1] = (z / (z * z - 1.0)) * (z * c[n - 2] + c[n - 1]);
    for k in (0..n - 1).rev() {
        c[k] = z * (c[k + 1] - c[k]);
    }
}
