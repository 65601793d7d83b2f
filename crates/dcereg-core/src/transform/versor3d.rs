//! Rigid 3D transform parameterized by a versor (unit quaternion) and a
//! translation: `[vx, vy, vz, tx, ty, tz]`, `q = R(v) (p - c) + c + t`.
//! The scalar part of the versor is `sqrt(1 - |v|^2)`.

use crate::error::{RegistrationError, Result};

type Matrix3 = [[f64; 3]; 3];

#[derive(Clone, Debug, PartialEq)]
pub struct VersorRigid3d {
    center: [f64; 3],
    params: Vec<f64>,
    rotation: Matrix3,
    /// dR/dv_k for k = x, y, z.
    rotation_derivatives: [Matrix3; 3],
}

fn mul_vec(m: &Matrix3, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Vector part clamped into the unit ball, plus the matching scalar part.
pub fn normalized_versor(v: [f64; 3]) -> ([f64; 3], f64) {
    let norm2 = v[0] * v[0] + v[1] * v[1] + v[2] * v[2];
    if norm2 > 1.0 {
        let n = norm2.sqrt();
        ([v[0] / n, v[1] / n, v[2] / n], 0.0)
    } else {
        (v, (1.0 - norm2).sqrt())
    }
}

/// Hamilton product of two versors given as `(vector, scalar)`.
pub fn compose_versors(a: ([f64; 3], f64), b: ([f64; 3], f64)) -> ([f64; 3], f64) {
    let (av, aw) = a;
    let (bv, bw) = b;
    let w = aw * bw - (av[0] * bv[0] + av[1] * bv[1] + av[2] * bv[2]);
    let v = [
        aw * bv[0] + bw * av[0] + av[1] * bv[2] - av[2] * bv[1],
        aw * bv[1] + bw * av[1] + av[2] * bv[0] - av[0] * bv[2],
        aw * bv[2] + bw * av[2] + av[0] * bv[1] - av[1] * bv[0],
    ];
    if w < 0.0 {
        ([-v[0], -v[1], -v[2]], -w)
    } else {
        (v, w)
    }
}

/// Versor rotating by `|axis_angle|` radians about `axis_angle`.
pub fn versor_from_rotation_vector(axis_angle: [f64; 3]) -> ([f64; 3], f64) {
    let angle = (axis_angle[0].powi(2) + axis_angle[1].powi(2) + axis_angle[2].powi(2)).sqrt();
    if angle < 1e-15 {
        return ([0.0; 3], 1.0);
    }
    let s = (angle / 2.0).sin() / angle;
    (
        [axis_angle[0] * s, axis_angle[1] * s, axis_angle[2] * s],
        (angle / 2.0).cos(),
    )
}

fn rotation_and_derivatives(v: [f64; 3]) -> (Matrix3, [Matrix3; 3]) {
    let ([x, y, z], w) = normalized_versor(v);
    let r = [
        [
            1.0 - 2.0 * (y * y + z * z),
            2.0 * (x * y - z * w),
            2.0 * (x * z + y * w),
        ],
        [
            2.0 * (x * y + z * w),
            1.0 - 2.0 * (x * x + z * z),
            2.0 * (y * z - x * w),
        ],
        [
            2.0 * (x * z - y * w),
            2.0 * (y * z + x * w),
            1.0 - 2.0 * (x * x + y * y),
        ],
    ];

    let dx = [
        [0.0, 2.0 * y, 2.0 * z],
        [2.0 * y, -4.0 * x, -2.0 * w],
        [2.0 * z, 2.0 * w, -4.0 * x],
    ];
    let dy = [
        [-4.0 * y, 2.0 * x, 2.0 * w],
        [2.0 * x, 0.0, 2.0 * z],
        [-2.0 * w, 2.0 * z, -4.0 * y],
    ];
    let dz = [
        [-4.0 * z, -2.0 * w, 2.0 * x],
        [2.0 * w, -4.0 * z, 2.0 * y],
        [2.0 * x, 2.0 * y, 0.0],
    ];
    let dw = [
        [0.0, -2.0 * z, 2.0 * y],
        [2.0 * z, 0.0, -2.0 * x],
        [-2.0 * y, 2.0 * x, 0.0],
    ];

    // The scalar part depends on the vector part: dw/dv_k = -v_k / w.
    let mut derivs = [dx, dy, dz];
    if w > 1e-12 {
        for (k, d) in derivs.iter_mut().enumerate() {
            let dwdk = -[x, y, z][k] / w;
            for i in 0..3 {
                for j in 0..3 {
                    d[i][j] += dw[i][j] * dwdk;
                }
            }
        }
    }
    (r, derivs)
}

impl VersorRigid3d {
    pub const NUM_PARAMETERS: usize = 6;

    pub fn new(center: [f64; 3]) -> Self {
        let (rotation, rotation_derivatives) = rotation_and_derivatives([0.0; 3]);
        Self {
            center,
            params: vec![0.0; Self::NUM_PARAMETERS],
            rotation,
            rotation_derivatives,
        }
    }

    pub fn center(&self) -> [f64; 3] {
        self.center
    }

    pub fn rotation_matrix(&self) -> Matrix3 {
        self.rotation
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.params[3], self.params[4], self.params[5]]
    }

    pub fn parameters(&self) -> &[f64] {
        &self.params
    }

    pub fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        if params.len() != Self::NUM_PARAMETERS {
            return Err(RegistrationError::DimensionMismatch {
                expected: format!("{} versor rigid 3D parameters", Self::NUM_PARAMETERS),
                actual: params.len().to_string(),
            });
        }
        self.params.copy_from_slice(params);
        let (r, d) = rotation_and_derivatives([params[0], params[1], params[2]]);
        self.rotation = r;
        self.rotation_derivatives = d;
        Ok(())
    }

    pub fn transform_point(&self, p: [f64; 3]) -> [f64; 3] {
        let d = [
            p[0] - self.center[0],
            p[1] - self.center[1],
            p[2] - self.center[2],
        ];
        let r = mul_vec(&self.rotation, d);
        [
            r[0] + self.center[0] + self.params[3],
            r[1] + self.center[1] + self.params[4],
            r[2] + self.center[2] + self.params[5],
        ]
    }

    pub fn accumulate_jacobian(&self, p: [f64; 3], grad: [f64; 3], weight: f64, out: &mut [f64]) {
        let d = [
            p[0] - self.center[0],
            p[1] - self.center[1],
            p[2] - self.center[2],
        ];
        for k in 0..3 {
            let dq = mul_vec(&self.rotation_derivatives[k], d);
            out[k] += weight * (grad[0] * dq[0] + grad[1] * dq[1] + grad[2] * dq[2]);
        }
        for k in 0..3 {
            out[3 + k] += weight * grad[k];
        }
    }

    pub fn optimizer_scales(&self, translation_scale: f64) -> Vec<f64> {
        vec![1.0, 1.0, 1.0, translation_scale, translation_scale, translation_scale]
    }
}

impl Default for VersorRigid3d {
    fn default() -> Self {
        Self::new([0.0; 3])
    }
}
