//! Spatial transforms mapping fixed-image points into the moving image.

pub mod bspline;
pub mod field;
pub mod kernel;
pub mod rigid2d;
pub mod versor3d;

use crate::error::Result;
use crate::observer::LevelConfigurable;
use crate::params::LevelParameters;

pub use bspline::BSplineTransform;
pub use field::DisplacementField;
pub use rigid2d::CenteredRigid2d;
pub use versor3d::VersorRigid3d;

/// Anything that maps a physical point of the fixed image to the moving image.
pub trait PointMapping: Sync {
    fn map_point(&self, p: [f64; 3]) -> [f64; 3];
}

/// A parametric transform optimized by a metric/optimizer pair.
#[derive(Clone, Debug, PartialEq)]
pub enum Transform {
    Rigid2d(CenteredRigid2d),
    VersorRigid3d(VersorRigid3d),
    BSpline(BSplineTransform),
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rigid2d(_) => "Centered rigid 2D",
            Self::VersorRigid3d(_) => "Versor rigid 3D",
            Self::BSpline(_) => "B-spline",
        }
    }

    pub fn is_versor(&self) -> bool {
        matches!(self, Self::VersorRigid3d(_))
    }

    pub fn number_of_parameters(&self) -> usize {
        self.parameters().len()
    }

    pub fn parameters(&self) -> &[f64] {
        match self {
            Self::Rigid2d(t) => t.parameters(),
            Self::VersorRigid3d(t) => t.parameters(),
            Self::BSpline(t) => t.parameters(),
        }
    }

    pub fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        match self {
            Self::Rigid2d(t) => t.set_parameters(params),
            Self::VersorRigid3d(t) => t.set_parameters(params),
            Self::BSpline(t) => t.set_parameters(params),
        }
    }

    pub fn transform_point(&self, p: [f64; 3]) -> [f64; 3] {
        match self {
            Self::Rigid2d(t) => t.transform_point(p),
            Self::VersorRigid3d(t) => t.transform_point(p),
            Self::BSpline(t) => t.transform_point(p),
        }
    }

    /// Add `weight * grad^T * dT(p)/dparams` into `out`, where `grad` is the
    /// moving-image gradient at the mapped point.
    pub fn accumulate_jacobian(&self, p: [f64; 3], grad: [f64; 3], weight: f64, out: &mut [f64]) {
        match self {
            Self::Rigid2d(t) => t.accumulate_jacobian(p, grad, weight, out),
            Self::VersorRigid3d(t) => t.accumulate_jacobian(p, grad, weight, out),
            Self::BSpline(t) => t.accumulate_jacobian(p, grad, weight, out),
        }
    }

    /// Per-parameter optimizer scales. Translations of rigid transforms use
    /// `translation_scale`; rotations and B-spline coefficients use 1.
    pub fn optimizer_scales(&self, translation_scale: f64) -> Vec<f64> {
        match self {
            Self::Rigid2d(t) => t.optimizer_scales(translation_scale),
            Self::VersorRigid3d(t) => t.optimizer_scales(translation_scale),
            Self::BSpline(t) => vec![1.0; t.parameters().len()],
        }
    }
}

impl PointMapping for Transform {
    fn map_point(&self, p: [f64; 3]) -> [f64; 3] {
        self.transform_point(p)
    }
}

impl PointMapping for DisplacementField {
    fn map_point(&self, p: [f64; 3]) -> [f64; 3] {
        self.transform_point(p)
    }
}

impl LevelConfigurable for Transform {
    fn apply_level(&mut self, level: &LevelParameters) -> Result<()> {
        match self {
            Self::BSpline(t) => t.refine(level.grid_size),
            Self::Rigid2d(_) | Self::VersorRigid3d(_) => Ok(()),
        }
    }
}
