//! Cubic B-spline kernel and its derivative.

use num_traits::Float;

/// Centered cubic B-spline, support `(-2, 2)`.
pub fn bspline3<T: Float>(t: T) -> T {
    let one = T::one();
    let two = one + one;
    let four = two + two;
    let six = four + two;
    let a = t.abs();
    if a < one {
        (four - six * a * a + (two + one) * a * a * a) / six
    } else if a < two {
        let b = two - a;
        b * b * b / six
    } else {
        T::zero()
    }
}

/// First derivative of [`bspline3`].
pub fn bspline3_derivative<T: Float>(t: T) -> T {
    let one = T::one();
    let two = one + one;
    let half = one / two;
    let a = t.abs();
    let d = if a < one {
        (one + half) * a * a - two * a
    } else if a < two {
        let b = two - a;
        -half * b * b
    } else {
        return T::zero();
    };
    if t < T::zero() {
        -d
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_of_unity() {
        for &u in &[0.0f64, 0.25, 0.5, 0.9] {
            let sum: f64 = (-2..=2).map(|k| bspline3(u - k as f64)).sum();
            assert!((sum - 1.0).abs() < 1e-12, "u={u} sum={sum}");
        }
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let h = 1e-6;
        for &t in &[-1.7f64, -0.6, 0.0, 0.3, 1.2, 1.9] {
            let fd = (bspline3(t + h) - bspline3(t - h)) / (2.0 * h);
            assert!((bspline3_derivative(t) - fd).abs() < 1e-5, "t={t}");
        }
    }
}
