use nalgebra as na;
use num_traits::Float;

/// Angle in degrees between the vectors `AB` and `BC`.
///
/// A zero-length vector has no direction, such triples yield `0`.
pub fn angle_between<T>(a: &na::Point2<T>, b: &na::Point2<T>, c: &na::Point2<T>) -> T
where
    T: na::RealField + Float,
{
    let ab = b - a;
    let bc = c - b;

    let len = ab.norm() * bc.norm();
    if len <= Float::epsilon() {
        return T::zero();
    }

    let cos = Float::max(Float::min(ab.dot(&bc) / len, T::one()), -T::one());

    // collinear vectors round to a cosine a few ulps below one
    let snap: T = <T as Float>::epsilon() * na::convert::<f64, T>(16.0);
    if cos >= T::one() - snap {
        return T::zero();
    }

    Float::to_degrees(Float::acos(cos))
}

/// Elevation in degrees of `cg` seen from `anchor`, image y axis points down.
pub fn take_off_angle<T>(anchor: &na::Point2<T>, cg: &na::Point2<T>) -> T
where
    T: na::RealField + Float,
{
    let dx = cg.x - anchor.x;
    let dy = anchor.y - cg.y;

    Float::to_degrees(Float::atan2(dy, dx))
}

pub fn weighted_euclidean(p: &[f64], q: &[f64], weights: &[f64]) -> f64 {
    p.iter()
        .zip(q)
        .zip(weights)
        .map(|((x, y), w)| (x - y) * (x - y) * w)
        .sum::<f64>()
        .sqrt()
}

/// `1 - cos(p, q)`; a zero vector is treated as maximally dissimilar.
pub fn cosine_distance(p: &[f64], q: &[f64]) -> f64 {
    let p = na::DVector::from_column_slice(p);
    let q = na::DVector::from_column_slice(q);
    let norm = p.norm() * q.norm();

    if norm <= f64::EPSILON {
        return 1.0;
    }

    1.0 - p.dot(&q) / norm
}

/// Pearson correlation of two histograms (same as OpenCV `HISTCMP_CORREL`).
pub fn histogram_correlation(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    let ma = a[..n].iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let mb = b[..n].iter().map(|&v| v as f64).sum::<f64>() / n as f64;

    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (&x, &y) in a[..n].iter().zip(&b[..n]) {
        let (dx, dy) = (x as f64 - ma, y as f64 - mb);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }

    let denom = (saa * sbb).sqrt();
    if denom <= f64::EPSILON {
        // both flat: identical only if the levels match
        return if (ma - mb).abs() <= f64::EPSILON { 1.0 } else { 0.0 };
    }

    sab / denom
}

#[inline]
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_has_zero_angle() {
        let a = na::Point2::new(0.0, 0.0);
        let b = na::Point2::new(1.0, 1.0);
        let c = na::Point2::new(2.0, 2.0);

        assert_eq!(angle_between(&a, &b, &c), 0.0);
    }

    #[test]
    fn collinear_off_grid_points_have_zero_angle() {
        let a = na::Point2::new(0.1f64, 0.3);
        let b = na::Point2::new(0.4, 0.7);
        let c = na::Point2::new(1.0, 1.5);
        assert_eq!(angle_between(&a, &b, &c), 0.0);

        let a = na::Point2::new(0.1f32, 0.3);
        let b = na::Point2::new(0.4f32, 0.7);
        let c = na::Point2::new(1.0f32, 1.5);
        assert_eq!(angle_between(&a, &b, &c), 0.0);
    }

    #[test]
    fn right_angle() {
        let a = na::Point2::new(0.0f64, 0.0);
        let b = na::Point2::new(1.0, 0.0);
        let c = na::Point2::new(1.0, 1.0);

        assert!((angle_between(&a, &b, &c) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_angle_is_zero() {
        let a = na::Point2::new(0.5f64, 0.5);

        assert_eq!(angle_between(&a, &a, &na::Point2::new(1.0, 0.0)), 0.0);
    }

    #[test]
    fn take_off_angle_flips_y() {
        let ankle = na::Point2::new(0.5f64, 0.9);
        let hip = na::Point2::new(0.6, 0.8);

        assert!((take_off_angle(&ankle, &hip) - 45.0).abs() < 1e-9);
    }

    #[test]
    fn distances() {
        let p = [1.0, 2.0, 3.0];
        let q = [1.0, 0.0, 5.0];

        assert!((weighted_euclidean(&p, &q, &[0.3, 0.5, 0.2]) - (2.0f64 + 0.8).sqrt()).abs() < 1e-12);
        assert!(cosine_distance(&p, &[2.0, 4.0, 6.0]).abs() < 1e-12);
        assert_eq!(cosine_distance(&p, &[0.0, 0.0, 0.0]), 1.0);
    }

    #[test]
    fn correlation_bounds() {
        let a = [1.0, 5.0, 2.0, 8.0];
        let b = [2.0, 10.0, 4.0, 16.0];
        let c = [8.0, 2.0, 5.0, 1.0];

        assert!((histogram_correlation(&a, &b) - 1.0).abs() < 1e-12);
        assert!(histogram_correlation(&a, &c) < 0.0);
        assert_eq!(histogram_correlation(&[3.0; 4], &[3.0; 4]), 1.0);
    }

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round2(2.345_67), 2.35);
        assert_eq!(round2(1.0 / 3.0), 0.33);
    }
}
