use crate::error::Error;
use crate::frame::Frame;
use crate::math;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

/// Landmark count of the BlazePose topology.
pub const LANDMARK_COUNT: usize = 33;

pub const POINT_COUNT: usize = 19;

/// Landmarks copied after nose, shoulder midpoint and hip midpoint.
const LIMB_LANDMARKS: [usize; 16] = [11, 12, 13, 14, 15, 16, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32];

pub const LEFT_HIP: usize = 9;
pub const RIGHT_HIP: usize = 10;
pub const LEFT_ANKLE: usize = 13;

/// Segments drawn between skeleton points.
pub const BONES: [(usize, usize); 20] = [
    (0, 1),
    (1, 2),
    // torso
    (3, 4),
    (4, 10),
    (10, 9),
    (9, 3),
    // arms
    (3, 5),
    (5, 7),
    (4, 6),
    (6, 8),
    // legs
    (9, 11),
    (11, 13),
    (10, 12),
    (12, 14),
    // feet
    (13, 15),
    (15, 17),
    (17, 13),
    (14, 16),
    (16, 18),
    (18, 14),
];

/// One pose landmark in normalised image coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(rename = "v", default)]
    pub visibility: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, visibility: f64) -> Self {
        Self { x, y, visibility }
    }

    #[inline]
    fn point(&self) -> na::Point2<f64> {
        na::Point2::new(self.x, self.y)
    }
}

/// The pose landmark extractor.
///
/// `Ok(None)` means no person in the frame.
pub trait PoseEstimator {
    fn process(&mut self, frame: &Frame) -> Result<Option<Vec<Landmark>>, Error>;
}

impl<P: PoseEstimator + ?Sized> PoseEstimator for Box<P> {
    #[inline]
    fn process(&mut self, frame: &Frame) -> Result<Option<Vec<Landmark>>, Error> {
        (**self).process(frame)
    }
}

/// The 19-point skeleton used for posture comparison.
///
/// Point order: nose, shoulder midpoint, hip midpoint, then shoulders, elbows,
/// wrists, hips, knees, ankles, heels and foot tips, left before right.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonPoints(Vec<na::Point2<f64>>);

impl SkeletonPoints {
    pub fn from_landmarks(landmarks: &[Landmark]) -> Result<Self, Error> {
        if landmarks.len() < LANDMARK_COUNT {
            return Err(Error::MissingLandmarks(landmarks.len()));
        }

        let mut points = Vec::with_capacity(POINT_COUNT);
        points.push(landmarks[0].point());
        points.push(na::center(&landmarks[11].point(), &landmarks[12].point()));
        points.push(na::center(&landmarks[23].point(), &landmarks[24].point()));
        points.extend(LIMB_LANDMARKS.iter().map(|&i| landmarks[i].point()));

        Ok(Self(points))
    }

    /// Exactly [`POINT_COUNT`] points in skeleton order, `None` otherwise.
    pub fn from_points(points: Vec<na::Point2<f64>>) -> Option<Self> {
        if points.len() == POINT_COUNT {
            Some(Self(points))
        } else {
            None
        }
    }

    /// Parses one `x,y` pair per line, blank lines are skipped.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut points = Vec::with_capacity(POINT_COUNT);

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (x, y) = line
                .split_once(',')
                .ok_or_else(|| format!("line {}: expected `x,y`", lineno + 1))?;

            let x = x.trim().parse::<f64>().map_err(|e| format!("line {}: {}", lineno + 1, e))?;
            let y = y.trim().parse::<f64>().map_err(|e| format!("line {}: {}", lineno + 1, e))?;

            points.push(na::Point2::new(x, y));
        }

        let count = points.len();
        Self::from_points(points).ok_or_else(|| format!("expected {} points, got {}", POINT_COUNT, count))
    }

    #[inline]
    pub fn points(&self) -> &[na::Point2<f64>] {
        &self.0
    }

    pub fn to_pairs(&self) -> Vec<(f64, f64)> {
        self.0.iter().map(|p| (p.x, p.y)).collect()
    }

    /// Joint angles in degrees: left hip-knee bend against the left shoulder,
    /// right thigh against the horizontal, right knee bend.
    pub fn take_off_angles(&self) -> [f64; 3] {
        let p = &self.0;
        let horizontal = p[RIGHT_HIP] + na::Vector2::new(1.0, 0.0);

        [
            math::angle_between(&p[LEFT_HIP], &p[11], &p[3]),
            math::angle_between(&p[12], &p[RIGHT_HIP], &horizontal),
            math::angle_between(&p[RIGHT_HIP], &p[12], &p[14]),
        ]
    }

    /// Elevation of the left hip seen from the left ankle.
    pub fn take_off_angle(&self) -> f64 {
        math::take_off_angle(&self.0[LEFT_ANKLE], &self.0[LEFT_HIP])
    }

    /// Scales normalised points to a `width x height` image.
    pub fn to_pixels(&self, width: u32, height: u32) -> Vec<na::Point2<f32>> {
        self.0
            .iter()
            .map(|p| na::Point2::new((p.x * width as f64) as f32, (p.y * height as f64) as f32))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmarks() -> Vec<Landmark> {
        (0..LANDMARK_COUNT)
            .map(|i| Landmark::new(i as f64, 100.0 + i as f64, 1.0))
            .collect()
    }

    #[test]
    fn skeleton_point_order() {
        let sk = SkeletonPoints::from_landmarks(&landmarks()).unwrap();
        let p = sk.points();

        assert_eq!(p.len(), POINT_COUNT);
        assert_eq!(p[0], na::Point2::new(0.0, 100.0));
        assert_eq!(p[1], na::Point2::new(11.5, 111.5));
        assert_eq!(p[2], na::Point2::new(23.5, 123.5));
        for (k, &lm) in LIMB_LANDMARKS.iter().enumerate() {
            assert_eq!(p[k + 3].x, lm as f64);
        }
        assert_eq!(p[LEFT_ANKLE].x, 27.0);
    }

    #[test]
    fn too_few_landmarks() {
        let lm = &landmarks()[..20];

        assert!(matches!(
            SkeletonPoints::from_landmarks(lm),
            Err(Error::MissingLandmarks(20))
        ));
    }

    #[test]
    fn angles_of_a_standing_pose() {
        let mut pts = vec![na::Point2::new(0.5, 0.5); POINT_COUNT];
        pts[3] = na::Point2::new(0.4, 0.2);
        pts[LEFT_HIP] = na::Point2::new(0.4, 0.5);
        pts[11] = na::Point2::new(0.4, 0.7);
        pts[RIGHT_HIP] = na::Point2::new(0.6, 0.5);
        pts[12] = na::Point2::new(0.6, 0.7);
        pts[14] = na::Point2::new(0.8, 0.7);
        let sk = SkeletonPoints::from_points(pts).unwrap();

        let [t1, t2, t3] = sk.take_off_angles();
        // hip->knee points down, knee->shoulder points up
        assert!((t1 - 180.0).abs() < 1e-9);
        assert!((t2 - 90.0).abs() < 1e-9);
        assert!((t3 - 90.0).abs() < 1e-9);
    }

    #[test]
    fn take_off_angle_of_leaning_body() {
        let mut pts = vec![na::Point2::new(0.0, 0.0); POINT_COUNT];
        pts[LEFT_ANKLE] = na::Point2::new(0.2, 0.8);
        pts[LEFT_HIP] = na::Point2::new(0.5, 0.5);
        let sk = SkeletonPoints::from_points(pts).unwrap();

        assert!((sk.take_off_angle() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn parses_reference_text() {
        let text = (0..POINT_COUNT)
            .map(|i| format!("{},{}", i as f64 / 100.0, 0.5))
            .collect::<Vec<_>>()
            .join("\n");

        let sk = SkeletonPoints::parse(&text).unwrap();
        assert_eq!(sk.points()[18], na::Point2::new(0.18, 0.5));

        assert!(SkeletonPoints::parse("0.1,0.2\n").is_err());
        assert!(SkeletonPoints::parse("0.1;0.2\n").is_err());
    }
}
