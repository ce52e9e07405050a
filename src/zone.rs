use crate::bbox::{BBox, Ltrb};
use crate::error::Error;

use nalgebra as na;
use ndarray::Array2;
use serde_derive::{Deserialize, Serialize};

/// Entry polygon of the fixed camera setup, in 1280x720 display pixels.
pub const ENTRY_POLYGON: [(f32, f32); 4] = [(30., 474.), (81., 475.), (171., 430.), (113., 431.)];

/// Exit polygon of the fixed camera setup, in 1280x720 display pixels.
pub const EXIT_POLYGON: [(f32, f32); 4] = [(1015., 475.), (938., 434.), (985., 433.), (1087., 475.)];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ZoneCode {
    None = 0,
    Entry = 1,
    Exit = 2,
}

impl ZoneCode {
    #[inline]
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ZoneCode::Entry,
            2 => ZoneCode::Exit,
            _ => ZoneCode::None,
        }
    }
}

/// Even-odd test: a horizontal ray from `p` crosses the polygon outline an odd number of times.
fn inside(p: na::Point2<f32>, poly: &[na::Point2<f32>]) -> bool {
    if poly.len() < 3 {
        return false;
    }

    let edges = poly.iter().zip(poly.iter().cycle().skip(1));

    edges.fold(false, |odd, (a, b)| {
        if (a.y > p.y) == (b.y > p.y) {
            return odd;
        }

        let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
        if p.x < x {
            !odd
        } else {
            odd
        }
    })
}

fn segment_distance(p: na::Point2<f32>, a: na::Point2<f32>, b: na::Point2<f32>) -> f32 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= f32::EPSILON {
        return na::distance(&p, &a);
    }

    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    na::distance(&p, &(a + ab * t))
}

/// Pixel coverage of a polygon fill: interior pixels plus the pixels its edges pass through.
fn covers(p: na::Point2<f32>, poly: &[na::Point2<f32>]) -> bool {
    inside(p, poly)
        || (0..poly.len()).any(|i| segment_distance(p, poly[i], poly[(i + 1) % poly.len()]) <= 0.5)
}

/// Scales display-pixel vertices to the processing resolution.
pub fn scale_polygon(
    poly: &[(f32, f32)],
    display: (u32, u32),
    processing: (u32, u32),
) -> Vec<na::Point2<f32>> {
    let sx = processing.0 as f32 / display.0.max(1) as f32;
    let sy = processing.1 as f32 / display.1.max(1) as f32;

    poly.iter()
        .map(|&(x, y)| na::Point2::new(x * sx, y * sy))
        .collect()
}

/// Rasterized trigger zones at the processing resolution, read-only after construction.
#[derive(Debug, Clone)]
pub struct TriggerMask {
    grid: Array2<u8>,
    entry: Vec<na::Point2<f32>>,
    exit: Vec<na::Point2<f32>>,
}

impl TriggerMask {
    /// Builds the mask from polygons given in `display` pixels for frames of `processing` size.
    pub fn new(
        entry: &[(f32, f32)],
        exit: &[(f32, f32)],
        display: (u32, u32),
        processing: (u32, u32),
    ) -> Result<Self, Error> {
        let entry = scale_polygon(entry, display, processing);
        let exit = scale_polygon(exit, display, processing);

        let mut grid = Array2::zeros((processing.1 as usize, processing.0 as usize));
        fill(&mut grid, &entry, ZoneCode::Entry)?;
        fill(&mut grid, &exit, ZoneCode::Exit)?;

        Ok(Self { grid, entry, exit })
    }

    /// The fixed camera setup at the given processing resolution.
    pub fn standard(processing: (u32, u32)) -> Result<Self, Error> {
        Self::new(&ENTRY_POLYGON, &EXIT_POLYGON, (1280, 720), processing)
    }

    /// Wraps a ready grid of zone codes, `grid[[y, x]]`.
    pub fn from_grid(grid: Array2<u8>) -> Self {
        Self {
            grid,
            entry: Vec::new(),
            exit: Vec::new(),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.grid.ncols()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.grid.nrows()
    }

    /// Scaled polygons `(entry, exit)`, empty for masks built from a grid.
    pub fn polygons(&self) -> (&[na::Point2<f32>], &[na::Point2<f32>]) {
        (&self.entry, &self.exit)
    }

    #[inline]
    fn code_at(&self, x: i64, y: i64) -> Option<ZoneCode> {
        if x < 0 || y < 0 {
            return None;
        }

        self.grid
            .get((y as usize, x as usize))
            .map(|&c| ZoneCode::from_code(c))
    }

    /// Zone of a point: the pixel itself, otherwise the nearest zone pixel
    /// within `tolerance` pixels (Chebyshev distance).
    pub fn classify(&self, point: na::Point2<f32>, tolerance: u32) -> ZoneCode {
        let (px, py) = (point.x.round() as i64, point.y.round() as i64);

        match self.code_at(px, py) {
            Some(ZoneCode::None) | None => {}
            Some(code) => return code,
        }

        let t = tolerance as i64;
        for ring in 1..=t {
            let mut found = ZoneCode::None;

            for dy in -ring..=ring {
                for dx in -ring..=ring {
                    if dx.abs() != ring && dy.abs() != ring {
                        continue;
                    }

                    match self.code_at(px + dx, py + dy) {
                        Some(ZoneCode::Entry) => return ZoneCode::Entry,
                        Some(ZoneCode::Exit) => found = ZoneCode::Exit,
                        _ => {}
                    }
                }
            }

            if found != ZoneCode::None {
                return found;
            }
        }

        ZoneCode::None
    }

    /// Zone of a box, probing its corners and center; entry wins when both zones are hit.
    pub fn classify_box(&self, bbox: &BBox<Ltrb>, tolerance: u32) -> ZoneCode {
        let mut zone = ZoneCode::None;

        for p in bbox.probe_points() {
            match self.classify(p, tolerance) {
                ZoneCode::Entry => return ZoneCode::Entry,
                ZoneCode::Exit => zone = ZoneCode::Exit,
                ZoneCode::None => {}
            }
        }

        zone
    }
}

fn fill(grid: &mut Array2<u8>, poly: &[na::Point2<f32>], code: ZoneCode) -> Result<(), Error> {
    if poly.is_empty() || grid.is_empty() {
        return Ok(());
    }

    let (h, w) = grid.dim();
    let min_x = poly.iter().map(|p| p.x).fold(f32::MAX, f32::min).floor().max(0.0) as usize;
    let min_y = poly.iter().map(|p| p.y).fold(f32::MAX, f32::min).floor().max(0.0) as usize;
    let max_x = (poly.iter().map(|p| p.x).fold(f32::MIN, f32::max).ceil().max(0.0) as usize).min(w - 1);
    let max_y = (poly.iter().map(|p| p.y).fold(f32::MIN, f32::max).ceil().max(0.0) as usize).min(h - 1);

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if !covers(na::Point2::new(x as f32, y as f32), poly) {
                continue;
            }

            let cell = &mut grid[[y, x]];
            if *cell != 0 && *cell != code as u8 {
                return Err(Error::OverlappingZones(x, y));
            }

            *cell = code as u8;
        }
    }

    Ok(())
}
