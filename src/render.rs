use crate::config::RenderConfig;
use crate::error::Error;
use crate::frame::BgrImage;
use crate::posture::{PostureOutcome, PostureReport, PostureType};
use crate::skeleton::{SkeletonPoints, BONES};
use crate::track::Track;
use crate::zone::TriggerMask;

use ab_glyph::FontVec;
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_polygon_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use nalgebra as na;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

// Colours are BGR, matching frame pixel order.
pub const ENTRY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const EXIT_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
pub const TRACK_COLOR: Rgb<u8> = Rgb([0, 128, 255]);
pub const SKELETON_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const JOINT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
pub const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub fn posture_color(posture: PostureType) -> Rgb<u8> {
    match posture {
        PostureType::TakeOff => Rgb([0, 255, 0]),
        PostureType::HipExtension => Rgb([255, 0, 0]),
        PostureType::AbdominalContraction => Rgb([0, 0, 255]),
    }
}

/// Text labels drawn with a loaded font; without one every label is a no-op.
#[derive(Clone, Default)]
pub struct Overlay {
    font: Option<Arc<FontVec>>,
    scale: f32,
}

impl Overlay {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn load(path: &Path, scale: f32) -> Result<Self, Error> {
        let fail = |reason: String| Error::Font {
            path: path.display().to_string(),
            reason,
        };

        let data = std::fs::read(path).map_err(|e| fail(e.to_string()))?;
        let font = FontVec::try_from_vec(data).map_err(|e| fail(e.to_string()))?;
        debug!(path = %path.display(), scale, "overlay font loaded");

        Ok(Self {
            font: Some(Arc::new(font)),
            scale,
        })
    }

    pub fn from_config(config: &RenderConfig) -> Result<Self, Error> {
        match &config.font_path {
            Some(path) => Self::load(path, config.text_scale),
            None => Ok(Self::none()),
        }
    }

    #[inline]
    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn text(&self, img: &mut BgrImage, x: i32, y: i32, color: Rgb<u8>, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(img, color, x, y, self.scale, font.as_ref(), text);
        }
    }
}

pub fn speed_label(count: u32, speed: Option<f64>) -> String {
    format!("Count: {} Speed: {:.2} m/s", count, speed.unwrap_or(0.0))
}

pub fn angle_label(degrees: f64) -> String {
    format!("Take off angle: {:.2}", degrees)
}

pub fn score_label(score: f64) -> String {
    format!("Score: {:.2}", score)
}

fn polygon(img: &mut BgrImage, poly: &[na::Point2<f32>], color: Rgb<u8>) {
    if poly.len() < 2 {
        return;
    }

    let mut pts: Vec<_> = poly.iter().map(|p| Point::new(p.x, p.y)).collect();
    // imageproc rejects a closed polygon that repeats its first vertex
    if pts.first() == pts.last() {
        pts.pop();
    }

    draw_hollow_polygon_mut(img, &pts, color);
}

pub fn draw_zones(img: &mut BgrImage, mask: &TriggerMask) {
    let (entry, exit) = mask.polygons();
    polygon(img, entry, ENTRY_COLOR);
    polygon(img, exit, EXIT_COLOR);
}

pub fn draw_tracks(img: &mut BgrImage, tracks: &[Track]) {
    for track in tracks {
        let b = &track.bbox;
        let (w, h) = (b.width().round() as u32, b.height().round() as u32);
        if w == 0 || h == 0 {
            continue;
        }

        let rect = Rect::at(b.left().round() as i32, b.top().round() as i32).of_size(w, h);
        draw_hollow_rect_mut(img, rect, TRACK_COLOR);
    }
}

/// Draws bones and joints of a skeleton given in image pixels.
pub fn draw_skeleton(img: &mut BgrImage, points: &[na::Point2<f32>], color: Rgb<u8>) {
    for &(a, b) in BONES.iter() {
        if let (Some(a), Some(b)) = (points.get(a), points.get(b)) {
            draw_line_segment_mut(img, (a.x, a.y), (b.x, b.y), color);
        }
    }

    for p in points {
        draw_filled_circle_mut(img, (p.x.round() as i32, p.y.round() as i32), 2, JOINT_COLOR);
    }
}

/// The best-match skeleton of a posture drawn on a white canvas, with its score.
pub fn score_card(
    posture: PostureType,
    points: &SkeletonPoints,
    score: f64,
    canvas: (u32, u32),
    overlay: &Overlay,
) -> BgrImage {
    let mut img = ImageBuffer::from_pixel(canvas.0, canvas.1, Rgb([255, 255, 255]));
    let pixels = points.to_pixels(canvas.0, canvas.1);
    draw_skeleton(&mut img, &pixels, posture_color(posture));
    overlay.text(&mut img, 20, 20, TEXT_COLOR, &score_label(score));

    img
}

pub fn to_rgb(img: &BgrImage) -> RgbImage {
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let Rgb([b, g, r]) = *img.get_pixel(x, y);
        Rgb([r, g, b])
    })
}

/// Input file stem restricted to `[A-Za-z0-9_-]`, anything else becomes `_`.
pub fn safe_stem(video_path: &Path) -> Result<String, Error> {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let re = Regex::new(r"[^A-Za-z0-9_\-]").map_err(|e| Error::InvalidConfig(e.to_string()))?;
    let safe = re.replace_all(&stem, "_").into_owned();

    Ok(if safe.is_empty() { "video".into() } else { safe })
}

/// Creates `<work_dir>/<safe stem>` and returns it.
pub fn results_folder(video_path: &Path, work_dir: &Path) -> Result<PathBuf, Error> {
    let folder = work_dir.join(safe_stem(video_path)?);
    std::fs::create_dir_all(&folder)?;

    Ok(folder)
}

/// `<folder>/<safe stem>_jump.<ext>`, the extension of the input or `mp4`.
pub fn annotated_video_path(folder: &Path, video_path: &Path) -> Result<PathBuf, Error> {
    let ext = video_path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".into());

    Ok(folder.join(format!("{}_jump.{}", safe_stem(video_path)?, ext)))
}

/// Saves a `<posture>.jpg` score card per scored posture plus `report.json`.
pub fn write_posture_results(
    folder: &Path,
    report: &PostureReport,
    canvas: (u32, u32),
    overlay: &Overlay,
) -> Result<Vec<PathBuf>, Error> {
    let mut written = Vec::new();

    for outcome in &report.outcomes {
        if let PostureOutcome::Scored {
            posture,
            points,
            score,
            ..
        } = outcome
        {
            let points = points.iter().map(|&(x, y)| na::Point2::new(x, y)).collect();
            let points = match SkeletonPoints::from_points(points) {
                Some(points) => points,
                None => continue,
            };

            let path = folder.join(format!("{}.jpg", posture.name()));
            to_rgb(&score_card(*posture, &points, *score, canvas, overlay)).save(&path)?;
            written.push(path);
        }
    }

    let path = folder.join("report.json");
    std::fs::write(&path, serde_json::to_vec_pretty(report)?)?;
    written.push(path);

    info!(folder = %folder.display(), files = written.len(), "posture results written");

    Ok(written)
}
