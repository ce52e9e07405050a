use image::{ImageBuffer, Rgb};
use ndarray::prelude::*;

use crate::bbox::{BBox, Ltrb};

/// Image buffer holding frame pixels as-is, channel order stays BGR.
pub type BgrImage = ImageBuffer<Rgb<u8>, Vec<u8>>;

const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// One decoded video image, `pixels` is `height x width x 3` in BGR order.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub pixels: Array3<u8>,
}

impl Frame {
    #[inline]
    pub fn new(index: u64, pixels: Array3<u8>) -> Self {
        Self { index, pixels }
    }

    pub fn blank(index: u64, width: u32, height: u32) -> Self {
        Self::new(index, Array3::zeros((height as usize, width as usize, 3)))
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.pixels.shape()[1] as u32
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.pixels.shape()[0] as u32
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Bilinear resize, returns a copy when the size already matches.
    pub fn resize(&self, width: u32, height: u32) -> Frame {
        if self.dims() == (width, height) {
            return self.clone();
        }

        let (dw, dh) = (width as usize, height as usize);
        if self.is_empty() {
            return Frame::new(self.index, Array3::zeros((dh, dw, 3)));
        }

        let (sw, sh) = (self.width() as usize, self.height() as usize);
        let sx = sw as f32 / dw as f32;
        let sy = sh as f32 / dh as f32;
        let src = &self.pixels;

        let out = Array3::from_shape_fn((dh, dw, 3), |(y, x, c)| {
            let fy = ((y as f32 + 0.5) * sy - 0.5).max(0.0);
            let fx = ((x as f32 + 0.5) * sx - 0.5).max(0.0);
            let y0 = (fy as usize).min(sh - 1);
            let x0 = (fx as usize).min(sw - 1);
            let y1 = (y0 + 1).min(sh - 1);
            let x1 = (x0 + 1).min(sw - 1);
            let wy = fy - y0 as f32;
            let wx = fx - x0 as f32;

            let top = src[[y0, x0, c]] as f32 * (1.0 - wx) + src[[y0, x1, c]] as f32 * wx;
            let bottom = src[[y1, x0, c]] as f32 * (1.0 - wx) + src[[y1, x1, c]] as f32 * wx;

            (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8
        });

        Frame::new(self.index, out)
    }

    /// Letterbox into a square `size x size` network input: RGB, `[0, 1]`, NCHW with batch of 1.
    pub fn letterbox(&self, size: u32) -> (Array4<f32>, Letterbox) {
        let s = size as usize;
        let mut input = Array4::from_elem((1, 3, s, s), LETTERBOX_FILL);

        if self.is_empty() {
            return (input, Letterbox::identity());
        }

        let (w, h) = (self.width() as f32, self.height() as f32);
        let scale = (size as f32 / w).min(size as f32 / h);
        let new_w = ((w * scale).round() as u32).clamp(1, size);
        let new_h = ((h * scale).round() as u32).clamp(1, size);
        let pad_x = (size - new_w) as f32 / 2.0;
        let pad_y = (size - new_h) as f32 / 2.0;

        let resized = self.resize(new_w, new_h);
        let (ox, oy) = (pad_x.floor() as usize, pad_y.floor() as usize);

        for ((y, x, c), &v) in resized.pixels.indexed_iter() {
            input[[0, 2 - c, y + oy, x + ox]] = v as f32 / 255.0;
        }

        (
            input,
            Letterbox {
                scale,
                pad_x: ox as f32,
                pad_y: oy as f32,
            },
        )
    }

    /// Grayscale histogram of the frame downsampled to `width x height`,
    /// used to detect near-identical consecutive frames.
    pub fn signature(&self, width: u32, height: u32, bins: usize) -> Vec<f32> {
        let mut hist = vec![0.0f32; bins.max(1)];
        let last = hist.len() - 1;
        let small = self.resize(width, height);

        for px in small.pixels.lanes(Axis(2)) {
            let gray = 0.114 * px[0] as f32 + 0.587 * px[1] as f32 + 0.299 * px[2] as f32;
            let bin = ((gray / 256.0) * (last + 1) as f32) as usize;
            hist[bin.min(last)] += 1.0;
        }

        hist
    }

    pub fn to_image(&self) -> BgrImage {
        let px = &self.pixels;

        ImageBuffer::from_fn(self.width(), self.height(), |x, y| {
            let (x, y) = (x as usize, y as usize);
            Rgb([px[[y, x, 0]], px[[y, x, 1]], px[[y, x, 2]]])
        })
    }

    pub fn from_image(index: u64, img: &BgrImage) -> Self {
        let (w, h) = img.dimensions();
        let pixels = Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
            img.get_pixel(x as u32, y as u32).0[c]
        });

        Self::new(index, pixels)
    }
}

/// Geometry of a letterbox transform, maps network-input boxes back to the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        }
    }

    #[inline]
    pub fn unmap(&self, bbox: &BBox<Ltrb>) -> BBox<Ltrb> {
        BBox::ltrb(
            (bbox.left() - self.pad_x) / self.scale,
            (bbox.top() - self.pad_y) / self.scale,
            (bbox.right() - self.pad_x) / self.scale,
            (bbox.bottom() - self.pad_y) / self.scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: usize, h: usize) -> Frame {
        Frame::new(
            0,
            Array3::from_shape_fn((h, w, 3), |(y, x, c)| ((x * 7 + y * 3 + c * 50) % 256) as u8),
        )
    }

    #[test]
    fn resize_keeps_uniform_color() {
        let mut f = Frame::blank(3, 40, 20);
        f.pixels.fill(200);
        let r = f.resize(13, 7);

        assert_eq!(r.dims(), (13, 7));
        assert_eq!(r.index, 3);
        assert!(r.pixels.iter().all(|&v| v == 200));
    }

    #[test]
    fn letterbox_pads_the_short_side() {
        let f = gradient(64, 32);
        let (input, lb) = f.letterbox(32);

        assert_eq!(input.shape(), &[1, 3, 32, 32]);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 8.0);
        assert!((input[[0, 0, 0, 0]] - LETTERBOX_FILL).abs() < 1e-6);

        let back = lb.unmap(&BBox::ltrb(0.0, 8.0, 32.0, 24.0));
        assert_eq!(back.as_slice(), &[0.0, 0.0, 64.0, 32.0]);
    }

    #[test]
    fn letterbox_swaps_channels_to_rgb() {
        let mut f = Frame::blank(0, 4, 4);
        f.pixels.slice_mut(s![.., .., 0]).fill(255);
        let (input, _) = f.letterbox(4);

        assert_eq!(input[[0, 2, 1, 1]], 1.0);
        assert_eq!(input[[0, 0, 1, 1]], 0.0);
    }

    #[test]
    fn signature_counts_every_pixel() {
        let hist = gradient(100, 50).signature(20, 10, 16);

        assert_eq!(hist.len(), 16);
        assert_eq!(hist.iter().sum::<f32>(), 200.0);
    }

    #[test]
    fn image_round_trip_preserves_pixels() {
        let f = gradient(5, 3);
        let back = Frame::from_image(f.index, &f.to_image());

        assert_eq!(back.pixels, f.pixels);
    }
}
