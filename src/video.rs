use crate::error::Error;
use crate::frame::Frame;

use std::collections::VecDeque;

/// Decoded frames in order, `Ok(None)` at end of stream.
pub trait FrameSource {
    fn read(&mut self) -> Result<Option<Frame>, Error>;

    /// Frames per second, `0` when unknown.
    fn fps(&self) -> f64;

    fn frame_count(&self) -> Option<u64>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    #[inline]
    fn read(&mut self) -> Result<Option<Frame>, Error> {
        (**self).read()
    }

    #[inline]
    fn fps(&self) -> f64 {
        (**self).fps()
    }

    #[inline]
    fn frame_count(&self) -> Option<u64> {
        (**self).frame_count()
    }
}

pub trait FrameSink {
    fn write(&mut self, frame: &Frame) -> Result<(), Error>;
}

impl<K: FrameSink + ?Sized> FrameSink for Box<K> {
    #[inline]
    fn write(&mut self, frame: &Frame) -> Result<(), Error> {
        (**self).write(frame)
    }
}

/// In-memory source; counts the frames handed out.
pub struct VecSource {
    frames: VecDeque<Frame>,
    fps: f64,
    total: u64,
    read: u64,
}

impl VecSource {
    /// Frames are re-indexed by position.
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        let frames: VecDeque<_> = frames
            .into_iter()
            .enumerate()
            .map(|(i, f)| Frame::new(i as u64, f.pixels))
            .collect();

        Self {
            total: frames.len() as u64,
            frames,
            fps,
            read: 0,
        }
    }

    /// `count` black frames of `width x height`.
    pub fn blank(count: usize, width: u32, height: u32, fps: f64) -> Self {
        Self::new(
            (0..count as u64).map(|i| Frame::blank(i, width, height)).collect(),
            fps,
        )
    }

    #[inline]
    pub fn frames_read(&self) -> u64 {
        self.read
    }
}

impl FrameSource for VecSource {
    fn read(&mut self) -> Result<Option<Frame>, Error> {
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.read += 1;
        }

        Ok(frame)
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.total)
    }
}

#[derive(Debug, Default)]
pub struct VecSink {
    pub frames: Vec<Frame>,
}

impl FrameSink for VecSink {
    fn write(&mut self, frame: &Frame) -> Result<(), Error> {
        self.frames.push(frame.clone());
        Ok(())
    }
}

#[cfg(feature = "opencv")]
pub use self::cv::{VideoFileSource, VideoWriter};

#[cfg(feature = "opencv")]
mod cv {
    use super::{FrameSink, FrameSource};
    use crate::error::Error;
    use crate::frame::Frame;

    use ndarray::Array3;
    use opencv::{
        core::{self, Mat},
        prelude::*,
        videoio,
    };
    use std::path::{Path, PathBuf};
    use tracing::{debug, warn};

    fn mat_to_frame(index: u64, mat: &Mat) -> Result<Frame, Error> {
        let (h, w) = (mat.rows() as usize, mat.cols() as usize);
        let data = mat.data_typed::<core::Vec3b>()?;

        let pixels = Array3::from_shape_fn((h, w, 3), |(y, x, c)| data[y * w + x].0[c]);

        Ok(Frame::new(index, pixels))
    }

    fn frame_to_mat(frame: &Frame) -> Result<Mat, Error> {
        let (w, h) = frame.dims();
        let mut mat = Mat::new_rows_cols_with_default(
            h as i32,
            w as i32,
            core::CV_8UC3,
            core::Scalar::new(0.0, 0.0, 0.0, 0.0),
        )?;

        let data = mat.data_typed_mut::<core::Vec3b>()?;
        for ((y, x, c), &v) in frame.pixels.indexed_iter() {
            data[y * w as usize + x].0[c] = v;
        }

        Ok(mat)
    }

    pub struct VideoFileSource {
        cam: videoio::VideoCapture,
        fps: f64,
        total: Option<u64>,
        index: u64,
    }

    impl VideoFileSource {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
            let path = path.as_ref();
            let fail = |reason: &str| Error::VideoOpen {
                path: path.display().to_string(),
                reason: reason.into(),
            };

            let name = path.to_str().ok_or_else(|| fail("path is not valid UTF-8"))?;
            let cam = videoio::VideoCapture::from_file(name, videoio::CAP_ANY)?;
            if !videoio::VideoCapture::is_opened(&cam)? {
                return Err(fail("unable to open video"));
            }

            let fps = cam.get(videoio::CAP_PROP_FPS)?;
            let total = cam.get(videoio::CAP_PROP_FRAME_COUNT)?;
            let total = if total > 0.0 { Some(total as u64) } else { None };

            debug!(?path, fps, ?total, "video opened");

            Ok(Self {
                cam,
                fps,
                total,
                index: 0,
            })
        }
    }

    impl FrameSource for VideoFileSource {
        fn read(&mut self) -> Result<Option<Frame>, Error> {
            let mut mat = Mat::default();
            if !self.cam.read(&mut mat)? || mat.rows() <= 0 {
                return Ok(None);
            }

            let frame = mat_to_frame(self.index, &mat)?;
            self.index += 1;

            Ok(Some(frame))
        }

        fn fps(&self) -> f64 {
            self.fps
        }

        fn frame_count(&self) -> Option<u64> {
            self.total
        }
    }

    /// Writes frames to a video file, opened lazily with the size of the first frame.
    pub struct VideoWriter {
        writer: Option<videoio::VideoWriter>,
        size: Option<(u32, u32)>,
        out_file: PathBuf,
        fps: f64,
    }

    impl VideoWriter {
        pub fn new(out_file: impl Into<PathBuf>, fps: f64) -> Self {
            Self {
                writer: None,
                size: None,
                out_file: out_file.into(),
                fps,
            }
        }

        pub fn release(&mut self) -> Result<(), Error> {
            if let Some(mut w) = self.writer.take() {
                w.release()?;
            }

            Ok(())
        }

        fn reinit(&mut self, size: (u32, u32)) -> Result<(), Error> {
            if self.size.is_some() {
                warn!(?size, "frame size changed, reopening writer");
            }
            self.release()?;

            let name = self.out_file.to_string_lossy();
            self.size = Some(size);
            self.writer = Some(videoio::VideoWriter::new(
                &name,
                videoio::VideoWriter::fourcc(b'm' as _, b'p' as _, b'4' as _, b'v' as _)?,
                self.fps,
                core::Size::new(size.0 as i32, size.1 as i32),
                true,
            )?);

            Ok(())
        }
    }

    impl FrameSink for VideoWriter {
        fn write(&mut self, frame: &Frame) -> Result<(), Error> {
            let size = frame.dims();
            if self.writer.is_none() || self.size != Some(size) {
                self.reinit(size)?;
            }

            let mat = frame_to_mat(frame)?;
            if let Some(w) = self.writer.as_mut() {
                w.write(&mat)?;
            }

            Ok(())
        }
    }

    impl Drop for VideoWriter {
        fn drop(&mut self) {
            if let Err(err) = self.release() {
                warn!(%err, "could not finalize video");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_source_reindexes_and_counts() {
        let mut src = VecSource::new(vec![Frame::blank(9, 2, 2), Frame::blank(9, 2, 2)], 25.0);

        assert_eq!(src.frame_count(), Some(2));
        assert_eq!(src.read().unwrap().unwrap().index, 0);
        assert_eq!(src.read().unwrap().unwrap().index, 1);
        assert!(src.read().unwrap().is_none());
        assert_eq!(src.frames_read(), 2);
    }
}
