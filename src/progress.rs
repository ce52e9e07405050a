use crate::crossing::SpeedResult;
use crate::detector::Detect;
use crate::error::Error;
use crate::frame::Frame;
use crate::meter::SpeedMeter;
use crate::posture::{PostureReport, PostureScorer};
use crate::skeleton::PoseEstimator;
use crate::tracker::MultiObjectTracker;
use crate::video::{FrameSink, FrameSource};

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;

#[derive(Debug, Clone)]
pub enum Progress {
    Percent(u8),
    /// Latest measured speed in m/s
    Speed(f64),
    Preview(Frame),
    SpeedDone(SpeedResult),
    PostureDone(PostureReport),
}

/// Sending half of a progress channel; events are dropped once nobody listens.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    tx: Option<Sender<Progress>>,
    previews: bool,
}

impl Reporter {
    pub fn new(tx: Sender<Progress>) -> Self {
        Self {
            tx: Some(tx),
            previews: false,
        }
    }

    /// A reporter going nowhere.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, Receiver<Progress>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }

    /// Also send every frame as [`Progress::Preview`].
    pub fn with_previews(mut self) -> Self {
        self.previews = true;
        self
    }

    pub fn send(&self, event: Progress) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Percentage of `read` over `total`; nothing is sent for an unknown total.
    pub fn progress(&self, read: u64, total: Option<u64>) {
        if let Some(total) = total.filter(|&t| t > 0) {
            self.send(Progress::Percent(((read.min(total) * 100) / total) as u8));
        }
    }

    pub fn preview(&self, frame: &Frame) {
        if self.previews {
            self.send(Progress::Preview(frame.clone()));
        }
    }
}

/// Shared stop flag, checked once per frame by the loops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs a speed measurement on its own thread.
pub fn spawn_speed<D, T, S, K>(
    mut meter: SpeedMeter<D, T>,
    mut source: S,
    mut sink: Option<K>,
    reporter: Reporter,
    cancel: CancelToken,
) -> Result<JoinHandle<Result<SpeedResult, Error>>, Error>
where
    D: Detect + Send + 'static,
    T: MultiObjectTracker + Send + 'static,
    S: FrameSource + Send + 'static,
    K: FrameSink + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("speed".into())
        .spawn(move || {
            let sink = sink.as_mut().map(|s| s as &mut dyn FrameSink);
            meter.run(&mut source, sink, &reporter, &cancel)
        })?;

    Ok(handle)
}

/// Runs a posture scan on its own thread.
pub fn spawn_posture<P, S, K>(
    mut scorer: PostureScorer<P>,
    mut source: S,
    mut sink: Option<K>,
    reporter: Reporter,
    cancel: CancelToken,
) -> Result<JoinHandle<Result<PostureReport, Error>>, Error>
where
    P: PoseEstimator + Send + 'static,
    S: FrameSource + Send + 'static,
    K: FrameSink + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("posture".into())
        .spawn(move || {
            let sink = sink.as_mut().map(|s| s as &mut dyn FrameSink);
            scorer.run(&mut source, sink, &reporter, &cancel)
        })?;

    Ok(handle)
}

/// Joins a helper thread, a panic is logged instead of propagated.
pub fn join_logged<T>(name: &str, handle: JoinHandle<T>) -> Option<T> {
    match handle.join() {
        Ok(value) => Some(value),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());

            warn!(thread = name, %reason, "thread panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_bounded() {
        let (reporter, rx) = Reporter::channel();

        reporter.progress(5, Some(10));
        reporter.progress(12, Some(10));
        reporter.progress(3, None);

        let got: Vec<_> = rx
            .try_iter()
            .filter_map(|p| match p {
                Progress::Percent(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(got, vec![50, 100]);
    }

    #[test]
    fn silent_reporter_and_dropped_receiver() {
        Reporter::silent().send(Progress::Speed(1.0));

        let (reporter, rx) = Reporter::channel();
        drop(rx);
        reporter.send(Progress::Speed(1.0));
    }

    #[test]
    fn join_logged_survives_a_panicking_thread() {
        let ok = thread::spawn(|| 7);
        let bad = thread::spawn(|| -> u8 { panic!("printer failed") });

        assert_eq!(join_logged("ok", ok), Some(7));
        assert_eq!(join_logged("bad", bad), None);
    }

    #[test]
    fn cancel_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();

        other.cancel();
        assert!(token.is_cancelled());
    }
}
