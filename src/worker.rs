use crate::detection::Detection;
use crate::detector::Detect;
use crate::error::Error;
use crate::frame::Frame;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

type Response = (u64, Result<Vec<Detection>, Error>);

/// Runs a detector on its own thread and waits at most `budget` for each answer.
///
/// A request that misses its budget fails with [`Error::InferenceTimeout`];
/// its late answer is dropped when it eventually arrives. When requests pile up
/// behind a slow inference the worker only serves the newest one.
pub struct BudgetedDetector {
    requests: Sender<(u64, Frame)>,
    responses: Receiver<Response>,
    budget: Duration,
    seq: u64,
}

impl BudgetedDetector {
    pub fn spawn<D>(mut inner: D, budget: Duration) -> Result<Self, Error>
    where
        D: Detect + Send + 'static,
    {
        let (requests, jobs) = unbounded::<(u64, Frame)>();
        let (results, responses) = unbounded::<Response>();

        thread::Builder::new()
            .name("detector".into())
            .spawn(move || {
                while let Ok(mut job) = jobs.recv() {
                    while let Ok(newer) = jobs.try_recv() {
                        job = newer;
                    }

                    let (seq, frame) = job;
                    if results.send((seq, inner.detect(&frame))).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            requests,
            responses,
            budget,
            seq: 0,
        })
    }

    #[inline]
    pub fn budget(&self) -> Duration {
        self.budget
    }
}

impl Detect for BudgetedDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
        self.seq += 1;
        let seq = self.seq;

        self.requests
            .send((seq, frame.clone()))
            .map_err(|_| Error::WorkerGone)?;

        let deadline = Instant::now() + self.budget;

        loop {
            match self.responses.recv_deadline(deadline) {
                Ok((id, result)) if id == seq => return result,
                Ok((id, _)) => debug!(stale = id, "dropping late detection"),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::InferenceTimeout(self.budget.as_millis() as u64))
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::WorkerGone),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::detection::PERSON;

    struct Sleepy {
        delay: Duration,
    }

    impl Detect for Sleepy {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Error> {
            thread::sleep(self.delay);
            let x = frame.index as f32;
            Ok(vec![Detection::new(BBox::ltrb(x, 0.0, x + 1.0, 1.0), PERSON, 1.0)])
        }
    }

    #[test]
    fn answers_within_budget() {
        let mut det = BudgetedDetector::spawn(
            Sleepy {
                delay: Duration::from_millis(1),
            },
            Duration::from_secs(5),
        )
        .unwrap();

        let dets = det.detect(&Frame::blank(7, 4, 4)).unwrap();
        assert_eq!(dets[0].x1, 7.0);
    }

    #[test]
    fn times_out_and_skips_late_answer() {
        let mut det = BudgetedDetector::spawn(
            Sleepy {
                delay: Duration::from_millis(300),
            },
            Duration::from_millis(20),
        )
        .unwrap();

        assert!(matches!(
            det.detect(&Frame::blank(1, 4, 4)),
            Err(Error::InferenceTimeout(20))
        ));

        det.budget = Duration::from_secs(5);
        let dets = det.detect(&Frame::blank(2, 4, 4)).unwrap();
        assert_eq!(dets[0].x1, 2.0);
    }
}
