//! Bounded worker pool for independent per-unit transform jobs.
//!
//! Jobs run on a fixed rayon pool; each finished job reports back over a
//! channel as `(seq, Ok(bytes) | Err(reason))` and a single consumer loop
//! writes results to the sink. Admission is bounded by a high-water mark:
//! once more than `high_water_mark` jobs are in flight the input stops being
//! pulled until completions bring the count back under the mark. Jobs already
//! dispatched when the mark is crossed still run, so the in-flight count may
//! overshoot by a little.
//!
//! Any job error aborts the run. Jobs not yet started are skipped and nothing
//! more is dispatched.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_HIGH_WATER_MARK: usize = 10_000;

/// Order in which job results reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputOrder {
    /// As jobs finish. Records are self-describing, so readers do not need
    /// input order.
    #[default]
    Completion,
    /// In input order, holding early finishers in a reorder buffer.
    Dispatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub high_water_mark: usize,
    pub order: OutputOrder,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            order: OutputOrder::Completion,
        }
    }
}

/// Receives the pool's pause/resume requests for the input source.
pub trait FlowControl {
    fn pause(&mut self) {}
    fn resume(&mut self) {}
}

impl FlowControl for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolReport {
    pub dispatched: u64,
    pub completed: u64,
    pub pauses: u64,
    pub resumes: u64,
    pub peak_in_flight: usize,
}

struct Completion {
    seq: u64,
    outcome: Result<Vec<u8>>,
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    config: PoolConfig,
}

impl WorkerPool {
    /// Zero workers or a zero high-water mark are raised to one.
    pub fn new(config: PoolConfig) -> Result<Self> {
        let config = PoolConfig {
            workers: config.workers.max(1),
            high_water_mark: config.high_water_mark.max(1),
            ..config
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("tripbin-worker-{i}"))
            .build()
            .map_err(|e| Error::Worker(e.to_string()))?;

        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn run<T, I, F, S>(&self, inputs: I, job: F, sink: S) -> Result<PoolReport>
    where
        I: IntoIterator<Item = Result<T>>,
        T: Send + 'static,
        F: Fn(T) -> Result<Vec<u8>> + Send + Sync + 'static,
        S: FnMut(Vec<u8>) -> Result<()>,
    {
        self.run_with_flow(inputs, job, sink, &mut ())
    }

    /// Dispatch one job per input, writing each result to `sink`.
    ///
    /// Returns once the input is exhausted and every dispatched job has been
    /// written. An input error or job error is returned as soon as it is
    /// seen.
    pub fn run_with_flow<T, I, F, S, C>(
        &self,
        inputs: I,
        job: F,
        sink: S,
        flow: &mut C,
    ) -> Result<PoolReport>
    where
        I: IntoIterator<Item = Result<T>>,
        T: Send + 'static,
        F: Fn(T) -> Result<Vec<u8>> + Send + Sync + 'static,
        S: FnMut(Vec<u8>) -> Result<()>,
        C: FlowControl + ?Sized,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let aborted = Arc::new(AtomicBool::new(false));

        let mut run = Run {
            rx,
            sink,
            order: self.config.order,
            in_flight: 0,
            next_to_write: 0,
            reorder: BTreeMap::new(),
            report: PoolReport::default(),
        };

        let result = self.dispatch_all(inputs, Arc::new(job), &tx, &aborted, &mut run, flow);
        if result.is_err() {
            aborted.store(true, Ordering::Release);
        }
        result?;

        while run.in_flight > 0 {
            if let Err(err) = run.wait_one() {
                aborted.store(true, Ordering::Release);
                return Err(err);
            }
        }

        info!(
            "pool finished: {} jobs, {} pauses, peak {} in flight",
            run.report.completed, run.report.pauses, run.report.peak_in_flight
        );
        Ok(run.report)
    }

    fn dispatch_all<T, I, F, S, C>(
        &self,
        inputs: I,
        job: Arc<F>,
        tx: &Sender<Completion>,
        aborted: &Arc<AtomicBool>,
        run: &mut Run<S>,
        flow: &mut C,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Result<T>>,
        T: Send + 'static,
        F: Fn(T) -> Result<Vec<u8>> + Send + Sync + 'static,
        S: FnMut(Vec<u8>) -> Result<()>,
        C: FlowControl + ?Sized,
    {
        let high_water_mark = self.config.high_water_mark;

        for input in inputs {
            let input = input?;
            let seq = run.report.dispatched;

            let tx = tx.clone();
            let job = Arc::clone(&job);
            let aborted = Arc::clone(aborted);
            self.pool.spawn(move || {
                if aborted.load(Ordering::Acquire) {
                    return;
                }
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(input)))
                    .unwrap_or_else(|payload| Err(Error::WorkerPanicked(panic_message(payload))));
                // A closed channel means the run already failed.
                let _ = tx.send(Completion { seq, outcome });
            });

            run.report.dispatched += 1;
            run.in_flight += 1;
            run.report.peak_in_flight = run.report.peak_in_flight.max(run.in_flight);

            while let Ok(done) = run.rx.try_recv() {
                run.complete(done)?;
            }

            if run.in_flight > high_water_mark {
                debug!("{} jobs in flight; pausing input", run.in_flight);
                flow.pause();
                run.report.pauses += 1;

                while run.in_flight >= high_water_mark {
                    run.wait_one()?;
                }

                debug!("{} jobs in flight; resuming input", run.in_flight);
                flow.resume();
                run.report.resumes += 1;
            }
        }

        Ok(())
    }
}

/// Consumer-side state of one `run` call.
struct Run<S> {
    rx: Receiver<Completion>,
    sink: S,
    order: OutputOrder,
    in_flight: usize,
    next_to_write: u64,
    reorder: BTreeMap<u64, Vec<u8>>,
    report: PoolReport,
}

impl<S> Run<S>
where
    S: FnMut(Vec<u8>) -> Result<()>,
{
    fn wait_one(&mut self) -> Result<()> {
        let done = self
            .rx
            .recv()
            .map_err(|_| Error::Worker("result channel closed".into()))?;
        self.complete(done)
    }

    /// A job stays in flight until its bytes reach the sink, so results
    /// parked in the reorder buffer still hold back the input.
    fn complete(&mut self, done: Completion) -> Result<()> {
        let bytes = match done.outcome {
            Ok(bytes) => bytes,
            Err(err) => {
                self.in_flight -= 1;
                return Err(err);
            }
        };
        self.report.completed += 1;

        match self.order {
            OutputOrder::Completion => {
                self.in_flight -= 1;
                (self.sink)(bytes)
            }
            OutputOrder::Dispatch => {
                self.reorder.insert(done.seq, bytes);
                while let Some(bytes) = self.reorder.remove(&self.next_to_write) {
                    self.in_flight -= 1;
                    self.next_to_write += 1;
                    (self.sink)(bytes)?;
                }
                Ok(())
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
