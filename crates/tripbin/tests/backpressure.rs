use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tripbin::{FlowControl, OutputOrder, PoolConfig, WorkerPool};

/// Records the pool's signals and releases the blocked jobs on the first
/// pause, so the in-flight count is guaranteed to cross the mark.
struct Gate {
    open: Arc<AtomicBool>,
    paused: bool,
    pauses: u32,
    resumes: u32,
}

impl FlowControl for Gate {
    fn pause(&mut self) {
        assert!(!self.paused, "paused twice without a resume");
        self.paused = true;
        self.pauses += 1;
        self.open.store(true, Ordering::Release);
    }

    fn resume(&mut self) {
        assert!(self.paused, "resumed without a pause");
        self.paused = false;
        self.resumes += 1;
    }
}

fn run(order: OutputOrder) -> (Vec<u32>, Gate) {
    let open = Arc::new(AtomicBool::new(false));
    let mut gate = Gate {
        open: Arc::clone(&open),
        paused: false,
        pauses: 0,
        resumes: 0,
    };

    let pool = WorkerPool::new(PoolConfig {
        workers: 4,
        high_water_mark: 10_000,
        order,
    })
    .unwrap();

    let mut written = Vec::new();
    let report = pool
        .run_with_flow(
            (0u32..25_000).map(Ok),
            move |n| {
                while !open.load(Ordering::Acquire) {
                    std::thread::yield_now();
                }
                Ok(n.to_le_bytes().to_vec())
            },
            |bytes| {
                written.push(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
                Ok(())
            },
            &mut gate,
        )
        .unwrap();

    assert_eq!(report.dispatched, 25_000);
    assert_eq!(report.completed, 25_000);
    assert!(report.pauses >= 1);
    assert_eq!(report.pauses, report.resumes);
    assert!(report.peak_in_flight > 10_000);

    (written, gate)
}

#[test]
fn pauses_and_resumes_and_completes_every_job_once() {
    let (written, gate) = run(OutputOrder::Completion);

    assert!(gate.pauses >= 1);
    assert_eq!(gate.pauses, gate.resumes);
    assert!(!gate.paused);

    assert_eq!(written.len(), 25_000);
    let unique: HashSet<_> = written.iter().copied().collect();
    assert_eq!(unique.len(), 25_000);
}

#[test]
fn dispatch_order_survives_backpressure() {
    let (written, gate) = run(OutputOrder::Dispatch);
    assert!(gate.pauses >= 1);
    assert_eq!(written, (0..25_000).collect::<Vec<_>>());
}
