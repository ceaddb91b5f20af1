//! Shared fixtures: an in-memory array store and instrumented processors.

use blockwise::{Block, BlockFault, BlockProcessor, Roi};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Install a tracing subscriber for tests that want log output under
/// `RUST_LOG`. Safe to call repeatedly; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A 1-D in-memory array standing in for the external storage
/// collaborator: opaque `read(roi)` / `write(roi, values)` over i64
/// cells. Reads outside the stored range yield zeros, the way a halo
/// read against padded storage would.
pub struct ArrayStore {
    offset: i64,
    cells: Mutex<Vec<i64>>,
}

impl ArrayStore {
    pub fn new(offset: i64, len: usize) -> Self {
        Self {
            offset,
            cells: Mutex::new(vec![0; len]),
        }
    }

    pub fn read(&self, roi: &Roi) -> Vec<i64> {
        let cells = self.cells.lock().unwrap();
        (roi.begin(0)..roi.end(0))
            .map(|coord| {
                let index = coord - self.offset;
                if index >= 0 && (index as usize) < cells.len() {
                    cells[index as usize]
                } else {
                    0
                }
            })
            .collect()
    }

    pub fn write(&self, roi: &Roi, values: &[i64]) {
        let mut cells = self.cells.lock().unwrap();
        for (i, coord) in (roi.begin(0)..roi.end(0)).enumerate() {
            let index = coord - self.offset;
            if index >= 0 && (index as usize) < cells.len() {
                cells[index as usize] = values[i];
            }
        }
    }

    pub fn snapshot(&self) -> Vec<i64> {
        self.cells.lock().unwrap().clone()
    }
}

/// Counts concurrent invocations and remembers the high-water mark.
#[derive(Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Records the order in which blocks were processed.
#[derive(Default)]
pub struct OrderLog {
    order: Mutex<Vec<u64>>,
}

impl OrderLog {
    pub fn record(&self, block: &Block) {
        self.order.lock().unwrap().push(block.id.0);
    }

    pub fn snapshot(&self) -> Vec<u64> {
        self.order.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct FlakyState {
    attempts: AtomicU64,
    invocations: AtomicU64,
}

/// Faults the first `fail_first` invocations, then succeeds. Clones
/// share their counters, so a test can keep one handle for assertions
/// and hand the other to the task.
#[derive(Clone)]
pub struct FlakyProcessor {
    fail_first: u64,
    state: Arc<FlakyState>,
}

impl FlakyProcessor {
    pub fn new(fail_first: u64) -> Self {
        Self {
            fail_first,
            state: Arc::new(FlakyState::default()),
        }
    }

    pub fn invocations(&self) -> u64 {
        self.state.invocations.load(Ordering::SeqCst)
    }
}

impl BlockProcessor for FlakyProcessor {
    fn process(&self, _: &Block) -> Result<(), BlockFault> {
        self.state.invocations.fetch_add(1, Ordering::SeqCst);
        if self.state.attempts.fetch_add(1, Ordering::SeqCst) < self.fail_first {
            Err(BlockFault::new("transient storage error"))
        } else {
            Ok(())
        }
    }
}
