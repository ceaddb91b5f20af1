//! Faults, retries, and orphan propagation across task boundaries.

use crate::fixtures::FlakyProcessor;
use blockwise::{run, Block, BlockFault, Error, Roi, Task, TaskConfig, TaskId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn roi_1d(len: i64) -> Roi {
    Roi::new(vec![0], vec![len]).unwrap()
}

fn tid(id: &str) -> TaskId {
    TaskId::from(id)
}

#[tokio::test]
async fn test_single_fault_zero_budget() {
    // One block always faults with retry budget 0: final summary shows
    // failed=1 and the rest completed.
    let task = Task::new("a", roi_1d(50), vec![10], |block: &Block| {
        if block.id.0 == 2 {
            Err(BlockFault::new("corrupt chunk"))
        } else {
            Ok(())
        }
    });

    let err = run(vec![task]).await.unwrap_err();
    let Error::RunFailed(report) = err else {
        panic!("expected RunFailed");
    };
    let summary = report.summary(&tid("a")).unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.orphaned, 0);
}

#[tokio::test]
async fn test_fault_orphans_overlapping_downstream() {
    // Downstream blocks whose read ROI overlaps the failed write ROI
    // become orphaned; the rest complete.
    let a = Task::new("a", roi_1d(50), vec![10], |block: &Block| {
        if block.id.0 == 0 {
            Err(BlockFault::new("boom"))
        } else {
            Ok(())
        }
    });
    // Context 1: downstream block 1 reads [9,21) and also overlaps the
    // failed write [0,10), so blocks 0 and 1 are both orphaned.
    let b = Task::new("b", roi_1d(50), vec![10], |_: &Block| Ok(()))
        .with_context(vec![1])
        .depends_on("a");

    let err = run(vec![a, b]).await.unwrap_err();
    let Error::RunFailed(report) = err else {
        panic!("expected RunFailed");
    };
    assert_eq!(report.summary(&tid("a")).unwrap().failed, 1);
    let b_summary = report.summary(&tid("b")).unwrap();
    assert_eq!(b_summary.orphaned, 2);
    assert_eq!(b_summary.completed, 3);
}

#[tokio::test]
async fn test_orphans_cascade_through_chain() {
    let a = Task::new("a", roi_1d(10), vec![10], |_: &Block| {
        Err(BlockFault::new("boom"))
    });
    let b = Task::new("b", roi_1d(10), vec![10], |_: &Block| Ok(())).depends_on("a");
    let c = Task::new("c", roi_1d(10), vec![10], |_: &Block| Ok(())).depends_on("b");

    let err = run(vec![a, b, c]).await.unwrap_err();
    let Error::RunFailed(report) = err else {
        panic!("expected RunFailed");
    };
    assert_eq!(report.summary(&tid("a")).unwrap().failed, 1);
    assert_eq!(report.summary(&tid("b")).unwrap().orphaned, 1);
    assert_eq!(report.summary(&tid("c")).unwrap().orphaned, 1);
}

#[tokio::test]
async fn test_retry_budget_exhaustion() {
    // Every attempt faults; budget 2 allows three invocations, then the
    // block fails terminally.
    let flaky = FlakyProcessor::new(u64::MAX);
    let task = Task::new("a", roi_1d(10), vec![10], flaky.clone()).with_config(TaskConfig {
        num_workers: 1,
        retry_budget: 2,
    });

    let err = run(vec![task]).await.unwrap_err();
    let Error::RunFailed(report) = err else {
        panic!("expected RunFailed");
    };
    assert_eq!(report.summary(&tid("a")).unwrap().failed, 1);
    assert_eq!(flaky.invocations(), 3);
}

#[tokio::test]
async fn test_retry_recovers_transient_fault() {
    // Faults twice, then succeeds; budget 2 is exactly enough.
    let flaky = FlakyProcessor::new(2);
    let task = Task::new("a", roi_1d(10), vec![10], flaky.clone()).with_config(TaskConfig {
        num_workers: 1,
        retry_budget: 2,
    });

    let report = run(vec![task]).await.unwrap();
    assert_eq!(report.summary(&tid("a")).unwrap().completed, 1);
    assert_eq!(flaky.invocations(), 3);
}

#[tokio::test]
async fn test_idempotent_processor_retries_same_block() {
    // The retried invocation sees the same block identity and the same
    // write ROI, so a deterministic processor produces the same output.
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let first = Arc::new(AtomicU64::new(0));
    let task = Task::new("a", roi_1d(10), vec![10], move |block: &Block| {
        log.lock()
            .unwrap()
            .push((block.id, block.write_roi.clone()));
        if first.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(BlockFault::new("transient"))
        } else {
            Ok(())
        }
    })
    .with_config(TaskConfig {
        num_workers: 1,
        retry_budget: 1,
    });

    run(vec![task]).await.unwrap();
    let invocations = seen.lock().unwrap();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[0], invocations[1]);
}

#[tokio::test]
async fn test_panicking_processor_is_contained() {
    let task = Task::new(
        "a",
        roi_1d(30),
        vec![10],
        |block: &Block| -> Result<(), BlockFault> {
            if block.id.0 == 1 {
                panic!("bug in process function");
            }
            Ok(())
        },
    );

    // The panic becomes a block failure, not a crash.
    let err = run(vec![task]).await.unwrap_err();
    let Error::RunFailed(report) = err else {
        panic!("expected RunFailed");
    };
    let summary = report.summary(&tid("a")).unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 2);
}

#[tokio::test]
async fn test_failure_in_one_branch_spares_the_other() {
    // Diamond: a -> {b, c} -> d. b fails; c completes; d is orphaned
    // only through b.
    let a = Task::new("a", roi_1d(10), vec![10], |_: &Block| Ok(()));
    let b = Task::new("b", roi_1d(10), vec![10], |_: &Block| {
        Err(BlockFault::new("boom"))
    })
    .depends_on("a");
    let c = Task::new("c", roi_1d(10), vec![10], |_: &Block| Ok(())).depends_on("a");
    let d = Task::new("d", roi_1d(10), vec![10], |_: &Block| Ok(()))
        .depends_on("b")
        .depends_on("c");

    let err = run(vec![a, b, c, d]).await.unwrap_err();
    let Error::RunFailed(report) = err else {
        panic!("expected RunFailed");
    };
    assert_eq!(report.summary(&tid("a")).unwrap().completed, 1);
    assert_eq!(report.summary(&tid("b")).unwrap().failed, 1);
    assert_eq!(report.summary(&tid("c")).unwrap().completed, 1);
    assert_eq!(report.summary(&tid("d")).unwrap().orphaned, 1);
}
