//! Graceful and hard stop behavior.

use blockwise::{run_with, Block, Error, Roi, RunOptions, Task, TaskId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn roi_1d(len: i64) -> Roi {
    Roi::new(vec![0], vec![len]).unwrap()
}

fn tid(id: &str) -> TaskId {
    TaskId::from(id)
}

#[tokio::test]
async fn test_graceful_cancel_preserves_block_accounting() {
    // One slow worker, 20 blocks; cancel long before the run could
    // finish. Every block ends terminal and the categories add up.
    let completed_by_processor = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&completed_by_processor);
    let task = Task::new("slow", roi_1d(200), vec![10], move |_: &Block| {
        std::thread::sleep(Duration::from_millis(30));
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let cancel = CancellationToken::new();
    let options = RunOptions {
        cancel: cancel.clone(),
        ..RunOptions::default()
    };

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
    });

    let err = run_with(vec![task], options).await.unwrap_err();
    stopper.await.unwrap();

    let Error::Cancelled(report) = err else {
        panic!("expected Cancelled");
    };
    let summary = report.summary(&tid("slow")).unwrap();
    assert_eq!(
        summary.completed + summary.skipped + summary.cancelled + summary.failed + summary.orphaned,
        summary.num_blocks
    );
    assert!(summary.cancelled > 0, "nothing was cancelled: {}", summary);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.orphaned, 0);

    // In-flight blocks were allowed to finish: every invocation that
    // started is accounted as completed, none were torn down mid-run.
    assert_eq!(summary.completed, completed_by_processor.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_graceful_cancel_covers_downstream_tasks() {
    let a = Task::new("a", roi_1d(100), vec![10], |_: &Block| {
        std::thread::sleep(Duration::from_millis(25));
        Ok(())
    });
    let b = Task::new("b", roi_1d(100), vec![10], |_: &Block| Ok(())).depends_on("a");

    let cancel = CancellationToken::new();
    let options = RunOptions {
        cancel: cancel.clone(),
        ..RunOptions::default()
    };
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
    });

    let err = run_with(vec![a, b], options).await.unwrap_err();
    let Error::Cancelled(report) = err else {
        panic!("expected Cancelled");
    };
    for id in ["a", "b"] {
        let summary = report.summary(&tid(id)).unwrap();
        assert_eq!(
            summary.completed + summary.cancelled,
            summary.num_blocks,
            "task {}: {}",
            id,
            summary
        );
    }
    // The downstream task barely started; most of it is cancelled.
    assert!(report.summary(&tid("b")).unwrap().cancelled > 0);
}

#[tokio::test]
async fn test_cancel_before_start_cancels_everything() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let options = RunOptions {
        cancel: cancel.clone(),
        ..RunOptions::default()
    };

    let invoked = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&invoked);
    let task = Task::new("a", roi_1d(50), vec![10], move |_: &Block| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let err = run_with(vec![task], options).await.unwrap_err();
    let Error::Cancelled(report) = err else {
        panic!("expected Cancelled");
    };
    let summary = report.summary(&tid("a")).unwrap();
    // A couple of blocks may slip in before the token is observed, but
    // the accounting always closes.
    assert_eq!(
        summary.completed + summary.cancelled,
        summary.num_blocks
    );
    assert!(summary.cancelled > 0);
}

#[tokio::test]
async fn test_hard_cancel_does_not_wait_for_in_flight() {
    // Four slow blocks, one worker. Hard cancel at 50ms: the in-flight
    // block is counted cancelled, not completed, and the run returns
    // without waiting out the sleep.
    let task = Task::new("slow", roi_1d(40), vec![10], |_: &Block| {
        std::thread::sleep(Duration::from_millis(250));
        Ok(())
    });

    let cancel = CancellationToken::new();
    let options = RunOptions {
        cancel: cancel.clone(),
        hard_cancel: true,
        ..RunOptions::default()
    };
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let err = run_with(vec![task], options).await.unwrap_err();
    let elapsed = started.elapsed();

    let Error::Cancelled(report) = err else {
        panic!("expected Cancelled");
    };
    let summary = report.summary(&tid("slow")).unwrap();
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.cancelled, 4);
    // Returned well before the 250ms block could have finished.
    assert!(
        elapsed < Duration::from_millis(240),
        "hard cancel took {:?}",
        elapsed
    );
}
