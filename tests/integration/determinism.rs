//! Scheduling determinism: FIFO hand-out within a task and stable block
//! identity across runs.

use crate::fixtures::OrderLog;
use blockwise::{run, Block, Roi, Task, TaskId};
use std::sync::Arc;

fn roi_1d(len: i64) -> Roi {
    Roi::new(vec![0], vec![len]).unwrap()
}

#[tokio::test]
async fn test_single_worker_processes_in_block_id_order() {
    let log = Arc::new(OrderLog::default());
    let sink = Arc::clone(&log);
    let task = Task::new("a", roi_1d(120), vec![10], move |block: &Block| {
        sink.record(block);
        Ok(())
    });

    run(vec![task]).await.unwrap();
    let order = log.snapshot();
    assert_eq!(order, (0..12).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_chained_single_workers_stay_ordered() {
    // With aligned grids and single workers, the downstream task also
    // receives its blocks in ascending order: block i becomes ready as
    // soon as upstream block i completes, in order.
    let log = Arc::new(OrderLog::default());
    let sink = Arc::clone(&log);
    let a = Task::new("a", roi_1d(60), vec![10], |_: &Block| Ok(()));
    let b = Task::new("b", roi_1d(60), vec![10], move |block: &Block| {
        sink.record(block);
        Ok(())
    })
    .depends_on("a");

    run(vec![a, b]).await.unwrap();
    assert_eq!(log.snapshot(), (0..6).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_block_geometry_identical_across_runs() {
    // The same task definition yields the same block identities and
    // ROIs on every run, so re-runs and retries address stable work.
    let collect = |log: Arc<std::sync::Mutex<Vec<(u64, Vec<i64>)>>>| {
        move |block: &Block| -> Result<(), blockwise::BlockFault> {
            log.lock()
                .unwrap()
                .push((block.id.0, block.write_roi.offset().to_vec()));
            Ok(())
        }
    };

    let first = Arc::new(std::sync::Mutex::new(Vec::new()));
    let second = Arc::new(std::sync::Mutex::new(Vec::new()));
    run(vec![Task::new(
        "a",
        roi_1d(95),
        vec![10],
        collect(Arc::clone(&first)),
    )])
    .await
    .unwrap();
    run(vec![Task::new(
        "a",
        roi_1d(95),
        vec![10],
        collect(Arc::clone(&second)),
    )])
    .await
    .unwrap();

    let mut a = first.lock().unwrap().clone();
    let mut b = second.lock().unwrap().clone();
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert_eq!(a.len(), 10);
}

#[tokio::test]
async fn test_summary_deterministic_for_fixed_input() {
    let task_ids: Vec<TaskId> = vec![TaskId::from("x"), TaskId::from("y")];
    for _ in 0..3 {
        let x = Task::new("x", roi_1d(70), vec![10], |_: &Block| Ok(()));
        let y = Task::new("y", roi_1d(70), vec![10], |_: &Block| Ok(())).depends_on("x");
        let report = run(vec![x, y]).await.unwrap();
        for id in &task_ids {
            let summary = report.summary(id).unwrap();
            assert_eq!(summary.num_blocks, 7);
            assert_eq!(summary.completed, 7);
        }
    }
}
