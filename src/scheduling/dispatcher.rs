//! The dispatcher: single owner of the scheduler state machine.
//!
//! One tokio task receives every worker message, drives the scheduler
//! one transition at a time, emits scheduler events, and honors the
//! cancellation token. Claim requests with no ready block are parked and
//! answered as soon as a release makes one ready, or with `Drained` once
//! the task can never yield another block.
//!
//! This module also hosts the run entry points: [`run`], [`run_with`],
//! and [`run_blocking`].

use crate::config::RunOptions;
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use crate::report::{LogReporter, ProgressReporter, RunReport, SchedulerEvent};
use crate::scheduling::pool::{ClaimReply, WorkerMessage, WorkerPool};
use crate::scheduling::scheduler::{ReleaseEffect, Scheduler};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Drives the scheduler until every block is terminal.
pub struct Dispatcher {
    scheduler: Scheduler,
    rx: mpsc::Receiver<WorkerMessage>,
    event_tx: mpsc::Sender<SchedulerEvent>,
    cancel: CancellationToken,
    hard_cancel: bool,
    /// Parked claim replies, per task, in arrival order.
    waiting: HashMap<TaskId, VecDeque<oneshot::Sender<ClaimReply>>>,
    /// Tasks for which TaskCompleted was already emitted.
    done_emitted: HashSet<TaskId>,
}

impl Dispatcher {
    pub fn new(
        scheduler: Scheduler,
        rx: mpsc::Receiver<WorkerMessage>,
        event_tx: mpsc::Sender<SchedulerEvent>,
        cancel: CancellationToken,
        hard_cancel: bool,
    ) -> Self {
        Self {
            scheduler,
            rx,
            event_tx,
            cancel,
            hard_cancel,
            waiting: HashMap::new(),
            done_emitted: HashSet::new(),
        }
    }

    /// The main dispatch loop. Returns the final report once every block
    /// is terminal (or, in hard-cancel mode, as soon as the stop signal
    /// is observed).
    pub async fn run(mut self) -> RunReport {
        // Tasks that partition into zero blocks are done before any
        // message arrives.
        let task_ids: Vec<TaskId> = self
            .scheduler
            .graph()
            .tasks()
            .map(|t| t.id.clone())
            .collect();
        for task_id in task_ids {
            self.emit_task_done(&task_id).await;
        }

        let mut cancelled = false;
        while !self.scheduler.is_done() {
            tokio::select! {
                _ = self.cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    self.handle_cancel().await;
                    if self.hard_cancel {
                        break;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_message(msg).await,
                        // All workers gone; nothing further can change.
                        None => break,
                    }
                }
            }
        }

        self.flush_waiting_all().await;
        if self.scheduler.is_done() && !cancelled {
            self.emit(SchedulerEvent::RunComplete).await;
        }
        self.scheduler.report()
    }

    async fn handle_message(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Claim {
                task_id, reply, ..
            } => {
                self.handle_claim(task_id, reply).await;
            }
            WorkerMessage::Started {
                task_id,
                block_id,
                worker_id,
            } => {
                self.scheduler.mark_running(&task_id, block_id);
                self.emit(SchedulerEvent::BlockStarted {
                    task_id,
                    block_id,
                    worker_id,
                })
                .await;
            }
            WorkerMessage::Release {
                task_id,
                block_id,
                outcome,
                ..
            } => {
                let result = self.scheduler.release(&task_id, block_id, outcome);

                let event = match result.effect {
                    ReleaseEffect::Completed => SchedulerEvent::BlockCompleted {
                        task_id: task_id.clone(),
                        block_id,
                    },
                    ReleaseEffect::Skipped => SchedulerEvent::BlockSkipped {
                        task_id: task_id.clone(),
                        block_id,
                    },
                    ReleaseEffect::Retried { attempt } => SchedulerEvent::BlockRetried {
                        task_id: task_id.clone(),
                        block_id,
                        attempt,
                    },
                    ReleaseEffect::Failed { fault } => SchedulerEvent::BlockFailed {
                        task_id: task_id.clone(),
                        block_id,
                        fault,
                    },
                };
                self.emit(event).await;

                for (orphan_task, orphan_block) in result.orphaned {
                    self.emit(SchedulerEvent::BlockOrphaned {
                        task_id: orphan_task,
                        block_id: orphan_block,
                    })
                    .await;
                }

                for updated in result.updated_tasks {
                    self.emit_progress(&updated).await;
                    self.serve_waiting(&updated).await;
                    self.emit_task_done(&updated).await;
                }
            }
        }
    }

    async fn handle_claim(
        &mut self,
        task_id: TaskId,
        reply: oneshot::Sender<ClaimReply>,
    ) {
        if let Some(block) = self.scheduler.acquire(&task_id) {
            let block_id = block.id;
            if reply.send(ClaimReply::Assigned(block)).is_err() {
                // Worker vanished between claim and delivery.
                self.scheduler.requeue(&task_id, block_id);
                return;
            }
            self.emit_progress(&task_id).await;
        } else if self.scheduler.is_drained(&task_id) {
            let _ = reply.send(ClaimReply::Drained);
        } else {
            self.waiting.entry(task_id).or_default().push_back(reply);
        }
    }

    /// Answer parked claims of a task after its state changed.
    async fn serve_waiting(&mut self, task_id: &TaskId) {
        loop {
            let Some(queue) = self.waiting.get_mut(task_id) else {
                return;
            };
            let Some(reply) = queue.pop_front() else {
                return;
            };
            if reply.is_closed() {
                continue;
            }
            if let Some(block) = self.scheduler.acquire(task_id) {
                let block_id = block.id;
                if reply.send(ClaimReply::Assigned(block)).is_err() {
                    self.scheduler.requeue(task_id, block_id);
                    continue;
                }
                self.emit_progress(task_id).await;
            } else if self.scheduler.is_drained(task_id) {
                let _ = reply.send(ClaimReply::Drained);
            } else {
                // Nothing ready yet; park it again.
                if let Some(queue) = self.waiting.get_mut(task_id) {
                    queue.push_front(reply);
                }
                return;
            }
        }
    }

    async fn handle_cancel(&mut self) {
        self.emit(SchedulerEvent::RunCancelled).await;

        let counts = self.scheduler.cancel();
        for (task_id, count) in counts {
            self.emit(SchedulerEvent::BlocksCancelled {
                task_id: task_id.clone(),
                count,
            })
            .await;
            self.emit_progress(&task_id).await;
            self.emit_task_done(&task_id).await;
        }

        if self.hard_cancel {
            let counts = self.scheduler.cancel_in_flight();
            for (task_id, count) in counts {
                self.emit(SchedulerEvent::BlocksCancelled {
                    task_id: task_id.clone(),
                    count,
                })
                .await;
                self.emit_progress(&task_id).await;
            }
        }

        // No block will become ready anymore; release every parked claim.
        self.flush_waiting_all().await;
    }

    async fn flush_waiting_all(&mut self) {
        for (_, queue) in self.waiting.drain() {
            for reply in queue {
                let _ = reply.send(ClaimReply::Drained);
            }
        }
    }

    async fn emit_progress(&mut self, task_id: &TaskId) {
        if let Some(state) = self.scheduler.task_state(task_id) {
            let state = state.clone();
            self.emit(SchedulerEvent::Progress {
                task_id: task_id.clone(),
                state,
            })
            .await;
        }
    }

    async fn emit_task_done(&mut self, task_id: &TaskId) {
        let done = self
            .scheduler
            .task_state(task_id)
            .map(|s| s.is_done())
            .unwrap_or(false);
        if done && self.done_emitted.insert(task_id.clone()) {
            self.emit(SchedulerEvent::TaskCompleted {
                task_id: task_id.clone(),
            })
            .await;
        }
    }

    async fn emit(&mut self, event: SchedulerEvent) {
        let _ = self.event_tx.send(event).await;
    }
}

/// Execute a set of tasks with default options.
///
/// Returns the per-task report on a clean run. A run with failed or
/// orphaned blocks returns [`Error::RunFailed`]; a run stopped by the
/// cancellation token returns [`Error::Cancelled`]. Both carry the full
/// report. Graph errors (cycles, unknown tasks, bad geometry) abort
/// before any block executes.
pub async fn run(tasks: Vec<Task>) -> Result<RunReport> {
    run_with(tasks, RunOptions::default()).await
}

/// Execute a set of tasks with explicit [`RunOptions`].
pub async fn run_with(tasks: Vec<Task>, options: RunOptions) -> Result<RunReport> {
    let scheduler = Scheduler::new(tasks)?;

    let capacity = options.channel_capacity.max(1);
    let (msg_tx, msg_rx) = mpsc::channel(capacity);
    let (event_tx, mut event_rx) = mpsc::channel(capacity);

    let reporter: Arc<dyn ProgressReporter> = options
        .reporter
        .clone()
        .unwrap_or_else(|| Arc::new(LogReporter));
    let reporter_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            reporter.on_event(&event);
        }
    });

    // One pool per task: the total worker budget is the sum of the
    // per-task sizes.
    let pools: Vec<WorkerPool> = scheduler
        .graph()
        .tasks()
        .map(|task| WorkerPool::spawn(task, msg_tx.clone()))
        .collect();
    drop(msg_tx);

    let dispatcher = Dispatcher::new(
        scheduler,
        msg_rx,
        event_tx,
        options.cancel.clone(),
        options.hard_cancel,
    );
    let report = tokio::spawn(dispatcher.run())
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?;

    if options.hard_cancel && options.cancel.is_cancelled() {
        // In-flight process functions cannot be killed; detach them.
        for pool in &pools {
            pool.abort();
        }
    }
    for pool in pools {
        pool.join().await;
    }
    let _ = reporter_task.await;

    if report.succeeded() {
        Ok(report)
    } else {
        // A run stopped by the token, with no real failures, is reported
        // as cancelled; failures and orphans dominate otherwise.
        let cancelled_only = report
            .summaries
            .values()
            .all(|s| s.failed == 0 && s.orphaned == 0);
        if cancelled_only {
            Err(Error::Cancelled(report))
        } else {
            Err(Error::RunFailed(report))
        }
    }
}

/// Convenience wrapper for callers without a runtime of their own.
pub fn run_blocking(tasks: Vec<Task>) -> Result<RunReport> {
    tokio::runtime::Runtime::new()?.block_on(run(tasks))
}
