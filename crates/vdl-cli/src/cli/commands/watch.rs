//! Drives a batch's progress consumer and prints applied events.

use anyhow::{Context, Result};
use std::time::Duration;
use vdl_core::job::{JobId, JobStatus};
use vdl_core::session::Batch;

/// Final per-batch counts, read from the consumer's board.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
}

fn print_event(job_id: JobId, text: &str) {
    println!("[{:>3}] {}", job_id, text);
}

/// Prints progress until every job of the batch is terminal, then waits
/// for the workers to release their slots.
pub async fn watch_batch(batch: &mut Batch, tick: Duration) -> Result<Tally> {
    let mut consumer = batch
        .consumer(print_event)
        .context("progress for this batch is already being consumed")?;
    consumer.run(tick).await;
    let board = consumer.board();
    let tally = Tally {
        succeeded: board.count(JobStatus::Succeeded),
        failed: board.count(JobStatus::Failed),
    };

    let scheduler = batch.scheduler().clone();
    tokio::task::spawn_blocking(move || scheduler.wait_idle())
        .await
        .context("wait for workers")?;
    Ok(tally)
}
