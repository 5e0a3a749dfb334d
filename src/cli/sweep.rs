use anyhow::Result;
use tracing::warn;

use crate::engine::{AssignmentEngine, SweepReport, SweepScope};
use crate::store::is_contention;

const SWEEP_NAME: &str = "cli";

pub fn run(
    engine: &AssignmentEngine,
    all: bool,
    batch_size: Option<usize>,
    reset: bool,
) -> Result<()> {
    let scope = if all { SweepScope::Automatic } else { SweepScope::Unassigned };
    let batch_size = batch_size.unwrap_or(engine.config().sweep.batch_size);
    // separate positions so an --all run does not skip pending events
    let name = format!("{}:{}", SWEEP_NAME, if all { "all" } else { "unassigned" });

    if reset {
        engine.reset_sweep(&name)?;
    }

    let mut report = SweepReport::default();
    loop {
        let batch = with_busy_retry(engine, || engine.sweep_batch(&name, scope, batch_size))?;
        let done = batch.done;
        report.merge(batch);
        if done {
            break;
        }
    }

    println!(
        "Processed {} events: {} by rule, {} by similarity, {} unassigned, {} pinned meanwhile",
        report.processed, report.rule, report.ai, report.unassigned, report.pinned
    );
    Ok(())
}

/// Retry an operation while another connection holds the database,
/// doubling the delay each attempt
fn with_busy_retry<T>(engine: &AssignmentEngine, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let db = &engine.config().database;
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if is_contention(&e) && attempt < db.busy_retries => {
                let delay = db.backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "Database busy, retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
            result => return result,
        }
    }
}
