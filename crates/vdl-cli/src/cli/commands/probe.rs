//! `vdl probe` – fetch metadata for targets in parallel.

use anyhow::{bail, Result};
use vdl_core::config::VdlConfig;
use vdl_core::session::Session;

use super::watch::watch_batch;

pub async fn run_probe(cfg: VdlConfig, targets: &[String]) -> Result<()> {
    let tick = cfg.tick();
    let session = Session::with_command_launcher(cfg);
    let mut batch = session.prefetch(targets);

    // Ctrl-C stops probes that have not started; in-flight ones finish.
    let token = batch.cancel_token().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupted; cancelling pending probes");
            token.cancel();
        }
    });
    let tally = watch_batch(&mut batch, tick).await;
    interrupt.abort();
    let tally = tally?;

    println!(
        "{} probed, {} failed ({} cached)",
        tally.succeeded,
        tally.failed,
        session.cache().len()
    );
    if tally.failed > 0 {
        bail!("{} of {} probes failed", tally.failed, targets.len());
    }
    Ok(())
}
