//! Channel renewal, once or as a foreground loop.

use crmsync_engine::{RenewalConfig, RenewalTask, Shutdown};
use tracing::info;

use super::App;
use crate::error::CliResult;

pub async fn run(app: &App, config: RenewalConfig, watch: bool) -> CliResult<()> {
    let task = RenewalTask::new(app.manager.clone(), app.store.clone(), config);

    if !watch {
        let report = task.renew_due().await?;
        for (old, new) in &report.renewed {
            println!("renewed {} as {}", old, new);
        }
        for id in &report.failed {
            println!("failed to renew {}", id);
        }
        if report.renewed.is_empty() && report.failed.is_empty() {
            println!("No channels due for renewal.");
        }
        return Ok(());
    }

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();
    info!("renewal loop running, Ctrl+C to stop");
    task.run(shutdown.signal()).await;
    Ok(())
}
