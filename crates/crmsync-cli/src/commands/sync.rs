//! Manual sync runs.

use crmsync_engine::DeltaReport;
use tracing::warn;

use super::{App, channel, print_json};
use crate::error::{CliError, CliResult};

pub async fn run(
    app: &App,
    channel_id: Option<&str>,
    collection_id: Option<&str>,
    json: bool,
) -> CliResult<()> {
    let targets = channel::targets(app.store.as_ref(), channel_id, collection_id)?;
    if targets.is_empty() {
        println!("No active channels.");
        return Ok(());
    }

    // A single explicit target surfaces its error directly.
    if targets.len() == 1 {
        let report = app.engine.sync_now(&targets[0]).await?;
        return print(&[report], json);
    }

    let total = targets.len();
    let mut reports = Vec::with_capacity(total);
    let mut failed = 0;
    for id in &targets {
        match app.engine.sync_now(id).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                warn!(channel_id = %id, error = %e, "sync failed");
                eprintln!("{}: {}", id, e);
                failed += 1;
            }
        }
    }
    print(&reports, json)?;

    if failed > 0 {
        return Err(CliError::PartialSync { failed, total });
    }
    Ok(())
}

fn print(reports: &[DeltaReport], json: bool) -> CliResult<()> {
    if json {
        return print_json(&reports);
    }
    for report in reports {
        println!("{}", summary(report));
    }
    Ok(())
}

/// One-line description of a delta run.
pub(crate) fn summary(report: &DeltaReport) -> String {
    format!(
        "{}: {} page(s){}, +{} ~{} -{} (unchanged {}, skipped {}, swept {}), token {}",
        report.channel_id,
        report.pages,
        if report.full_resync { " [full resync]" } else { "" },
        report.inserted,
        report.updated,
        report.tombstoned,
        report.unchanged,
        report.skipped,
        report.swept,
        report.sync_token.as_deref().unwrap_or("-"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line() {
        let report = DeltaReport {
            channel_id: "chan-1".to_string(),
            pages: 2,
            inserted: 3,
            updated: 1,
            tombstoned: 1,
            swept: 2,
            full_resync: true,
            sync_token: Some("T9".to_string()),
            ..Default::default()
        };
        assert_eq!(
            summary(&report),
            "chan-1: 2 page(s) [full resync], +3 ~1 -1 (unchanged 0, skipped 0, swept 2), token T9"
        );
    }
}
