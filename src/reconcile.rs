//! Startup sweep for rendition files that no metadata row points at.
//!
//! Uploads write files before inserting the row, so a crash in between, or a
//! failed cleanup after a later stage failed, leaves files without a row. The
//! sweep runs before the server binds, when no upload can be in flight.
//!
//! An empty metadata store next to existing renditions almost always means the
//! wrong or a recreated database file, so nothing is deleted in that case.

use std::time::{Duration, SystemTime};

use log::{info, warn};

use crate::repo::PanelRepo;
use crate::storage::{is_partial, RenditionKind, RenditionStore, StoreError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub kept: usize,
    pub removed: usize,
    /// Orphans younger than the grace period, left for a later sweep.
    pub deferred: usize,
    pub ignored: usize,
}

enum Verdict {
    Keep,
    Orphan,
    Partial,
}

/// Deletes leftover `.part` files, and rendition files with no row once they
/// are at least `grace` old.
pub async fn sweep_orphans(
    repo: &dyn PanelRepo,
    store: &dyn RenditionStore,
    grace: Duration,
) -> anyhow::Result<SweepReport> {
    let known = repo.panel_ids().await?;
    let mut report = SweepReport::default();

    let mut entries = Vec::new();
    for kind in RenditionKind::ALL {
        for name in store.list(kind).await? {
            let verdict = if is_partial(&name) {
                Verdict::Partial
            } else {
                match kind.parse_file_name(&name) {
                    Some(id) if known.contains(&id.to_string()) => Verdict::Keep,
                    Some(_) => Verdict::Orphan,
                    None => {
                        report.ignored += 1;
                        continue;
                    }
                }
            };
            entries.push((kind, name, verdict));
        }
    }

    let renditions = entries.iter().filter(|(_, _, v)| !matches!(v, Verdict::Partial)).count();
    if known.is_empty() && renditions > 0 {
        warn!(
            "metadata store has no panels but {renditions} rendition files exist; \
             not sweeping (check DATABASE_PATH)"
        );
        report.kept = renditions;
        return Ok(report);
    }

    let now = SystemTime::now();
    for (kind, name, verdict) in entries {
        match verdict {
            Verdict::Keep => {
                report.kept += 1;
                continue;
            }
            Verdict::Orphan => {
                let age = match store.modified(kind, &name).await {
                    Ok(at) => now.duration_since(at).unwrap_or_default(),
                    Err(StoreError::NotFound) => continue,
                    Err(e) => {
                        warn!("could not stat {}/{name}: {e}", kind.mount());
                        report.deferred += 1;
                        continue;
                    }
                };
                if age < grace {
                    report.deferred += 1;
                    continue;
                }
            }
            Verdict::Partial => {}
        }
        match store.delete(kind, &name).await {
            Ok(()) => {
                info!("removed orphaned {}/{name}", kind.mount());
                report.removed += 1;
            }
            Err(StoreError::NotFound) => {}
            Err(e) => warn!("could not remove orphaned {}/{name}: {e}", kind.mount()),
        }
    }

    info!(
        "orphan sweep done kept={} removed={} deferred={} ignored={}",
        report.kept, report.removed, report.deferred, report.ignored
    );
    Ok(report)
}
