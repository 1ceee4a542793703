use crate::core::error::Result;
use crate::indexing::extract::ContentExtractor;
use crate::indexing::reconcile::reconcile;
use crate::indexing::scanner::{scan, ScanPolicy};
use crate::jobs::state::{JobKind, JobRun};
use crate::search::index_manager::VectorIndex;
use crate::storage::documents::DocumentStore;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Everything a job body reads or writes
pub struct JobContext<'a> {
    pub store: &'a DocumentStore,
    pub index: &'a dyn VectorIndex,
    pub extractor: &'a dyn ContentExtractor,
    pub roots: &'a [PathBuf],
    pub policy: &'a ScanPolicy,
}

/// Label a run of `kind` starts with
pub fn first_step(kind: JobKind) -> &'static str {
    match kind {
        JobKind::FullScan => "init-store",
        JobKind::SmartRescan => "compute-changes",
    }
}

/// Rebuild everything from the filesystem:
/// `init-store -> scan-files -> insert-store -> index-build`.
/// Returns the number of records inserted.
pub fn run_full_scan(ctx: &JobContext<'_>, run: &JobRun) -> Result<usize> {
    ctx.store.reset()?;

    run.advance("scan-files");
    let report = scan(ctx.roots, ctx.policy, ctx.extractor);
    info!(
        files = report.records.len(),
        skipped = report.skipped.len(),
        degraded = report.degraded.len(),
        "Scan finished"
    );

    run.advance("insert-store");
    let inserted = ctx.store.insert_all(report.records.values())?;

    run.advance("index-build");
    let contents: BTreeMap<String, String> = report
        .records
        .into_iter()
        .map(|(path, record)| (path, record.content))
        .collect();
    ctx.index.rebuild(&contents)?;

    Ok(inserted)
}

/// Apply filesystem changes since the last run:
/// `compute-changes -> apply-deletes(n) -> build-docs(n) -> update-store -> index-build(n)`.
/// Returns the number of documents re-extracted.
pub fn run_smart_rescan(ctx: &JobContext<'_>, run: &JobRun) -> Result<usize> {
    let report = reconcile(ctx.store, ctx.roots, ctx.policy, ctx.extractor, |step| {
        run.advance(step)
    })?;

    if report.changes.is_empty() && index_matches_store(ctx)? {
        debug!("No changes, keeping current index");
        return Ok(0);
    }

    // The flat index cannot drop entries, so it is always rebuilt whole.
    let contents = ctx.store.all_contents()?;
    run.advance(format!("index-build({})", contents.len()));
    ctx.index.rebuild(&contents)?;

    Ok(report.changes.refresh_count())
}

/// True when the index holds exactly the store's paths. An earlier failed
/// rebuild or a half-written index leaves them apart even with no file changes.
fn index_matches_store(ctx: &JobContext<'_>) -> Result<bool> {
    let indexed = match ctx.index.indexed_paths() {
        Ok(Some(indexed)) => indexed,
        Ok(None) => return Ok(false),
        Err(e) => {
            warn!(error = %e, "Stored index unreadable, rebuilding");
            return Ok(false);
        }
    };
    let stored = ctx.store.all_fingerprints()?;
    Ok(indexed.len() == stored.len() && stored.keys().all(|path| indexed.contains(path)))
}
