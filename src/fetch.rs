//! Fetch coordinator: runs every adapter concurrently under the run deadline.
//!
//! Adapters are isolated from one another. A failing or slow source only
//! affects its own entry in the returned statistics; whatever the others
//! produced is kept. Adapters still running when the deadline passes are
//! dropped (cancelled) and reported as [`AdapterError::DeadlineExceeded`].

use crate::error::AdapterError;
use crate::models::{RawItem, SourceStats};
use crate::sources::{AdapterOutput, FetchContext, SourceAdapter};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tokio::time::{Instant as Deadline, timeout_at};
use tracing::{debug, info, instrument, warn};

/// Best-effort union of every adapter's output.
#[derive(Debug, Default)]
pub struct FetchResult {
    /// Items in adapter registration order, then source order.
    pub items: Vec<RawItem>,
    pub errors: BTreeMap<String, AdapterError>,
    pub stats: BTreeMap<String, SourceStats>,
}

impl FetchResult {
    pub fn total_items(&self) -> usize {
        self.items.len()
    }
}

/// Run all `adapters` with at most `concurrency` in flight, stopping at `deadline`.
#[instrument(level = "info", skip_all, fields(adapters = adapters.len(), concurrency = concurrency))]
pub async fn fetch_all(
    adapters: &[Box<dyn SourceAdapter>],
    ctx: &FetchContext,
    deadline: Deadline,
    concurrency: usize,
) -> FetchResult {
    let mut outcomes: Vec<(usize, &'static str, AdapterOutput)> =
        stream::iter(adapters.iter().enumerate())
            .map(|(i, adapter)| async move {
                let source_id = adapter.source_id();
                let t0 = Instant::now();
                let output = match timeout_at(deadline, adapter.fetch(ctx)).await {
                    Ok(output) => output,
                    Err(_) => AdapterOutput::failed(AdapterError::DeadlineExceeded {
                        source_id: source_id.to_string(),
                    }),
                };
                let elapsed_ms = t0.elapsed().as_millis() as u64;
                match &output.error {
                    None => debug!(
                        source = source_id,
                        count = output.items.len(),
                        elapsed_ms,
                        "Source finished"
                    ),
                    Some(e) => warn!(
                        source = source_id,
                        count = output.items.len(),
                        elapsed_ms,
                        error = %e,
                        "Source failed"
                    ),
                }
                (i, source_id, output)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

    // Completion order is arbitrary; aggregate in registration order.
    outcomes.sort_by_key(|(i, _, _)| *i);

    let mut result = FetchResult::default();
    let mut seen = HashSet::new();
    for (_, source_id, output) in outcomes {
        let mut kept = 0usize;
        for item in output.items {
            if seen.insert(item.key()) {
                result.items.push(item);
                kept += 1;
            } else {
                debug!(source = source_id, url = %item.url, "Dropping repeated listing");
            }
        }
        let stats = result.stats.entry(source_id.to_string()).or_default();
        stats.fetched_count += kept;
        if let Some(e) = output.error {
            stats.error = Some(e.to_string());
            result.errors.insert(source_id.to_string(), e);
        }
    }

    info!(
        total = result.items.len(),
        failed = result.errors.len(),
        "Fetch stage finished"
    );
    result
}
