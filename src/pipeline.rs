//! Transfer orchestrator — drains one channel into another.
//!
//! Core invariant: a message is never acknowledged on the source without
//! a prior successful delivery to the destination. Failed items stay
//! pending and are picked up by the next run.

use tracing::{debug, error, info};

use crate::channels::Channel;
use crate::error::ChannelError;

/// Outcome counts for one orchestration run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Ids the source enumerated.
    pub total: usize,
    /// Messages delivered and acknowledged (or delivered with a logged
    /// acknowledge failure — delivery still counts).
    pub delivered: usize,
    /// Messages left pending after a fetch or delivery failure.
    pub failed: usize,
}

/// Relay every pending message from `source` into `destination`.
///
/// The id sequence is snapshotted once up front; messages are then
/// fetched, delivered, and acknowledged strictly in that order, one at a
/// time. Per-message failures are logged and skipped; only an
/// enumeration failure (nothing touched yet) aborts the run.
pub fn pipe_channels(
    source: &mut dyn Channel,
    destination: &mut dyn Channel,
) -> Result<RunSummary, ChannelError> {
    info!(
        from = source.name(),
        to = destination.name(),
        "Message transfer started"
    );

    let ids = source.enumerate_pending()?;
    let mut summary = RunSummary {
        total: ids.len(),
        ..RunSummary::default()
    };

    for id in &ids {
        info!(%id, "Processing message");

        let message = match source.fetch(id) {
            Ok(message) => {
                debug!(%id, "Fetched");
                message
            }
            Err(e) => {
                error!(%id, error = %e, "Failed to fetch message, leaving it pending");
                summary.failed += 1;
                continue;
            }
        };

        if let Err(e) = destination.deliver(&message) {
            error!(%id, error = %e, "Failed to deliver message, leaving it pending");
            summary.failed += 1;
            continue;
        }
        debug!(%id, "Delivered");
        summary.delivered += 1;

        if let Err(e) = source.acknowledge(id) {
            // Delivered but not consumed: the next run will deliver it
            // again. Accepted artifact of at-least-once semantics.
            error!(%id, error = %e, "Failed to acknowledge delivered message");
        }
    }

    source.release();
    info!(
        from = source.name(),
        to = destination.name(),
        total = summary.total,
        delivered = summary.delivered,
        failed = summary.failed,
        "Message transfer finished"
    );
    Ok(summary)
}
