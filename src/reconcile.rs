//! Debounced merge of relay count reports.
//!
//! Increases are committed as soon as they are reported. Decreases, including a type disappearing from the
//! report, are staged as a [`PendingChange`] and only committed once they have stood for the grace period.

use tracing::{debug, info, warn};

use crate::{
    Duration, Instant, elapsed,
    error::{LinkError, LinkResult},
    frame::MAX_PAYLOAD,
    plant::is_valid_type_id,
};

/// Most distinct remote types tracked at once.
pub const MAX_REMOTE_TYPES: usize = 32;
/// Most pairs a single relay payload can carry.
pub const MAX_REPORT_PAIRS: usize = MAX_PAYLOAD / 2;

/// Last known count of connected units of one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteSlaveReport {
    pub type_id: u8,
    pub count: u8,
}

/// A decrease waiting out the grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChange {
    pub type_id: u8,
    pub target_count: u8,
    pub first_observed_at: Instant,
    pub original_count: u8,
}

pub type Report = heapless::Vec<RemoteSlaveReport, MAX_REPORT_PAIRS>;

/// Split a relay payload into `[type_id, count]` pairs.
///
/// Pairs with an invalid type id are skipped. When a type appears twice the last pair wins.
pub fn parse_report<I: embedded_io::Error>(payload: &[u8]) -> LinkResult<Report, I> {
    if payload.len() % 2 != 0 {
        return Err(LinkError::MalformedReport(payload.len()));
    }
    let mut report = Report::new();
    for pair in payload.chunks_exact(2) {
        let (type_id, count) = (pair[0], pair[1]);
        if !is_valid_type_id(type_id) {
            continue;
        }
        if let Some(existing) = report.iter_mut().find(|r| r.type_id == type_id) {
            existing.count = count;
        } else {
            // At most MAX_PAYLOAD / 2 pairs fit in a frame.
            let _ = report.push(RemoteSlaveReport { type_id, count });
        }
    }
    Ok(report)
}

/// Committed remote counts plus the decreases still being debounced.
#[derive(Debug)]
pub struct Reconciler {
    committed: heapless::Vec<RemoteSlaveReport, MAX_REMOTE_TYPES>,
    pending: heapless::Vec<PendingChange, MAX_REMOTE_TYPES>,
    grace: Duration,
}

impl Reconciler {
    pub fn new(grace: Duration) -> Self {
        Self {
            committed: heapless::Vec::new(),
            pending: heapless::Vec::new(),
            grace,
        }
    }

    pub fn committed(&self) -> &[RemoteSlaveReport] {
        &self.committed
    }

    pub fn pending(&self) -> &[PendingChange] {
        &self.pending
    }

    /// Committed count for `type_id`, `0` when the type has never been reported.
    pub fn committed_count(&self, type_id: u8) -> u8 {
        self.committed
            .iter()
            .find(|r| r.type_id == type_id)
            .map(|r| r.count)
            .unwrap_or(0)
    }

    /// Merge one relay report taken at `now`, then commit any decreases that are due.
    pub fn ingest(&mut self, report: &[RemoteSlaveReport], now: Instant) {
        for incoming in report.iter().filter(|r| is_valid_type_id(r.type_id)) {
            let Some(current) = self
                .committed
                .iter_mut()
                .find(|r| r.type_id == incoming.type_id)
            else {
                if self.committed.push(*incoming).is_err() {
                    warn!(type_id = incoming.type_id, "remote type table full, report dropped");
                    continue;
                }
                self.cancel_pending(incoming.type_id);
                info!(
                    type_id = incoming.type_id,
                    count = incoming.count,
                    "new remote type"
                );
                continue;
            };

            let previous = current.count;
            if incoming.count > previous {
                current.count = incoming.count;
                self.cancel_pending(incoming.type_id);
                info!(
                    type_id = incoming.type_id,
                    from = previous,
                    to = incoming.count,
                    "remote count increased"
                );
            } else if incoming.count < previous {
                self.stage_decrease(incoming.type_id, incoming.count, previous, now);
            } else if self.cancel_pending(incoming.type_id) {
                // Back at the committed count before the grace period ran out.
                debug!(type_id = incoming.type_id, "pending decrease withdrawn");
            }
        }

        // Committed types missing from the report are treated as disconnecting.
        let mut missing: heapless::Vec<(u8, u8), MAX_REMOTE_TYPES> = heapless::Vec::new();
        for existing in self.committed.iter() {
            if existing.count > 0 && !report.iter().any(|r| r.type_id == existing.type_id) {
                let _ = missing.push((existing.type_id, existing.count));
            }
        }
        for (type_id, count) in missing {
            let already_zero = self
                .pending
                .iter()
                .any(|p| p.type_id == type_id && p.target_count == 0);
            if !already_zero {
                self.stage_decrease(type_id, 0, count, now);
            }
        }

        self.apply_due(now);
        self.committed.retain(|r| is_valid_type_id(r.type_id));
    }

    /// Commit every pending decrease that has stood for at least the grace period.
    ///
    /// Returns how many were committed.
    pub fn apply_due(&mut self, now: Instant) -> usize {
        let grace = self.grace;
        let mut applied = 0;
        let committed = &mut self.committed;
        self.pending.retain(|pending| {
            if elapsed(now, pending.first_observed_at) < grace {
                return true;
            }
            if let Some(entry) = committed.iter_mut().find(|r| r.type_id == pending.type_id) {
                info!(
                    type_id = pending.type_id,
                    from = entry.count,
                    to = pending.target_count,
                    "remote count decrease committed"
                );
                entry.count = pending.target_count;
                applied += 1;
            }
            false
        });
        applied
    }

    fn stage_decrease(&mut self, type_id: u8, target_count: u8, original_count: u8, now: Instant) {
        if let Some(pending) = self.pending.iter_mut().find(|p| p.type_id == type_id) {
            if pending.target_count != target_count {
                debug!(
                    type_id,
                    from = pending.target_count,
                    to = target_count,
                    "pending decrease retargeted, timer reset"
                );
                pending.target_count = target_count;
                pending.first_observed_at = now;
                pending.original_count = original_count;
            }
            return;
        }
        let change = PendingChange {
            type_id,
            target_count,
            first_observed_at: now,
            original_count,
        };
        if self.pending.push(change).is_ok() {
            debug!(type_id, from = original_count, to = target_count, "decrease staged");
        }
    }

    fn cancel_pending(&mut self, type_id: u8) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.type_id != type_id);
        self.pending.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_serial::MockSerialError;

    const GRACE: u64 = 500;

    fn at(ms: u64) -> Instant {
        Instant::from_ticks(ms)
    }

    fn report(pairs: &[(u8, u8)]) -> Vec<RemoteSlaveReport> {
        pairs
            .iter()
            .map(|&(type_id, count)| RemoteSlaveReport { type_id, count })
            .collect()
    }

    fn reconciler_with(type_id: u8, count: u8) -> Reconciler {
        let mut reconciler = Reconciler::new(Duration::millis(GRACE));
        reconciler.ingest(&report(&[(type_id, count)]), at(0));
        reconciler
    }

    #[test]
    fn parse_rejects_odd_length() {
        assert!(matches!(
            parse_report::<MockSerialError>(&[0x07, 0x03, 0x04]),
            Err(LinkError::MalformedReport(3))
        ));
    }

    #[test]
    fn parse_skips_invalid_types_and_keeps_last_pair() {
        let parsed = parse_report::<MockSerialError>(&[0x00, 0x05, 0x07, 0x01, 0xFF, 0x33, 0x07, 0x04])
            .unwrap();
        assert_eq!(
            parsed.as_slice(),
            &[RemoteSlaveReport {
                type_id: 0x07,
                count: 4
            }]
        );
    }

    #[test]
    fn new_type_commits_immediately() {
        let reconciler = reconciler_with(7, 3);
        assert_eq!(reconciler.committed_count(7), 3);
        assert!(reconciler.pending().is_empty());
    }

    #[test]
    fn decrease_waits_for_grace_period() {
        let mut reconciler = reconciler_with(7, 3);

        reconciler.ingest(&report(&[(7, 1)]), at(100));
        assert_eq!(reconciler.committed_count(7), 3);
        assert_eq!(reconciler.pending().len(), 1);

        reconciler.apply_due(at(100 + GRACE - 1));
        assert_eq!(reconciler.committed_count(7), 3);

        assert_eq!(reconciler.apply_due(at(100 + GRACE)), 1);
        assert_eq!(reconciler.committed_count(7), 1);
        assert!(reconciler.pending().is_empty());
    }

    #[test]
    fn report_back_at_committed_count_cancels_decrease() {
        let mut reconciler = reconciler_with(7, 3);
        reconciler.ingest(&report(&[(7, 1)]), at(100));
        reconciler.ingest(&report(&[(7, 3)]), at(300));
        assert!(reconciler.pending().is_empty());

        reconciler.ingest(&report(&[(7, 3)]), at(100 + GRACE * 4));
        assert_eq!(reconciler.committed_count(7), 3);
    }

    #[test]
    fn increase_cancels_decrease_and_applies() {
        let mut reconciler = reconciler_with(7, 3);
        reconciler.ingest(&report(&[(7, 1)]), at(100));
        reconciler.ingest(&report(&[(7, 5)]), at(200));
        assert_eq!(reconciler.committed_count(7), 5);
        assert!(reconciler.pending().is_empty());
        reconciler.apply_due(at(10_000));
        assert_eq!(reconciler.committed_count(7), 5);
    }

    #[test]
    fn same_target_keeps_timer() {
        let mut reconciler = reconciler_with(7, 3);
        reconciler.ingest(&report(&[(7, 1)]), at(100));
        reconciler.ingest(&report(&[(7, 1)]), at(400));
        assert_eq!(reconciler.pending()[0].first_observed_at, at(100));
        reconciler.ingest(&report(&[(7, 1)]), at(600));
        assert_eq!(reconciler.committed_count(7), 1);
    }

    #[test]
    fn different_target_restarts_timer() {
        let mut reconciler = reconciler_with(7, 3);
        reconciler.ingest(&report(&[(7, 1)]), at(100));
        reconciler.ingest(&report(&[(7, 2)]), at(400));
        let pending = reconciler.pending()[0];
        assert_eq!(pending.target_count, 2);
        assert_eq!(pending.first_observed_at, at(400));

        reconciler.apply_due(at(700));
        assert_eq!(reconciler.committed_count(7), 3);
        reconciler.apply_due(at(900));
        assert_eq!(reconciler.committed_count(7), 2);
    }

    #[test]
    fn missing_type_is_disconnected_after_grace() {
        let mut reconciler = Reconciler::new(Duration::millis(GRACE));
        reconciler.ingest(&report(&[(7, 2), (4, 1)]), at(0));

        reconciler.ingest(&report(&[(4, 1)]), at(100));
        assert_eq!(reconciler.committed_count(7), 2);
        assert_eq!(reconciler.pending()[0].target_count, 0);

        // Still missing: the zero-target entry keeps its original timer.
        reconciler.ingest(&report(&[(4, 1)]), at(400));
        assert_eq!(reconciler.pending()[0].first_observed_at, at(100));

        reconciler.ingest(&report(&[(4, 1)]), at(600));
        assert_eq!(reconciler.committed_count(7), 0);
        assert_eq!(reconciler.committed_count(4), 1);
    }

    #[test]
    fn missing_type_replaces_nonzero_pending_target() {
        let mut reconciler = reconciler_with(7, 3);
        reconciler.ingest(&report(&[(7, 1)]), at(100));
        reconciler.ingest(&report(&[]), at(200));
        assert_eq!(reconciler.pending().len(), 1);
        assert_eq!(reconciler.pending()[0].target_count, 0);
        assert_eq!(reconciler.pending()[0].first_observed_at, at(200));
    }

    #[test]
    fn reappearing_type_cancels_disconnect() {
        let mut reconciler = reconciler_with(7, 3);
        reconciler.ingest(&report(&[]), at(100));
        reconciler.ingest(&report(&[(7, 3)]), at(200));
        assert!(reconciler.pending().is_empty());
        reconciler.ingest(&report(&[(7, 3)]), at(2_000));
        assert_eq!(reconciler.committed_count(7), 3);
    }

    #[test]
    fn invalid_types_never_committed() {
        let mut reconciler = Reconciler::new(Duration::millis(GRACE));
        reconciler.ingest(&report(&[(0, 4), (0xFF, 1), (2, 1)]), at(0));
        assert_eq!(reconciler.committed().len(), 1);
        assert_eq!(reconciler.committed_count(2), 1);
    }
}
