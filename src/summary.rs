use crate::types::{EventKind, StreamStatus, StreamView};
use serde::Serialize;

/// Delivery outcome counts over the buffered history, as charted on the
/// dashboard. Only a live (`Open`) stream is summarised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivitySummary {
    pub success: usize,
    /// `delivery_failed` and `delivery_error` together.
    pub failed: usize,
    pub attempts: usize,
    pub info: usize,
    pub other: usize,
}

impl ActivitySummary {
    pub fn from_view(view: &StreamView) -> Self {
        let mut summary = Self::default();
        if view.status != StreamStatus::Open {
            return summary;
        }
        for entry in view.history.iter() {
            match entry.event.kind() {
                EventKind::DeliverySuccess => summary.success += 1,
                EventKind::DeliveryFailed | EventKind::DeliveryError => summary.failed += 1,
                EventKind::DeliveryAttempt => summary.attempts += 1,
                EventKind::Info => summary.info += 1,
                EventKind::Unknown => summary.other += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.success + self.failed + self.attempts + self.info + self.other
    }
}
