use serde::Serialize;

/// Running totals for one orchestrator. Values only grow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DownloadCounters {
    pub started: u64,
    pub completed: u64,
    pub canceled: u64,
    pub errors: u64,
    pub resumed: u64,
    pub bytes_total: u64,
}

impl DownloadCounters {
    pub(crate) fn record_started(&mut self) {
        self.started = self.started.saturating_add(1);
    }

    pub(crate) fn record_resumed(&mut self) {
        self.resumed = self.resumed.saturating_add(1);
    }

    pub(crate) fn record_completed(&mut self, bytes: u64) {
        self.completed = self.completed.saturating_add(1);
        self.bytes_total = self.bytes_total.saturating_add(bytes);
    }

    pub(crate) fn record_error(&mut self) {
        self.errors = self.errors.saturating_add(1);
    }

    pub(crate) fn record_canceled(&mut self) {
        self.canceled = self.canceled.saturating_add(1);
    }
}
