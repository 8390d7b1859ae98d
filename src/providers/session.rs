// Provider Session State - shared liveness and symbol-generation guard
// Snapshot-and-compare is what keeps stale responses from mutating state

use crate::core::types::{ConnectionStatus, StatusUpdate};
use crate::providers::StatusCallback;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Exponential reconnect delay: `base * 2^attempt`, capped.
pub fn reconnect_delay(attempt: u32, base_secs: u64, cap_secs: u64) -> Duration {
    let factor = 2u64.saturating_pow(attempt.min(32));
    Duration::from_secs(base_secs.saturating_mul(factor).min(cap_secs))
}

/// State shared between a provider handle and its background tasks.
///
/// Every polling-style task snapshots `(symbol, generation)` before issuing
/// a request and checks `is_current` before delivering the response; both
/// `change_symbol` and `shutdown` bump the generation, so a response that
/// raced either call is discarded instead of emitted.
pub struct ProviderSession {
    symbol: RwLock<String>,
    generation: AtomicU64,
    live: AtomicBool,
    status: RwLock<ConnectionStatus>,
    on_status: StatusCallback,
}

impl ProviderSession {
    pub fn new(symbol: &str, on_status: StatusCallback) -> Arc<Self> {
        Arc::new(Self {
            symbol: RwLock::new(symbol.to_uppercase()),
            generation: AtomicU64::new(0),
            live: AtomicBool::new(false),
            status: RwLock::new(ConnectionStatus::Disconnected),
            on_status,
        })
    }

    pub fn symbol(&self) -> String {
        self.symbol.read().clone()
    }

    /// Capture the active symbol and generation before a network call.
    pub fn snapshot(&self) -> (String, u64) {
        // Lock before loading so a concurrent change_symbol can't interleave
        let symbol = self.symbol.read();
        (symbol.clone(), self.generation.load(Ordering::SeqCst))
    }

    /// True while the session is live and no symbol change or shutdown has
    /// happened since the snapshot was taken.
    pub fn is_current(&self, generation: u64) -> bool {
        self.live.load(Ordering::SeqCst)
            && self.generation.load(Ordering::SeqCst) == generation
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Mark the session live again ahead of a (re)connect.
    pub fn activate(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    /// Swap the active symbol and invalidate all outstanding snapshots.
    pub fn change_symbol(&self, symbol: &str) {
        let mut current = self.symbol.write();
        *current = symbol.to_uppercase();
        self.generation.fetch_add(1, Ordering::SeqCst);
        debug!(symbol = %*current, "Session symbol changed");
    }

    /// Stop the session: background loops observe `live == false` and every
    /// outstanding snapshot stops matching.
    pub fn shutdown(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
        (self.on_status)(StatusUpdate::new(status));
    }

    pub fn set_status_message(&self, status: ConnectionStatus, message: impl Into<String>) {
        *self.status.write() = status;
        (self.on_status)(StatusUpdate::with_message(status, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Arc<ProviderSession> {
        ProviderSession::new("AAPL", Arc::new(|_| {}))
    }

    #[test]
    fn test_snapshot_survives_no_change() {
        let session = session();
        session.activate();
        let (symbol, generation) = session.snapshot();
        assert_eq!(symbol, "AAPL");
        assert!(session.is_current(generation));
    }

    #[test]
    fn test_change_symbol_invalidates_snapshot() {
        let session = session();
        session.activate();
        let (_, generation) = session.snapshot();
        session.change_symbol("MSFT");
        assert!(!session.is_current(generation));
        assert_eq!(session.symbol(), "MSFT");
        // A fresh snapshot is current again
        let (_, generation) = session.snapshot();
        assert!(session.is_current(generation));
    }

    #[test]
    fn test_shutdown_invalidates_everything() {
        let session = session();
        session.activate();
        let (_, generation) = session.snapshot();
        session.shutdown();
        assert!(!session.is_current(generation));
        assert!(!session.is_live());
        let (_, fresh) = session.snapshot();
        assert!(!session.is_current(fresh), "nothing is current after shutdown");
    }

    #[test]
    fn test_status_callback_fires_with_message() {
        let seen: Arc<parking_lot::Mutex<Vec<StatusUpdate>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let session = ProviderSession::new(
            "AAPL",
            Arc::new(move |update| seen_clone.lock().push(update)),
        );

        session.set_status(ConnectionStatus::Connecting);
        session.set_status_message(ConnectionStatus::Error, "rate limited, retrying in 60s");

        let updates = seen.lock();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].status, ConnectionStatus::Connecting);
        assert_eq!(updates[1].status, ConnectionStatus::Error);
        assert!(updates[1].message.as_deref().unwrap().contains("rate limited"));
    }

    #[test]
    fn test_reconnect_delay_doubles_and_caps() {
        let delays: Vec<u64> = (0..8)
            .map(|attempt| reconnect_delay(attempt, 1, 30).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "delay sequence must be non-decreasing");
        }
    }
}
