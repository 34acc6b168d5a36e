//! Connection registry and heartbeat for observer sockets.
//!
//! The registry knows nothing about call semantics: it tracks each socket's
//! role and liveness, pings on a fixed interval, and forcefully terminates
//! (task abort, not a graceful close) anything that stops answering — or
//! anything whose application-level consumer stops sending its own
//! keepalives even though the transport still responds.

use crate::ws::protocol::ping_frame;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use switchboard_core::session::LegKind;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

struct Entry {
    role: LegKind,
    /// Cleared on each sweep, re-set by a pong (or any client keepalive).
    alive: bool,
    /// Last client-initiated keepalive, tracked separately from transport
    /// liveness to catch a consumer that stalled behind a healthy socket.
    last_client_keepalive: Instant,
    outbound: mpsc::UnboundedSender<String>,
    abort: AbortHandle,
}

/// Tracks live observer sockets and owns their heartbeat.
pub struct Registry {
    entries: Mutex<HashMap<Uuid, Entry>>,
    ping_interval: Duration,
    client_timeout: Duration,
}

impl Registry {
    pub fn new(ping_interval: Duration, client_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ping_interval,
            client_timeout,
        }
    }

    /// Tracks a socket, displacing any previous one of the same role. The
    /// displaced connection is terminated and its identity returned so the
    /// caller can log the replacement.
    pub async fn attach(
        &self,
        id: Uuid,
        role: LegKind,
        outbound: mpsc::UnboundedSender<String>,
        abort: AbortHandle,
    ) -> Option<Uuid> {
        let mut entries = self.entries.lock().await;
        let displaced = entries
            .iter()
            .find(|(_, entry)| entry.role == role)
            .map(|(id, _)| *id);
        if let Some(prev) = displaced {
            if let Some(entry) = entries.remove(&prev) {
                info!(%prev, %role, reason = "replaced", "Terminating displaced connection.");
                entry.abort.abort();
            }
        }
        entries.insert(
            id,
            Entry {
                role,
                alive: true,
                last_client_keepalive: Instant::now(),
                outbound,
                abort,
            },
        );
        displaced
    }

    /// Stops tracking a socket that closed on its own.
    pub async fn deregister(&self, id: Uuid) {
        self.entries.lock().await.remove(&id);
    }

    /// Records a pong (or transport-level sign of life).
    pub async fn mark_alive(&self, id: Uuid) {
        if let Some(entry) = self.entries.lock().await.get_mut(&id) {
            entry.alive = true;
        }
    }

    /// Records a client-initiated keepalive; also proves liveness.
    pub async fn note_client_keepalive(&self, id: Uuid) {
        if let Some(entry) = self.entries.lock().await.get_mut(&id) {
            entry.alive = true;
            entry.last_client_keepalive = Instant::now();
        }
    }

    pub async fn count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// One heartbeat pass: terminate anything that missed the previous ping
    /// or whose client keepalives went quiet, then arm the next ping.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|id, entry| {
            if !entry.alive {
                warn!(%id, role = %entry.role, "Socket missed liveness ping; terminating.");
                entry.abort.abort();
                return false;
            }
            if now.duration_since(entry.last_client_keepalive) > self.client_timeout {
                warn!(%id, role = %entry.role, "No client keepalive within timeout; terminating.");
                entry.abort.abort();
                return false;
            }
            entry.alive = false;
            let _ = entry.outbound.send(ping_frame());
            true
        });
    }

    /// Terminates and drops every tracked socket at once.
    pub async fn terminate_all(&self, reason: &str) {
        let mut entries = self.entries.lock().await;
        for (id, entry) in entries.drain() {
            info!(%id, role = %entry.role, reason, "Terminating connection.");
            entry.abort.abort();
        }
    }

    /// Runs `sweep` forever on the configured interval.
    pub fn spawn_sweeper(self: std::sync::Arc<Self>) -> JoinHandle<()> {
        let registry = self;
        tokio::spawn(async move {
            let mut ticker = time::interval(registry.ping_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh socket
            // is not swept before it had a chance to speak.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(Duration::from_secs(30), Duration::from_secs(60))
    }

    fn socket() -> (
        Uuid,
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
        JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(std::future::pending::<()>());
        (Uuid::new_v4(), tx, rx, handle)
    }

    #[tokio::test]
    async fn unresponsive_socket_is_gone_within_two_sweeps() {
        let registry = registry();
        let (id, tx, mut rx, handle) = socket();
        registry
            .attach(id, LegKind::Control, tx, handle.abort_handle())
            .await;

        // First sweep arms the ping and keeps the socket.
        registry.sweep().await;
        assert_eq!(registry.count().await, 1);
        assert_eq!(rx.recv().await.as_deref(), Some(r#"{"type":"ping"}"#));

        // No pong arrives; the second sweep terminates it.
        registry.sweep().await;
        assert_eq!(registry.count().await, 0);
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn pong_keeps_a_socket_tracked_across_sweeps() {
        let registry = registry();
        let (id, tx, _rx, handle) = socket();
        registry
            .attach(id, LegKind::Control, tx, handle.abort_handle())
            .await;

        for _ in 0..3 {
            registry.sweep().await;
            registry.mark_alive(id).await;
        }
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn stalled_client_is_terminated_despite_pongs() {
        let registry = Registry::new(Duration::from_secs(30), Duration::from_millis(5));
        let (id, tx, _rx, handle) = socket();
        registry
            .attach(id, LegKind::Control, tx, handle.abort_handle())
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.mark_alive(id).await;
        registry.sweep().await;

        assert_eq!(registry.count().await, 0);
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn fresh_keepalive_resets_the_inactivity_clock() {
        let registry = Registry::new(Duration::from_secs(30), Duration::from_millis(50));
        let (id, tx, _rx, handle) = socket();
        registry
            .attach(id, LegKind::Control, tx, handle.abort_handle())
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.note_client_keepalive(id).await;
        registry.sweep().await;
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn same_role_attach_displaces_the_previous_socket() {
        let registry = registry();
        let (first_id, tx1, _rx1, first) = socket();
        registry
            .attach(first_id, LegKind::Control, tx1, first.abort_handle())
            .await;

        let (second_id, tx2, _rx2, second) = socket();
        let displaced = registry
            .attach(second_id, LegKind::Control, tx2, second.abort_handle())
            .await;

        assert_eq!(displaced, Some(first_id));
        assert_eq!(registry.count().await, 1);
        assert!(first.await.unwrap_err().is_cancelled());
    }
}
