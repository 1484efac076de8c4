//! Process-wide registry of connected clients.
//!
//! Keyed by connection id, each entry an owning handle back to the worker's
//! outbound half. Backed by a `DashMap` rather than a `Mutex<HashMap>` so
//! registration, lookup, and broadcast can run concurrently across worker
//! tasks without a single global lock serializing them.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::envelope::OutboundFrame;

pub type ConnId = u64;

#[derive(Clone)]
pub struct ClientHandle {
    pub player_id: i64,
    pub sender: mpsc::UnboundedSender<OutboundFrame>,
}

#[derive(Default)]
pub struct Broadcaster {
    clients: DashMap<ConnId, ClientHandle>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Broadcaster {
            clients: DashMap::new(),
        }
    }

    pub fn register(&self, conn_id: ConnId, handle: ClientHandle) {
        self.clients.insert(conn_id, handle);
    }

    pub fn unregister(&self, conn_id: ConnId) {
        self.clients.remove(&conn_id);
    }

    /// Update the player id associated with an already-registered connection,
    /// called once `auth.login`/`auth.register` succeeds on it.
    pub fn set_player(&self, conn_id: ConnId, player_id: i64) {
        if let Some(mut handle) = self.clients.get_mut(&conn_id) {
            handle.player_id = player_id;
        }
    }

    /// Send an `ok` envelope of the given type to every connection currently
    /// owned by `player_id`. Returns the number of connections delivered to.
    pub fn deliver_to_player(&self, player_id: i64, type_: &str, data: Value) -> usize {
        let mut delivered = 0;
        for entry in self.clients.iter() {
            let handle = entry.value();
            if handle.player_id == player_id {
                let frame = OutboundFrame::ok(type_, None, data.clone());
                if handle.sender.send(frame).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn connected_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_only_to_matching_player() {
        let bc = Broadcaster::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        bc.register(1, ClientHandle { player_id: 10, sender: tx1 });
        bc.register(2, ClientHandle { player_id: 20, sender: tx2 });

        let delivered = bc.deliver_to_player(10, "news.flash", serde_json::json!({"headline": "hi"}));
        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn unregister_stops_delivery() {
        let bc = Broadcaster::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        bc.register(1, ClientHandle { player_id: 10, sender: tx });
        bc.unregister(1);
        assert_eq!(bc.connected_count(), 0);
        assert_eq!(bc.deliver_to_player(10, "x", serde_json::json!({})), 0);
    }
}
