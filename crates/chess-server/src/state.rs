#![allow(unused)]

use std::sync::atomic::{AtomicU32, AtomicU64};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;

use chess_core::game::Game;
use chess_core::protocol::ServerEvent;

use crate::rating::RatingNotifier;

/// A registry entry: the game plus the bookkeeping the reclamation sweep
/// reads.
pub struct RoomEntry {
    pub game: Game,
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl RoomEntry {
    pub fn new(game: Game) -> Self {
        let now = Instant::now();
        RoomEntry {
            game,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// One connection's inbox within a room's broadcast group.
pub struct RoomSubscriber {
    pub conn_id: u64,
    pub tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Shared application state. Constructed once in `build_app` and passed to
/// every handler; there is no global singleton.
pub struct AppState {
    /// Session registry: room id -> live game. Entries are created lazily
    /// on first join and reclaimed by the background sweep only once no
    /// connection subscribes to them.
    pub games: DashMap<String, RoomEntry>,
    /// Broadcast groups: room id -> subscribed connections.
    pub subscribers: DashMap<String, Vec<RoomSubscriber>>,
    /// Identities with a live socket: identity -> conn id. Last writer
    /// wins, so a reconnect supersedes the stale socket.
    pub connections: DashMap<String, u64>,
    pub connection_count: AtomicU32,
    pub max_connections: u32,
    pub next_conn_id: AtomicU64,
    pub notifier: RatingNotifier,
}

impl AppState {
    pub fn new(notifier: RatingNotifier) -> Self {
        AppState {
            games: DashMap::new(),
            subscribers: DashMap::new(),
            connections: DashMap::new(),
            connection_count: AtomicU32::new(0),
            max_connections: 1000,
            next_conn_id: AtomicU64::new(1),
            notifier,
        }
    }

    /// Add a connection to a room's broadcast group, replacing any stale
    /// registration it still holds there.
    pub fn subscribe(&self, room_id: &str, conn_id: u64, tx: mpsc::UnboundedSender<ServerEvent>) {
        let mut subs = self.subscribers.entry(room_id.to_string()).or_default();
        subs.retain(|s| s.conn_id != conn_id);
        subs.push(RoomSubscriber { conn_id, tx });
    }

    pub fn unsubscribe(&self, room_id: &str, conn_id: u64) {
        if let Some(mut subs) = self.subscribers.get_mut(room_id) {
            subs.retain(|s| s.conn_id != conn_id);
        }
    }

    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.subscribers.get(room_id).map_or(0, |s| s.len())
    }

    /// Deliver an event to every connection in the room. Best-effort: a
    /// closed receiver is pruned and never blocks the rest of the group.
    pub fn publish(&self, room_id: &str, event: &ServerEvent) {
        self.publish_filtered(room_id, None, event);
    }

    /// Deliver to the room excluding one connection (the originator).
    pub fn publish_except(&self, room_id: &str, except: u64, event: &ServerEvent) {
        self.publish_filtered(room_id, Some(except), event);
    }

    fn publish_filtered(&self, room_id: &str, except: Option<u64>, event: &ServerEvent) {
        if let Some(mut subs) = self.subscribers.get_mut(room_id) {
            subs.retain(|s| {
                if except == Some(s.conn_id) {
                    return true;
                }
                s.tx.send(event.clone()).is_ok()
            });
        }
    }
}
