use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, mpsc};
use uuid::Uuid;

use parley_types::events::ServerEvent;

use crate::registry::{ConnId, Departure, PresenceRegistry};
use crate::rooms::{Room, RoomTable};

/// Manages all connected clients and routes events to rooms and connections.
///
/// Lock discipline: no method holds two of the inner locks at once.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// user <-> connection map
    registry: RwLock<PresenceRegistry>,

    /// room -> subscribed connections
    rooms: RwLock<RoomTable>,

    /// Per-connection outbound queues: conn_id -> sender
    senders: RwLock<HashMap<ConnId, mpsc::UnboundedSender<ServerEvent>>>,

    /// Serializes durable presence writes per user
    presence_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry: RwLock::new(PresenceRegistry::new()),
                rooms: RwLock::new(RoomTable::new()),
                senders: RwLock::new(HashMap::new()),
                presence_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a new connection for `user_id`. It belongs to no room yet, so
    /// only `send_to_connection` reaches it until the caller subscribes it.
    /// Returns (conn_id, receiver, first_connection).
    pub async fn register_connection(
        &self,
        user_id: Uuid,
    ) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>, bool) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner.senders.write().await.insert(conn_id, tx);
        let first = self.inner.registry.write().await.insert(user_id, conn_id);

        (conn_id, rx, first)
    }

    /// Forget a connection: its registry entry, its room subscriptions and its
    /// outbound queue. `None` if it was already gone.
    pub async fn unregister_connection(&self, conn_id: ConnId) -> Option<Departure> {
        let departure = self.inner.registry.write().await.remove(conn_id);
        self.inner.rooms.write().await.leave_all(conn_id);
        self.inner.senders.write().await.remove(&conn_id);
        departure
    }

    pub async fn join(&self, conn_id: ConnId, room: Room) -> bool {
        self.inner.rooms.write().await.join(conn_id, room)
    }

    /// Subscribe to several rooms under one lock acquisition. Returns how many
    /// were new.
    pub async fn join_all(&self, conn_id: ConnId, rooms: &[Room]) -> usize {
        let mut table = self.inner.rooms.write().await;
        rooms.iter().filter(|room| table.join(conn_id, **room)).count()
    }

    pub async fn leave(&self, conn_id: ConnId, room: Room) -> bool {
        self.inner.rooms.write().await.leave(conn_id, room)
    }

    pub async fn is_subscribed(&self, conn_id: ConnId, room: Room) -> bool {
        self.inner.rooms.read().await.is_member(conn_id, room)
    }

    pub async fn rooms_of(&self, conn_id: ConnId) -> Vec<Room> {
        self.inner.rooms.read().await.rooms_of(conn_id)
    }

    /// Queue an event for one connection. False if the connection is gone.
    pub async fn send_to_connection(&self, conn_id: ConnId, event: ServerEvent) -> bool {
        let senders = self.inner.senders.read().await;
        match senders.get(&conn_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Send to every connection of a user (their personal room).
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        self.emit_to_room(Room::User(user_id), event).await
    }

    /// Fan an event out to every subscriber of a room. Returns the number of
    /// connections it was queued for.
    pub async fn emit_to_room(&self, room: Room, event: ServerEvent) -> usize {
        let members = self.inner.rooms.read().await.members(room);
        self.deliver(&members, None, event).await
    }

    /// Like `emit_to_room`, skipping the originating connection.
    pub async fn emit_to_room_except(&self, room: Room, except: ConnId, event: ServerEvent) -> usize {
        let members = self.inner.rooms.read().await.members(room);
        self.deliver(&members, Some(except), event).await
    }

    async fn deliver(&self, conns: &[ConnId], except: Option<ConnId>, event: ServerEvent) -> usize {
        let senders = self.inner.senders.read().await;
        let mut delivered = 0;
        for conn_id in conns {
            if Some(*conn_id) == except {
                continue;
            }
            if let Some(tx) = senders.get(conn_id) {
                if tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Get list of online users.
    pub async fn online_user_ids(&self) -> Vec<Uuid> {
        self.inner.registry.read().await.online_users()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.registry.read().await.is_online(user_id)
    }

    pub async fn connections_of(&self, user_id: Uuid) -> Vec<ConnId> {
        self.inner.registry.read().await.connections_of(user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.read().await.connection_count()
    }

    /// Take the per-user presence lock. Held across the durable online-flag
    /// write so the flag always ends up matching the registry.
    pub async fn presence_lock(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.presence_locks.lock().await;
            locks.entry(user_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the user's presence lock entry once nobody holds or waits on it.
    pub async fn release_presence_lock(&self, user_id: Uuid) {
        let mut locks = self.inner.presence_locks.lock().await;
        if locks
            .get(&user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::drain;

    #[tokio::test]
    async fn fresh_connection_is_in_no_room() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (conn, mut rx, _) = dispatcher.register_connection(user).await;

        assert!(dispatcher.rooms_of(conn).await.is_empty());
        assert_eq!(dispatcher.send_to_user(user, ServerEvent::error("early")).await, 0);
        assert!(dispatcher.send_to_connection(conn, ServerEvent::error("direct")).await);
        assert_eq!(drain(&mut rx), vec![ServerEvent::error("direct")]);
    }

    #[tokio::test]
    async fn personal_room_reaches_every_connection_of_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (c1, mut rx1, first) = dispatcher.register_connection(user).await;
        let (c2, mut rx2, second) = dispatcher.register_connection(user).await;
        assert!(first);
        assert!(!second);
        dispatcher.join(c1, Room::User(user)).await;
        dispatcher.join(c2, Room::User(user)).await;

        let sent = dispatcher
            .send_to_user(user, ServerEvent::FriendRequestReceived { sender_id: Uuid::new_v4() })
            .await;

        assert_eq!(sent, 2);
        assert_eq!(drain(&mut rx1).len(), 1);
        assert_eq!(drain(&mut rx2).len(), 1);
    }

    #[tokio::test]
    async fn emit_except_skips_origin() {
        let dispatcher = Dispatcher::new();
        let room = Room::Chat(Uuid::new_v4());
        let (a, mut rx_a, _) = dispatcher.register_connection(Uuid::new_v4()).await;
        let (b, mut rx_b, _) = dispatcher.register_connection(Uuid::new_v4()).await;
        dispatcher.join(a, room).await;
        dispatcher.join(b, room).await;

        let sent = dispatcher.emit_to_room_except(room, a, ServerEvent::error("x")).await;

        assert_eq!(sent, 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::error("x")]);
    }

    #[tokio::test]
    async fn unregister_drops_subscriptions_and_queue() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let room = Room::Chat(Uuid::new_v4());
        let (conn, _rx, _) = dispatcher.register_connection(user).await;
        dispatcher.join(conn, room).await;

        let departure = dispatcher.unregister_connection(conn).await.unwrap();
        assert!(departure.last_connection);
        assert!(!dispatcher.is_online(user).await);
        assert!(dispatcher.rooms_of(conn).await.is_empty());
        assert_eq!(dispatcher.emit_to_room(room, ServerEvent::error("x")).await, 0);
        assert!(!dispatcher.send_to_connection(conn, ServerEvent::error("x")).await);
        assert!(dispatcher.unregister_connection(conn).await.is_none());
    }

    #[tokio::test]
    async fn presence_lock_entry_is_released() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let guard = dispatcher.presence_lock(user).await;
        dispatcher.release_presence_lock(user).await;
        assert_eq!(dispatcher.inner.presence_locks.lock().await.len(), 1);

        drop(guard);
        dispatcher.release_presence_lock(user).await;
        assert!(dispatcher.inner.presence_locks.lock().await.is_empty());
    }
}
