use std::collections::{HashMap, HashSet};
use std::fmt;

use uuid::Uuid;

use crate::registry::ConnId;

/// A broadcast group. Chat rooms mirror chat membership; every user also has
/// a personal room for direct notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Chat(Uuid),
    User(Uuid),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Chat(id) => write!(f, "chat:{}", id),
            Room::User(id) => write!(f, "user:{}", id),
        }
    }
}

/// Room -> subscribed connections, plus the reverse index used to drop every
/// subscription of a closing connection. Rooms exist while they have members.
#[derive(Debug, Default)]
pub struct RoomTable {
    members: HashMap<Room, HashSet<ConnId>>,
    by_conn: HashMap<ConnId, HashSet<Room>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe. Returns false if the connection was already in the room.
    pub fn join(&mut self, conn_id: ConnId, room: Room) -> bool {
        let added = self.members.entry(room).or_default().insert(conn_id);
        self.by_conn.entry(conn_id).or_default().insert(room);
        added
    }

    /// Unsubscribe. Returns false if the connection was not in the room.
    pub fn leave(&mut self, conn_id: ConnId, room: Room) -> bool {
        let removed = match self.members.get_mut(&room) {
            Some(conns) => {
                let removed = conns.remove(&conn_id);
                if conns.is_empty() {
                    self.members.remove(&room);
                }
                removed
            }
            None => false,
        };

        if let Some(rooms) = self.by_conn.get_mut(&conn_id) {
            rooms.remove(&room);
            if rooms.is_empty() {
                self.by_conn.remove(&conn_id);
            }
        }
        removed
    }

    /// Drop every subscription of a connection. Returns how many it had.
    pub fn leave_all(&mut self, conn_id: ConnId) -> usize {
        let Some(rooms) = self.by_conn.remove(&conn_id) else {
            return 0;
        };

        for room in &rooms {
            if let Some(conns) = self.members.get_mut(room) {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    self.members.remove(room);
                }
            }
        }
        rooms.len()
    }

    pub fn members(&self, room: Room) -> Vec<ConnId> {
        self.members
            .get(&room)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, conn_id: ConnId, room: Room) -> bool {
        self.members
            .get(&room)
            .is_some_and(|conns| conns.contains(&conn_id))
    }

    pub fn rooms_of(&self, conn_id: ConnId) -> Vec<Room> {
        self.by_conn
            .get(&conn_id)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let mut rooms = RoomTable::new();
        let conn = Uuid::new_v4();
        let room = Room::Chat(Uuid::new_v4());

        assert!(rooms.join(conn, room));
        assert!(!rooms.join(conn, room));
        assert_eq!(rooms.members(room), vec![conn]);
    }

    #[test]
    fn leave_all_drains_rooms() {
        let mut rooms = RoomTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let chat = Room::Chat(Uuid::new_v4());
        let personal = Room::User(Uuid::new_v4());

        rooms.join(a, chat);
        rooms.join(a, personal);
        rooms.join(b, chat);

        assert_eq!(rooms.leave_all(a), 2);
        assert_eq!(rooms.members(chat), vec![b]);
        assert!(rooms.members(personal).is_empty());
        assert_eq!(rooms.room_count(), 1);
        assert!(rooms.rooms_of(a).is_empty());
        assert_eq!(rooms.leave_all(a), 0);
    }

    #[test]
    fn leave_reports_membership() {
        let mut rooms = RoomTable::new();
        let conn = Uuid::new_v4();
        let room = Room::Chat(Uuid::new_v4());

        assert!(!rooms.leave(conn, room));
        rooms.join(conn, room);
        assert!(rooms.is_member(conn, room));
        assert!(rooms.leave(conn, room));
        assert!(!rooms.is_member(conn, room));
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn chat_and_personal_rooms_never_collide() {
        let id = Uuid::new_v4();
        assert_ne!(Room::Chat(id), Room::User(id));
        assert_eq!(Room::Chat(id).to_string(), format!("chat:{}", id));
    }
}
