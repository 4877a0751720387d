use std::collections::{HashMap, HashSet};

use uuid::Uuid;

/// Identity of one live WebSocket connection.
pub type ConnId = Uuid;

/// What `PresenceRegistry::remove` reports about the departing connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub user_id: Uuid,
    /// True when this was the user's last connection, i.e. the user is now offline.
    pub last_connection: bool,
}

/// Bidirectional user <-> connection map.
///
/// A user may hold any number of connections (tabs, devices); they count as
/// online while at least one remains. Both maps are updated together so they
/// never disagree.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    by_user: HashMap<Uuid, HashSet<ConnId>>,
    by_conn: HashMap<ConnId, Uuid>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection. Returns true if it is the user's first one.
    pub fn insert(&mut self, user_id: Uuid, conn_id: ConnId) -> bool {
        if let Some(previous) = self.by_conn.get(&conn_id).copied() {
            if previous == user_id {
                return false;
            }
            self.remove(conn_id);
        }

        self.by_conn.insert(conn_id, user_id);
        let conns = self.by_user.entry(user_id).or_default();
        conns.insert(conn_id);
        conns.len() == 1
    }

    /// Drop a connection. `None` if it was never registered.
    pub fn remove(&mut self, conn_id: ConnId) -> Option<Departure> {
        let user_id = self.by_conn.remove(&conn_id)?;

        let last_connection = match self.by_user.get_mut(&user_id) {
            Some(conns) => {
                conns.remove(&conn_id);
                conns.is_empty()
            }
            None => true,
        };
        if last_connection {
            self.by_user.remove(&user_id);
        }

        Some(Departure {
            user_id,
            last_connection,
        })
    }

    pub fn user_of(&self, conn_id: ConnId) -> Option<Uuid> {
        self.by_conn.get(&conn_id).copied()
    }

    pub fn connections_of(&self, user_id: Uuid) -> Vec<ConnId> {
        self.by_user
            .get(&user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.by_user.contains_key(&user_id)
    }

    pub fn online_users(&self) -> Vec<Uuid> {
        self.by_user.keys().copied().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.by_conn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_then_disconnect_leaves_no_trace() {
        let mut reg = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let conn = Uuid::new_v4();

        assert!(reg.insert(user, conn));
        assert!(reg.is_online(user));
        assert_eq!(reg.user_of(conn), Some(user));

        let departure = reg.remove(conn).unwrap();
        assert_eq!(departure, Departure { user_id: user, last_connection: true });
        assert!(reg.is_empty());
        assert!(!reg.is_online(user));
        assert!(reg.online_users().is_empty());
    }

    #[test]
    fn older_connection_closing_keeps_user_online() {
        let mut reg = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(reg.insert(user, first));
        assert!(!reg.insert(user, second));

        let departure = reg.remove(first).unwrap();
        assert!(!departure.last_connection);
        assert!(reg.is_online(user));
        assert_eq!(reg.connections_of(user), vec![second]);

        assert!(reg.remove(second).unwrap().last_connection);
        assert!(!reg.is_online(user));
    }

    #[test]
    fn removing_unknown_connection_is_none() {
        let mut reg = PresenceRegistry::new();
        assert!(reg.remove(Uuid::new_v4()).is_none());
    }

    #[test]
    fn reinserting_same_pair_is_idempotent() {
        let mut reg = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let conn = Uuid::new_v4();

        assert!(reg.insert(user, conn));
        assert!(!reg.insert(user, conn));
        assert_eq!(reg.connection_count(), 1);
        assert!(reg.remove(conn).unwrap().last_connection);
    }
}
