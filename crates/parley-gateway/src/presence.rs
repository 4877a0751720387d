//! Connection lifecycle: registry entry, durable online flag, room
//! subscriptions and friend notifications.

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_types::events::ServerEvent;
use parley_types::models::User;

use crate::registry::ConnId;
use crate::rooms::Room;
use crate::state::GatewayState;

/// One authenticated connection. Lives exactly as long as the socket.
#[derive(Debug, Clone)]
pub struct Session {
    pub conn_id: ConnId,
    pub user: User,
}

impl Session {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }
}

/// Bring a freshly authenticated connection online.
///
/// Order: registry entry, `ready`, online flag, `online-users`, then room
/// subscriptions and `user-online` to friends. The connection joins no room
/// until its greeting is queued, so nothing can overtake `ready`.
pub async fn connect(state: &GatewayState, user: User) -> (Session, mpsc::UnboundedReceiver<ServerEvent>) {
    let (conn_id, rx, first) = state.dispatcher.register_connection(user.id).await;
    info!(
        user_id = %user.id,
        conn_id = %conn_id,
        first_connection = first,
        "{} connected to gateway",
        user.username
    );

    state
        .dispatcher
        .send_to_connection(
            conn_id,
            ServerEvent::Ready {
                user_id: user.id,
                username: user.username.clone(),
            },
        )
        .await;

    sync_presence(state, user.id).await;

    let user_ids = state.dispatcher.online_user_ids().await;
    state
        .dispatcher
        .send_to_connection(conn_id, ServerEvent::OnlineUsers { user_ids })
        .await;

    let rooms = subscribe_rooms(state, conn_id, user.id).await;
    debug!("{} ({}) subscribed to {} rooms", user.username, user.id, rooms);

    notify_friends(state, user.id, true).await;

    (Session { conn_id, user }, rx)
}

/// Tear a connection down. The user only goes offline (flag and friend
/// notifications) when this was their last connection.
pub async fn disconnect(state: &GatewayState, session: &Session) {
    let user_id = session.user_id();
    let Some(departure) = state.dispatcher.unregister_connection(session.conn_id).await else {
        return;
    };

    info!(
        user_id = %user_id,
        conn_id = %session.conn_id,
        "{} disconnected from gateway",
        session.user.username
    );

    if !departure.last_connection {
        debug!(
            "{} ({}) still has {} open connection(s)",
            session.user.username,
            user_id,
            state.dispatcher.connections_of(user_id).await.len()
        );
        return;
    }

    sync_presence(state, user_id).await;

    // A reconnect may have raced in while the flag was being written.
    if state.dispatcher.is_online(user_id).await {
        debug!("{} ({}) reconnected during teardown", session.user.username, user_id);
        return;
    }
    notify_friends(state, user_id, false).await;
}

/// Write the durable online flag from the registry's current state, under the
/// user's presence lock. Whatever order connects and disconnects finish in,
/// the last write reflects the registry. Failures are logged only.
async fn sync_presence(state: &GatewayState, user_id: Uuid) {
    let guard = state.dispatcher.presence_lock(user_id).await;
    let online = state.dispatcher.is_online(user_id).await;

    match state.store.set_presence(user_id, online, Utc::now()).await {
        Ok(true) => {}
        Ok(false) => warn!("Presence update for unknown user {}", user_id),
        Err(e) => error!("Failed to persist presence for {}: {:#}", user_id, e),
    }

    drop(guard);
    if !online {
        state.dispatcher.release_presence_lock(user_id).await;
    }
}

/// Personal room plus every chat the user belongs to. A failed chat lookup
/// still leaves the personal room joined.
async fn subscribe_rooms(state: &GatewayState, conn_id: ConnId, user_id: Uuid) -> usize {
    let mut rooms = vec![Room::User(user_id)];
    match state.store.chat_ids_for_user(user_id).await {
        Ok(chat_ids) => rooms.extend(chat_ids.into_iter().map(Room::Chat)),
        Err(e) => {
            error!("Failed to load chats for {}: {:#}", user_id, e);
            state
                .dispatcher
                .send_to_connection(conn_id, ServerEvent::error("failed to load chats"))
                .await;
        }
    }
    state.dispatcher.join_all(conn_id, &rooms).await
}

/// Send `user-online` to each friend's personal room. Best effort: a failed
/// friend lookup is logged and skipped. Returns connections reached.
pub async fn notify_friends(state: &GatewayState, user_id: Uuid, is_online: bool) -> usize {
    let friends = match state.store.friend_ids(user_id).await {
        Ok(friends) => friends,
        Err(e) => {
            warn!("Could not resolve friends of {}: {:#}", user_id, e);
            return 0;
        }
    };

    let mut reached = 0;
    for friend_id in friends {
        reached += state
            .dispatcher
            .send_to_user(friend_id, ServerEvent::UserOnline { user_id, is_online })
            .await;
    }
    reached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, drain};

    #[tokio::test]
    async fn connect_marks_online_and_greets_client() {
        let fx = Fixture::new();
        let (session, mut rx) = fx.connect(fx.alice).await;

        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            ServerEvent::Ready {
                user_id: fx.alice,
                username: "alice".into()
            }
        );
        assert_eq!(events[1], ServerEvent::OnlineUsers { user_ids: vec![fx.alice] });

        let stored = fx.db.get_user_by_id(&fx.alice.to_string()).unwrap().unwrap();
        assert!(stored.is_online);
        assert!(
            fx.state
                .dispatcher
                .is_subscribed(session.conn_id, Room::Chat(fx.chat_ab))
                .await
        );
        assert!(
            !fx.state
                .dispatcher
                .is_subscribed(session.conn_id, Room::Chat(fx.chat_cd))
                .await
        );
    }

    #[tokio::test]
    async fn connect_then_disconnect_is_symmetric() {
        let fx = Fixture::new();
        let (session, _rx) = fx.connect(fx.alice).await;
        disconnect(&fx.state, &session).await;

        assert_eq!(fx.state.dispatcher.connection_count().await, 0);
        assert!(fx.state.dispatcher.online_user_ids().await.is_empty());
        assert!(fx.state.dispatcher.rooms_of(session.conn_id).await.is_empty());

        let stored = fx.db.get_user_by_id(&fx.alice.to_string()).unwrap().unwrap();
        assert!(!stored.is_online);
        assert!(stored.last_seen.is_some());
    }

    #[tokio::test]
    async fn only_friends_hear_about_presence() {
        let fx = Fixture::new();
        // bob is alice's friend, carol is not
        let (_, mut bob_rx) = fx.connect(fx.bob).await;
        let (_, mut carol_rx) = fx.connect(fx.carol).await;
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        let (alice, _alice_rx) = fx.connect(fx.alice).await;

        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::UserOnline {
                user_id: fx.alice,
                is_online: true
            }]
        );
        assert!(drain(&mut carol_rx).is_empty());

        disconnect(&fx.state, &alice).await;
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::UserOnline {
                user_id: fx.alice,
                is_online: false
            }]
        );
        assert!(drain(&mut carol_rx).is_empty());
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_mark_user_offline() {
        let fx = Fixture::new();
        let (_, mut bob_rx) = fx.connect(fx.bob).await;
        let (older, _rx1) = fx.connect(fx.alice).await;
        let (_newer, _rx2) = fx.connect(fx.alice).await;
        drain(&mut bob_rx);

        disconnect(&fx.state, &older).await;

        assert!(fx.state.dispatcher.is_online(fx.alice).await);
        let stored = fx.db.get_user_by_id(&fx.alice.to_string()).unwrap().unwrap();
        assert!(stored.is_online);
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn failed_friend_lookup_does_not_block_going_offline() {
        let fx = Fixture::new();
        let (session, _rx) = fx.connect(fx.alice).await;
        fx.db
            .with_conn(|conn| {
                conn.execute_batch("DROP TABLE friendships;")?;
                Ok(())
            })
            .unwrap();

        disconnect(&fx.state, &session).await;

        assert!(!fx.state.dispatcher.is_online(fx.alice).await);
        assert_eq!(fx.state.dispatcher.connection_count().await, 0);
        assert_eq!(notify_friends(&fx.state, fx.alice, false).await, 0);
        let stored = fx.db.get_user_by_id(&fx.alice.to_string()).unwrap().unwrap();
        assert!(!stored.is_online);
    }

    #[tokio::test]
    async fn double_disconnect_is_harmless() {
        let fx = Fixture::new();
        let (session, _rx) = fx.connect(fx.alice).await;
        disconnect(&fx.state, &session).await;
        disconnect(&fx.state, &session).await;
        assert_eq!(fx.state.dispatcher.connection_count().await, 0);
    }
}
