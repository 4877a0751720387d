//! Shared fixtures for the gateway's unit tests.

use std::sync::Arc;

use jsonwebtoken::{EncodingKey, Header, encode};
use tokio::sync::mpsc;
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::Claims;
use parley_types::events::ServerEvent;

use crate::notifier::OfflineNotifier;
use crate::presence::{self, Session};
use crate::state::GatewayState;

pub const SECRET: &str = "unit-test-secret";

/// alice <-> bob are friends and share `chat_ab`; carol and dave share
/// `chat_cd`. carol knows nobody in `chat_ab`.
pub struct Fixture {
    pub db: Arc<Database>,
    pub state: GatewayState,
    pub alice: Uuid,
    pub bob: Uuid,
    pub carol: Uuid,
    pub dave: Uuid,
    pub chat_ab: Uuid,
    pub chat_cd: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let state = GatewayState::new(db.clone(), SECRET);
        Self::seed(db, state)
    }

    pub fn with_notifier(notifier: Arc<dyn OfflineNotifier>) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let state = GatewayState::new(db.clone(), SECRET).with_notifier(notifier);
        Self::seed(db, state)
    }

    fn seed(db: Arc<Database>, state: GatewayState) -> Self {
        let [alice, bob, carol, dave] = ["alice", "bob", "carol", "dave"].map(|name| {
            let id = Uuid::new_v4();
            db.create_user(&id.to_string(), name, &name.to_uppercase(), None)
                .unwrap();
            id
        });
        db.add_friendship(&alice.to_string(), &bob.to_string()).unwrap();

        let chat_ab = Uuid::new_v4();
        let chat_cd = Uuid::new_v4();
        db.create_chat(
            &chat_ab.to_string(),
            None,
            false,
            &[&alice.to_string(), &bob.to_string()],
        )
        .unwrap();
        db.create_chat(
            &chat_cd.to_string(),
            Some("cd"),
            true,
            &[&carol.to_string(), &dave.to_string()],
        )
        .unwrap();

        Self {
            db,
            state,
            alice,
            bob,
            carol,
            dave,
            chat_ab,
            chat_cd,
        }
    }

    /// Run the connect lifecycle for a seeded user, as the socket layer would.
    pub async fn connect(&self, user_id: Uuid) -> (Session, mpsc::UnboundedReceiver<ServerEvent>) {
        let user = self.state.store.user(user_id).await.unwrap().unwrap();
        presence::connect(&self.state, user).await
    }
}

pub fn token_for(user_id: Uuid, username: &str) -> String {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
