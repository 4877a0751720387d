use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, warn};

use parley_types::api::Claims;
use parley_types::models::User;

use crate::error::AuthError;
use crate::state::GatewayState;
use crate::store::Store;

/// Check signature and expiry of a handshake token.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(AuthError::InvalidToken)?;

    Ok(token_data.claims)
}

/// Resolve a handshake token to a live user. Touches no session state, so a
/// refusal leaves nothing behind.
pub async fn authenticate(store: &Store, secret: &str, token: Option<&str>) -> Result<User, AuthError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::NoToken)?;

    let claims = verify_token(secret, token)?;

    let user = store
        .user(claims.sub)
        .await
        .map_err(AuthError::Store)?
        .ok_or(AuthError::UserNotFound)?;

    debug!("Token for {} ({}) accepted", user.username, user.id);
    Ok(user)
}

/// `authenticate`, bounded by the configured handshake timeout.
pub async fn authenticate_with_timeout(
    state: &GatewayState,
    token: Option<&str>,
) -> Result<User, AuthError> {
    match tokio::time::timeout(
        state.auth_timeout,
        authenticate(&state.store, &state.jwt_secret, token),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            warn!("Handshake authentication exceeded {:?}", state.auth_timeout);
            Err(AuthError::Timeout)
        }
    }
}

/// Pull a bearer token out of an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, SECRET, token_for};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    #[tokio::test]
    async fn missing_token_is_refused() {
        let fx = Fixture::new();
        let err = authenticate(&fx.state.store, SECRET, None).await.unwrap_err();
        assert!(matches!(err, AuthError::NoToken));
        assert_eq!(err.to_string(), "no token provided");

        let err = authenticate(&fx.state.store, SECRET, Some("  ")).await.unwrap_err();
        assert!(matches!(err, AuthError::NoToken));
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid() {
        let fx = Fixture::new();
        let token = token_for(fx.alice, "alice");
        let err = authenticate(&fx.state.store, "some-other-secret", Some(&token))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid token");
    }

    #[tokio::test]
    async fn expired_token_is_invalid() {
        let fx = Fixture::new();
        let claims = Claims {
            sub: fx.alice,
            username: "alice".into(),
            exp: (chrono::Utc::now() - chrono::Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = authenticate(&fx.state.store, SECRET, Some(&token)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn deleted_user_is_not_found() {
        let fx = Fixture::new();
        let token = token_for(Uuid::new_v4(), "ghost");
        let err = authenticate(&fx.state.store, SECRET, Some(&token)).await.unwrap_err();
        assert_eq!(err.to_string(), "user not found");
    }

    #[tokio::test]
    async fn valid_token_resolves_user() {
        let fx = Fixture::new();
        let token = token_for(fx.alice, "alice");
        let user = authenticate_with_timeout(&fx.state, Some(&token)).await.unwrap();
        assert_eq!(user.id, fx.alice);
        assert_eq!(user.username, "alice");
        assert_eq!(fx.state.dispatcher.connection_count().await, 0);
    }

    #[tokio::test]
    async fn stalled_store_times_out_with_unavailable_code() {
        let fx = Fixture::new();
        let state = fx
            .state
            .clone()
            .with_auth_timeout(std::time::Duration::from_millis(50));

        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        let db = fx.db.clone();
        let holder = tokio::task::spawn_blocking(move || {
            db.with_conn(|_| {
                let _ = locked_tx.send(());
                std::thread::sleep(std::time::Duration::from_millis(300));
                Ok(())
            })
        });
        locked_rx.await.unwrap();

        let token = token_for(fx.alice, "alice");
        let err = authenticate_with_timeout(&state, Some(&token)).await.unwrap_err();

        assert!(matches!(err, AuthError::Timeout));
        assert_eq!(err.close_code(), crate::error::CLOSE_AUTH_UNAVAILABLE);
        assert_eq!(fx.state.dispatcher.connection_count().await, 0);
        holder.await.unwrap().unwrap();
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
