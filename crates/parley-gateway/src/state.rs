use std::sync::Arc;
use std::time::Duration;

use parley_db::Database;

use crate::dispatcher::Dispatcher;
use crate::notifier::{LogOnlyNotifier, OfflineNotifier};
use crate::store::Store;

/// Default upper bound on handshake authentication.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a connection handler needs. Built once per process and cloned
/// into each connection task.
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub store: Store,
    pub jwt_secret: Arc<str>,
    pub auth_timeout: Duration,
    pub notifier: Arc<dyn OfflineNotifier>,
}

impl GatewayState {
    pub fn new(db: Arc<Database>, jwt_secret: impl Into<Arc<str>>) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            store: Store::new(db),
            jwt_secret: jwt_secret.into(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            notifier: Arc::new(LogOnlyNotifier),
        }
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn OfflineNotifier>) -> Self {
        self.notifier = notifier;
        self
    }
}
