use tracing::debug;
use uuid::Uuid;

use parley_types::models::MessageView;

/// Delivery hook for chat members with no live connection when a message is
/// posted (mobile push, email digests, ...). Called once per offline member.
pub trait OfflineNotifier: Send + Sync {
    fn notify(&self, recipient: Uuid, message: &MessageView);
}

/// Default hook: no push backend, just a trace of what would have been sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyNotifier;

impl OfflineNotifier for LogOnlyNotifier {
    fn notify(&self, recipient: Uuid, message: &MessageView) {
        debug!(
            recipient = %recipient,
            message_id = %message.id,
            chat_id = %message.chat_id,
            "Recipient offline, no push backend configured"
        );
    }
}
