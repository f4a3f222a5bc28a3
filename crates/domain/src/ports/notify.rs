use crate::support::{Conversation, SupportMessage};

/// Fan-out hook invoked after a message or status change has been persisted.
/// Implementations must not block and cannot fail the calling operation.
pub trait SupportNotifier: Send + Sync {
    fn message_accepted(&self, message: &SupportMessage);

    fn status_changed(&self, conversation: &Conversation);
}
