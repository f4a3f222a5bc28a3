use crate::DomainResult;
use crate::ports::BoxFuture;
use crate::support::{Attachment, Conversation, ConversationStatus, SupportMessage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(Conversation),
    AlreadyClaimedBySelf(Conversation),
    HeldByOther(Conversation),
    Closed(Conversation),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(SupportMessage),
    Closed,
}

pub trait ConversationRepository: Send + Sync {
    /// Returns the owner's active conversation if one exists, otherwise stores
    /// `candidate`. Lookup and insert happen atomically.
    fn open_or_resume(
        &self,
        candidate: &Conversation,
    ) -> BoxFuture<'_, DomainResult<Conversation>>;

    fn get(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Option<Conversation>>>;

    fn list(
        &self,
        status: Option<ConversationStatus>,
    ) -> BoxFuture<'_, DomainResult<Vec<Conversation>>>;

    /// Sets the claiming agent only if the conversation is unclaimed or
    /// already held by `agent_id`, as one conditional update.
    fn claim(
        &self,
        conversation_id: &str,
        agent_id: &str,
    ) -> BoxFuture<'_, DomainResult<ClaimOutcome>>;

    fn close(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Conversation>>;
}

pub trait SupportMessageRepository: Send + Sync {
    /// Stores `message` and advances the conversation's last activity only
    /// while the conversation is active. Status check and insert happen under
    /// the same lock as `ConversationRepository::close`.
    fn append(&self, message: &SupportMessage) -> BoxFuture<'_, DomainResult<AppendOutcome>>;

    fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<SupportMessage>>>;
}

pub trait AttachmentRepository: Send + Sync {
    fn save(&self, attachment: &Attachment) -> BoxFuture<'_, DomainResult<()>>;

    fn get(&self, attachment_id: &str) -> BoxFuture<'_, DomainResult<Option<Attachment>>>;

    fn delete(&self, attachment_id: &str) -> BoxFuture<'_, DomainResult<()>>;
}
