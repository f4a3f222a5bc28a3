use std::collections::HashMap;
use std::sync::Arc;

use kedai_domain::DomainResult;
use kedai_domain::error::DomainError;
use kedai_domain::ports::BoxFuture;
use kedai_domain::ports::support::{
    AppendOutcome, AttachmentRepository, ClaimOutcome, ConversationRepository,
    SupportMessageRepository,
};
use kedai_domain::support::{
    Attachment, Conversation, ConversationOwner, ConversationStatus, SupportMessage,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct SupportState {
    conversations: HashMap<String, Conversation>,
    active_by_owner: HashMap<ConversationOwner, String>,
    messages: HashMap<String, Vec<SupportMessage>>,
}

/// Conversations and their messages behind one lock, so a message append
/// observes any close committed before it.
#[derive(Clone, Default)]
pub struct InMemorySupportStore {
    state: Arc<RwLock<SupportState>>,
}

impl InMemorySupportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationRepository for InMemorySupportStore {
    fn open_or_resume(&self, candidate: &Conversation) -> BoxFuture<'_, DomainResult<Conversation>> {
        let candidate = candidate.clone();
        let state = self.state.clone();
        Box::pin(async move {
            let mut state = state.write().await;
            if let Some(existing) = state
                .active_by_owner
                .get(&candidate.owner)
                .and_then(|id| state.conversations.get(id))
                .filter(|conversation| conversation.status.is_active())
            {
                return Ok(existing.clone());
            }
            if state.conversations.contains_key(&candidate.conversation_id) {
                return Err(DomainError::Conflict);
            }
            state
                .active_by_owner
                .insert(candidate.owner.clone(), candidate.conversation_id.clone());
            state
                .conversations
                .insert(candidate.conversation_id.clone(), candidate.clone());
            Ok(candidate)
        })
    }

    fn get(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
        let conversation_id = conversation_id.to_string();
        let state = self.state.clone();
        Box::pin(async move { Ok(state.read().await.conversations.get(&conversation_id).cloned()) })
    }

    fn list(
        &self,
        status: Option<ConversationStatus>,
    ) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
        let state = self.state.clone();
        Box::pin(async move {
            let state = state.read().await;
            let mut conversations: Vec<Conversation> = state
                .conversations
                .values()
                .filter(|conversation| status.is_none_or(|status| conversation.status == status))
                .cloned()
                .collect();
            conversations.sort_by(|a, b| {
                b.last_message_at_ms
                    .cmp(&a.last_message_at_ms)
                    .then_with(|| b.conversation_id.cmp(&a.conversation_id))
            });
            Ok(conversations)
        })
    }

    fn claim(
        &self,
        conversation_id: &str,
        agent_id: &str,
    ) -> BoxFuture<'_, DomainResult<ClaimOutcome>> {
        let conversation_id = conversation_id.to_string();
        let agent_id = agent_id.to_string();
        let state = self.state.clone();
        Box::pin(async move {
            let mut state = state.write().await;
            let conversation = state
                .conversations
                .get_mut(&conversation_id)
                .ok_or(DomainError::NotFound("conversation"))?;
            if conversation.is_closed() {
                return Ok(ClaimOutcome::Closed(conversation.clone()));
            }
            match conversation.claimed_by_agent_id.as_deref() {
                Some(current) if current == agent_id => {
                    Ok(ClaimOutcome::AlreadyClaimedBySelf(conversation.clone()))
                }
                Some(_) => Ok(ClaimOutcome::HeldByOther(conversation.clone())),
                None => {
                    conversation.claimed_by_agent_id = Some(agent_id);
                    conversation.status = ConversationStatus::Claimed;
                    Ok(ClaimOutcome::Claimed(conversation.clone()))
                }
            }
        })
    }

    fn close(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation_id = conversation_id.to_string();
        let state = self.state.clone();
        Box::pin(async move {
            let mut state = state.write().await;
            let conversation = state
                .conversations
                .get_mut(&conversation_id)
                .ok_or(DomainError::NotFound("conversation"))?;
            conversation.status = ConversationStatus::Closed;
            let closed = conversation.clone();
            if state
                .active_by_owner
                .get(&closed.owner)
                .is_some_and(|id| *id == closed.conversation_id)
            {
                state.active_by_owner.remove(&closed.owner);
            }
            Ok(closed)
        })
    }
}

impl SupportMessageRepository for InMemorySupportStore {
    fn append(&self, message: &SupportMessage) -> BoxFuture<'_, DomainResult<AppendOutcome>> {
        let message = message.clone();
        let state = self.state.clone();
        Box::pin(async move {
            let mut state = state.write().await;
            let state = &mut *state;
            let conversation = state
                .conversations
                .get_mut(&message.conversation_id)
                .ok_or(DomainError::NotFound("conversation"))?;
            if conversation.is_closed() {
                return Ok(AppendOutcome::Closed);
            }

            let messages = state
                .messages
                .entry(message.conversation_id.clone())
                .or_default();
            if messages
                .iter()
                .any(|existing| existing.message_id == message.message_id)
            {
                return Err(DomainError::Conflict);
            }
            let position =
                messages.partition_point(|existing| existing.created_at_ms <= message.created_at_ms);
            messages.insert(position, message.clone());
            conversation.last_message_at_ms =
                conversation.last_message_at_ms.max(message.created_at_ms);
            Ok(AppendOutcome::Appended(message))
        })
    }

    fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<SupportMessage>>> {
        let conversation_id = conversation_id.to_string();
        let state = self.state.clone();
        Box::pin(async move {
            Ok(state
                .read()
                .await
                .messages
                .get(&conversation_id)
                .cloned()
                .unwrap_or_default())
        })
    }
}

#[derive(Default)]
pub struct InMemoryAttachmentRepository {
    store: Arc<RwLock<HashMap<String, Attachment>>>,
}

impl InMemoryAttachmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttachmentRepository for InMemoryAttachmentRepository {
    fn save(&self, attachment: &Attachment) -> BoxFuture<'_, DomainResult<()>> {
        let attachment = attachment.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            if store.contains_key(&attachment.attachment_id) {
                return Err(DomainError::Conflict);
            }
            store.insert(attachment.attachment_id.clone(), attachment);
            Ok(())
        })
    }

    fn get(&self, attachment_id: &str) -> BoxFuture<'_, DomainResult<Option<Attachment>>> {
        let attachment_id = attachment_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&attachment_id).cloned()) })
    }

    fn delete(&self, attachment_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let attachment_id = attachment_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            store.write().await.remove(&attachment_id);
            Ok(())
        })
    }
}
