use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::identity::SupportActor;
use crate::ports::notify::SupportNotifier;
use crate::ports::storefront::{CustomerRecords, UserDirectory};
use crate::ports::support::{
    AppendOutcome, AttachmentRepository, ClaimOutcome, ConversationRepository,
    SupportMessageRepository,
};
use crate::storefront::{SupportContext, UserProfile};
use crate::util::{new_guest_token, non_blank, now_ms, uuid_v7_without_dashes};

pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_TEXT_CHARS: usize = 4_000;
pub const DEFAULT_ATTACHMENT_FILE_NAME: &str = "attachment";
pub const DEFAULT_ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    Open,
    Claimed,
    Closed,
}

impl ConversationStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Some(Self::Open),
            "CLAIMED" => Some(Self::Claimed),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ConversationOwner {
    Customer(String),
    Guest(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub conversation_id: String,
    pub owner: ConversationOwner,
    pub claimed_by_agent_id: Option<String>,
    pub status: ConversationStatus,
    pub created_at_ms: i64,
    pub last_message_at_ms: i64,
}

impl Conversation {
    pub fn customer_user_id(&self) -> Option<&str> {
        match &self.owner {
            ConversationOwner::Customer(user_id) => Some(user_id),
            ConversationOwner::Guest(_) => None,
        }
    }

    pub fn guest_token(&self) -> Option<&str> {
        match &self.owner {
            ConversationOwner::Guest(token) => Some(token),
            ConversationOwner::Customer(_) => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == ConversationStatus::Closed
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "sender_type",
    content = "sender_id",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum Sender {
    Customer(String),
    SupportAgent(String),
    Guest(String),
}

impl Sender {
    pub fn sender_type(&self) -> &'static str {
        match self {
            Self::Customer(_) => "CUSTOMER",
            Self::SupportAgent(_) => "SUPPORT_AGENT",
            Self::Guest(_) => "GUEST",
        }
    }

    pub fn sender_id(&self) -> &str {
        match self {
            Self::Customer(id) | Self::SupportAgent(id) | Self::Guest(id) => id,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageBody {
    Text(String),
    Attachment(String),
}

impl MessageBody {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Text(_) => "TEXT",
            Self::Attachment(_) => "ATTACHMENT",
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Attachment(_) => None,
        }
    }

    pub fn attachment_id(&self) -> Option<&str> {
        match self {
            Self::Attachment(attachment_id) => Some(attachment_id),
            Self::Text(_) => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupportMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub sender: Sender,
    pub body: MessageBody,
    pub created_at_ms: i64,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub attachment_id: String,
    pub conversation_id: String,
    pub uploaded_by: Sender,
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
    pub data: Arc<[u8]>,
    pub created_at_ms: i64,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("attachment_id", &self.attachment_id)
            .field("conversation_id", &self.conversation_id)
            .field("uploaded_by", &self.uploaded_by)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .field("created_at_ms", &self.created_at_ms)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default)]
pub struct AttachmentUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub customer_display_name: Option<String>,
    pub customer_email: Option<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct SupportLimits {
    pub max_attachment_bytes: usize,
    pub max_text_chars: usize,
}

impl Default for SupportLimits {
    fn default() -> Self {
        Self {
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }
}

#[derive(Clone)]
pub struct SupportStores {
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn SupportMessageRepository>,
    pub attachments: Arc<dyn AttachmentRepository>,
}

#[derive(Clone)]
pub struct SupportService {
    stores: SupportStores,
    directory: Arc<dyn UserDirectory>,
    records: Arc<dyn CustomerRecords>,
    notifier: Arc<dyn SupportNotifier>,
    limits: SupportLimits,
}

impl SupportService {
    pub fn new(
        stores: SupportStores,
        directory: Arc<dyn UserDirectory>,
        records: Arc<dyn CustomerRecords>,
        notifier: Arc<dyn SupportNotifier>,
    ) -> Self {
        Self {
            stores,
            directory,
            records,
            notifier,
            limits: SupportLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: SupportLimits) -> Self {
        self.limits = limits;
        self
    }

    pub async fn start(&self, actor: &SupportActor) -> DomainResult<Conversation> {
        let owner = match actor {
            SupportActor::Customer { username } => {
                ConversationOwner::Customer(self.resolve_user_id(username).await?)
            }
            SupportActor::Guest { token } => match non_blank(token.as_deref()) {
                Some(token) => ConversationOwner::Guest(token.to_string()),
                None => ConversationOwner::Guest(new_guest_token()),
            },
            SupportActor::Agent { .. } => {
                return Err(DomainError::invalid(
                    "agents cannot start support conversations",
                ));
            }
        };

        let now = now_ms();
        let candidate = Conversation {
            conversation_id: uuid_v7_without_dashes(),
            owner,
            claimed_by_agent_id: None,
            status: ConversationStatus::Open,
            created_at_ms: now,
            last_message_at_ms: now,
        };
        let conversation = self.stores.conversations.open_or_resume(&candidate).await?;
        if conversation.conversation_id == candidate.conversation_id {
            tracing::info!(
                conversation_id = %conversation.conversation_id,
                actor = actor.kind(),
                "support conversation opened"
            );
        }
        Ok(conversation)
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> DomainResult<Conversation> {
        self.stores
            .conversations
            .get(conversation_id)
            .await?
            .ok_or(DomainError::NotFound("conversation"))
    }

    /// Runs the access check matching the actor and returns the sender
    /// identity the actor would post as.
    pub async fn assert_access(
        &self,
        conversation: &Conversation,
        actor: &SupportActor,
    ) -> DomainResult<Sender> {
        match actor {
            SupportActor::Customer { username } => {
                self.assert_customer_or_guest_access(conversation, Some(username), None)
                    .await
            }
            SupportActor::Guest { token } => {
                self.assert_customer_or_guest_access(conversation, None, token.as_deref())
                    .await
            }
            SupportActor::Agent { username } => {
                self.assert_agent_access(conversation, username).await
            }
        }
    }

    pub async fn assert_customer_or_guest_access(
        &self,
        conversation: &Conversation,
        username: Option<&str>,
        guest_token: Option<&str>,
    ) -> DomainResult<Sender> {
        if let Some(username) = username {
            let user_id = self.resolve_user_id(username).await?;
            if conversation.customer_user_id() != Some(user_id.as_str()) {
                return Err(DomainError::denied(
                    "conversation belongs to another customer",
                ));
            }
            return Ok(Sender::Customer(user_id));
        }

        let token =
            non_blank(guest_token).ok_or_else(|| DomainError::invalid("guest token is required"))?;
        if conversation.guest_token() != Some(token) {
            return Err(DomainError::denied(
                "guest token does not match conversation",
            ));
        }
        Ok(Sender::Guest(token.to_string()))
    }

    pub async fn assert_agent_access(
        &self,
        conversation: &Conversation,
        agent_username: &str,
    ) -> DomainResult<Sender> {
        let agent_id = self.resolve_user_id(agent_username).await?;
        if conversation.claimed_by_agent_id.as_deref() != Some(agent_id.as_str()) {
            return Err(DomainError::denied(
                "conversation is not claimed by this agent",
            ));
        }
        Ok(Sender::SupportAgent(agent_id))
    }

    pub async fn claim(
        &self,
        conversation_id: &str,
        agent_username: &str,
    ) -> DomainResult<Conversation> {
        let conversation = self.get_conversation(conversation_id).await?;
        ensure_open(&conversation)?;
        let agent_id = self.resolve_user_id(agent_username).await?;

        match self
            .stores
            .conversations
            .claim(conversation_id, &agent_id)
            .await?
        {
            ClaimOutcome::Claimed(conversation) => {
                tracing::info!(
                    conversation_id = %conversation.conversation_id,
                    agent_id = %agent_id,
                    "support conversation claimed"
                );
                self.notifier.status_changed(&conversation);
                Ok(conversation)
            }
            ClaimOutcome::AlreadyClaimedBySelf(conversation) => Ok(conversation),
            ClaimOutcome::HeldByOther(_) => Err(DomainError::invalid(
                "conversation already claimed by another agent",
            )),
            ClaimOutcome::Closed(_) => Err(closed_conversation()),
        }
    }

    pub async fn close(
        &self,
        conversation_id: &str,
        actor: &SupportActor,
    ) -> DomainResult<Conversation> {
        let conversation = self.get_conversation(conversation_id).await?;
        self.assert_access(&conversation, actor).await?;
        if conversation.is_closed() {
            return Ok(conversation);
        }

        let conversation = self.stores.conversations.close(conversation_id).await?;
        tracing::info!(
            conversation_id = %conversation.conversation_id,
            actor = actor.kind(),
            "support conversation closed"
        );
        self.notifier.status_changed(&conversation);
        Ok(conversation)
    }

    pub async fn send_text(
        &self,
        conversation_id: &str,
        actor: &SupportActor,
        text: &str,
    ) -> DomainResult<SupportMessage> {
        let text = self.validate_text(text)?;
        let conversation = self.get_conversation(conversation_id).await?;
        ensure_open(&conversation)?;
        let sender = self.assert_access(&conversation, actor).await?;

        let message = SupportMessage {
            message_id: uuid_v7_without_dashes(),
            conversation_id: conversation.conversation_id,
            sender,
            body: MessageBody::Text(text),
            created_at_ms: now_ms(),
        };
        self.accept_message(message).await
    }

    pub async fn upload_attachment(
        &self,
        conversation_id: &str,
        actor: &SupportActor,
        upload: Option<AttachmentUpload>,
    ) -> DomainResult<SupportMessage> {
        let upload = upload
            .filter(|upload| !upload.data.is_empty())
            .ok_or_else(|| DomainError::invalid("file is required"))?;
        let size = upload.data.len();
        if size > self.limits.max_attachment_bytes {
            return Err(DomainError::invalid(format!(
                "file too large: {size} bytes exceeds the {} byte limit",
                self.limits.max_attachment_bytes
            )));
        }

        let conversation = self.get_conversation(conversation_id).await?;
        ensure_open(&conversation)?;
        let sender = self.assert_access(&conversation, actor).await?;

        let created_at_ms = now_ms();
        let attachment = Attachment {
            attachment_id: uuid_v7_without_dashes(),
            conversation_id: conversation.conversation_id.clone(),
            uploaded_by: sender.clone(),
            file_name: normalize_file_name(upload.file_name.as_deref()),
            content_type: non_blank(upload.content_type.as_deref())
                .map(|value| value.trim().to_string())
                .unwrap_or_else(|| DEFAULT_ATTACHMENT_CONTENT_TYPE.to_string()),
            size,
            data: Arc::from(upload.data),
            created_at_ms,
        };
        self.stores.attachments.save(&attachment).await?;

        let message = SupportMessage {
            message_id: uuid_v7_without_dashes(),
            conversation_id: conversation.conversation_id,
            sender,
            body: MessageBody::Attachment(attachment.attachment_id.clone()),
            created_at_ms,
        };
        match self.accept_message(message).await {
            Ok(message) => Ok(message),
            Err(err) => {
                if let Err(cleanup_err) = self
                    .stores
                    .attachments
                    .delete(&attachment.attachment_id)
                    .await
                {
                    tracing::warn!(
                        attachment_id = %attachment.attachment_id,
                        error = %cleanup_err,
                        "failed to remove orphaned support attachment"
                    );
                }
                Err(err)
            }
        }
    }

    pub async fn list_messages(
        &self,
        conversation_id: &str,
        actor: &SupportActor,
    ) -> DomainResult<Vec<SupportMessage>> {
        let conversation = self.get_conversation(conversation_id).await?;
        self.assert_access(&conversation, actor).await?;
        self.stores
            .messages
            .list_by_conversation(&conversation.conversation_id)
            .await
    }

    pub async fn agent_queue(
        &self,
        status: Option<ConversationStatus>,
    ) -> DomainResult<Vec<ConversationSummary>> {
        let conversations = self.stores.conversations.list(status).await?;
        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let profile = match conversation.customer_user_id() {
                Some(user_id) => self.display_profile(user_id).await,
                None => None,
            };
            let (customer_display_name, customer_email) = match profile {
                Some(profile) => (
                    profile.display_name.or(Some(profile.username)),
                    profile.email,
                ),
                None => (None, None),
            };
            summaries.push(ConversationSummary {
                conversation,
                customer_display_name,
                customer_email,
            });
        }
        Ok(summaries)
    }

    pub async fn get_attachment(&self, attachment_id: &str) -> DomainResult<Attachment> {
        self.stores
            .attachments
            .get(attachment_id)
            .await?
            .ok_or(DomainError::NotFound("attachment"))
    }

    pub async fn download_attachment(
        &self,
        attachment_id: &str,
        actor: &SupportActor,
    ) -> DomainResult<Attachment> {
        let attachment = self.get_attachment(attachment_id).await?;
        let conversation = self.get_conversation(&attachment.conversation_id).await?;
        self.assert_access(&conversation, actor).await?;
        Ok(attachment)
    }

    pub async fn context(
        &self,
        conversation_id: &str,
        actor: &SupportActor,
    ) -> DomainResult<SupportContext> {
        let conversation = self.get_conversation(conversation_id).await?;
        self.assert_access(&conversation, actor).await?;
        let Some(user_id) = conversation.customer_user_id() else {
            return Ok(SupportContext::empty());
        };

        Ok(SupportContext {
            profile: degrade("profile", user_id, self.directory.find_by_id(user_id).await)
                .flatten(),
            cart: degrade("cart", user_id, self.records.cart(user_id).await).flatten(),
            orders: degrade("orders", user_id, self.records.orders(user_id).await)
                .unwrap_or_default(),
            deliveries: degrade(
                "deliveries",
                user_id,
                self.records.deliveries(user_id).await,
            )
            .unwrap_or_default(),
            wishlist_product_ids: degrade(
                "wishlist",
                user_id,
                self.records.wishlist_product_ids(user_id).await,
            )
            .unwrap_or_default(),
        })
    }

    async fn resolve_user_id(&self, username: &str) -> DomainResult<String> {
        self.directory
            .find_by_username(username)
            .await?
            .map(|profile| profile.user_id)
            .ok_or(DomainError::NotFound("user"))
    }

    async fn display_profile(&self, user_id: &str) -> Option<UserProfile> {
        degrade("display", user_id, self.directory.find_by_id(user_id).await).flatten()
    }

    async fn accept_message(&self, message: SupportMessage) -> DomainResult<SupportMessage> {
        match self.stores.messages.append(&message).await? {
            AppendOutcome::Appended(message) => {
                self.notifier.message_accepted(&message);
                Ok(message)
            }
            AppendOutcome::Closed => {
                tracing::info!(
                    conversation_id = %message.conversation_id,
                    "support message rejected; conversation closed meanwhile"
                );
                Err(closed_conversation())
            }
        }
    }

    fn validate_text(&self, text: &str) -> DomainResult<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DomainError::invalid("text must not be blank"));
        }
        if text.chars().count() > self.limits.max_text_chars {
            return Err(DomainError::invalid(format!(
                "text exceeds max length of {}",
                self.limits.max_text_chars
            )));
        }
        Ok(text.to_string())
    }
}

fn ensure_open(conversation: &Conversation) -> DomainResult<()> {
    if conversation.is_closed() {
        return Err(closed_conversation());
    }
    Ok(())
}

fn closed_conversation() -> DomainError {
    DomainError::invalid("conversation is closed")
}

fn normalize_file_name(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_ATTACHMENT_FILE_NAME)
        .to_string()
}

fn degrade<T>(section: &'static str, user_id: &str, result: DomainResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(section, user_id, error = %err, "customer lookup failed; degrading");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::ports::BoxFuture;
    use crate::storefront::{CartSnapshot, DeliverySummary, OrderSummary};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct MockSupportStore {
        conversations: RwLock<HashMap<String, Conversation>>,
        messages: RwLock<Vec<SupportMessage>>,
        attachments: RwLock<HashMap<String, Attachment>>,
        users: RwLock<HashMap<String, UserProfile>>,
        orders: RwLock<Vec<OrderSummary>>,
        fail_profile_lookups: AtomicBool,
        fail_order_lookups: AtomicBool,
        fail_message_append: AtomicBool,
        close_before_append: AtomicBool,
    }

    impl ConversationRepository for MockSupportStore {
        fn open_or_resume(
            &self,
            candidate: &Conversation,
        ) -> BoxFuture<'_, DomainResult<Conversation>> {
            let candidate = candidate.clone();
            Box::pin(async move {
                let mut conversations = self.conversations.write().await;
                if let Some(existing) = conversations
                    .values()
                    .find(|item| item.owner == candidate.owner && item.status.is_active())
                {
                    return Ok(existing.clone());
                }
                conversations.insert(candidate.conversation_id.clone(), candidate.clone());
                Ok(candidate)
            })
        }

        fn get(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
            let conversation_id = conversation_id.to_string();
            Box::pin(async move { Ok(self.conversations.read().await.get(&conversation_id).cloned()) })
        }

        fn list(
            &self,
            status: Option<ConversationStatus>,
        ) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
            Box::pin(async move {
                let mut output: Vec<_> = self
                    .conversations
                    .read()
                    .await
                    .values()
                    .filter(|item| status.is_none_or(|status| item.status == status))
                    .cloned()
                    .collect();
                output.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
                Ok(output)
            })
        }

        fn claim(
            &self,
            conversation_id: &str,
            agent_id: &str,
        ) -> BoxFuture<'_, DomainResult<ClaimOutcome>> {
            let conversation_id = conversation_id.to_string();
            let agent_id = agent_id.to_string();
            Box::pin(async move {
                let mut conversations = self.conversations.write().await;
                let conversation = conversations
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
            Box::pin(async move {
                let mut conversations = self.conversations.write().await;
                let conversation = conversations
                    .get_mut(&conversation_id)
                    .ok_or(DomainError::NotFound("conversation"))?;
                conversation.status = ConversationStatus::Closed;
                Ok(conversation.clone())
            })
        }
    }

    impl SupportMessageRepository for MockSupportStore {
        fn append(&self, message: &SupportMessage) -> BoxFuture<'_, DomainResult<AppendOutcome>> {
            let message = message.clone();
            Box::pin(async move {
                if self.fail_message_append.load(Ordering::SeqCst) {
                    return Err(DomainError::Conflict);
                }
                let mut conversations = self.conversations.write().await;
                let conversation = conversations
                    .get_mut(&message.conversation_id)
                    .ok_or(DomainError::NotFound("conversation"))?;
                if self.close_before_append.load(Ordering::SeqCst) {
                    conversation.status = ConversationStatus::Closed;
                }
                if conversation.is_closed() {
                    return Ok(AppendOutcome::Closed);
                }
                conversation.last_message_at_ms =
                    conversation.last_message_at_ms.max(message.created_at_ms);
                self.messages.write().await.push(message.clone());
                Ok(AppendOutcome::Appended(message))
            })
        }

        fn list_by_conversation(
            &self,
            conversation_id: &str,
        ) -> BoxFuture<'_, DomainResult<Vec<SupportMessage>>> {
            let conversation_id = conversation_id.to_string();
            Box::pin(async move {
                let mut output: Vec<_> = self
                    .messages
                    .read()
                    .await
                    .iter()
                    .filter(|message| message.conversation_id == conversation_id)
                    .cloned()
                    .collect();
                output.sort_by_key(|message| message.created_at_ms);
                Ok(output)
            })
        }
    }

    impl AttachmentRepository for MockSupportStore {
        fn save(&self, attachment: &Attachment) -> BoxFuture<'_, DomainResult<()>> {
            let attachment = attachment.clone();
            Box::pin(async move {
                self.attachments
                    .write()
                    .await
                    .insert(attachment.attachment_id.clone(), attachment);
                Ok(())
            })
        }

        fn get(&self, attachment_id: &str) -> BoxFuture<'_, DomainResult<Option<Attachment>>> {
            let attachment_id = attachment_id.to_string();
            Box::pin(async move { Ok(self.attachments.read().await.get(&attachment_id).cloned()) })
        }

        fn delete(&self, attachment_id: &str) -> BoxFuture<'_, DomainResult<()>> {
            let attachment_id = attachment_id.to_string();
            Box::pin(async move {
                self.attachments.write().await.remove(&attachment_id);
                Ok(())
            })
        }
    }

    impl UserDirectory for MockSupportStore {
        fn find_by_username(
            &self,
            username: &str,
        ) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
            let username = username.to_string();
            Box::pin(async move {
                Ok(self
                    .users
                    .read()
                    .await
                    .values()
                    .find(|user| user.username == username)
                    .cloned())
            })
        }

        fn find_by_id(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
            let user_id = user_id.to_string();
            Box::pin(async move {
                if self.fail_profile_lookups.load(Ordering::SeqCst) {
                    return Err(DomainError::invalid("directory offline"));
                }
                Ok(self.users.read().await.get(&user_id).cloned())
            })
        }
    }

    impl CustomerRecords for MockSupportStore {
        fn cart(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<CartSnapshot>>> {
            let user_id = user_id.to_string();
            Box::pin(async move {
                Ok(Some(CartSnapshot {
                    user_id,
                    lines: vec![],
                    total_cents: 0,
                    updated_at_ms: 1,
                }))
            })
        }

        fn orders(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<OrderSummary>>> {
            let user_id = user_id.to_string();
            Box::pin(async move {
                if self.fail_order_lookups.load(Ordering::SeqCst) {
                    return Err(DomainError::invalid("orders offline"));
                }
                Ok(self
                    .orders
                    .read()
                    .await
                    .iter()
                    .filter(|order| order.user_id == user_id)
                    .cloned()
                    .collect())
            })
        }

        fn deliveries(&self, _user_id: &str) -> BoxFuture<'_, DomainResult<Vec<DeliverySummary>>> {
            Box::pin(async move { Ok(vec![]) })
        }

        fn wishlist_product_ids(&self, _user_id: &str) -> BoxFuture<'_, DomainResult<Vec<String>>> {
            Box::pin(async move { Ok(vec!["sku-1".to_string()]) })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
        statuses: Mutex<Vec<ConversationStatus>>,
    }

    impl SupportNotifier for RecordingNotifier {
        fn message_accepted(&self, message: &SupportMessage) {
            self.messages
                .lock()
                .expect("notifier lock")
                .push(message.message_id.clone());
        }

        fn status_changed(&self, conversation: &Conversation) {
            self.statuses
                .lock()
                .expect("notifier lock")
                .push(conversation.status);
        }
    }

    struct Harness {
        store: Arc<MockSupportStore>,
        notifier: Arc<RecordingNotifier>,
        service: SupportService,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MockSupportStore::default());
        {
            let mut users = store.users.write().await;
            for (user_id, username, role) in [
                ("u-alice", "alice", Role::Customer),
                ("u-bob", "bob", Role::Customer),
                ("a-1", "agent-one", Role::SupportAgent),
                ("a-2", "agent-two", Role::SupportAgent),
            ] {
                users.insert(
                    user_id.to_string(),
                    UserProfile {
                        user_id: user_id.to_string(),
                        username: username.to_string(),
                        display_name: Some(format!("{username} display")),
                        email: Some(format!("{username}@example.test")),
                        role,
                    },
                );
            }
        }
        let notifier = Arc::new(RecordingNotifier::default());
        let stores = SupportStores {
            conversations: store.clone(),
            messages: store.clone(),
            attachments: store.clone(),
        };
        let service = SupportService::new(stores, store.clone(), store.clone(), notifier.clone())
            .with_limits(SupportLimits {
                max_attachment_bytes: 1024,
                max_text_chars: 32,
            });
        Harness {
            store,
            notifier,
            service,
        }
    }

    fn upload(bytes: usize) -> Option<AttachmentUpload> {
        Some(AttachmentUpload {
            file_name: None,
            content_type: None,
            data: vec![7; bytes],
        })
    }

    #[tokio::test]
    async fn guest_start_without_token_issues_fresh_token() {
        let h = harness().await;
        let conversation = h.service.start(&SupportActor::guest(None)).await.expect("start");
        assert_eq!(conversation.status, ConversationStatus::Open);
        assert!(conversation.guest_token().is_some_and(|token| !token.is_empty()));
        assert!(conversation.customer_user_id().is_none());
        assert!(conversation.claimed_by_agent_id.is_none());
    }

    #[tokio::test]
    async fn repeated_start_resumes_active_conversation() {
        let h = harness().await;
        let first = h.service.start(&SupportActor::guest(None)).await.expect("first");
        let token = first.guest_token().map(str::to_string);
        let second = h
            .service
            .start(&SupportActor::guest(token.clone()))
            .await
            .expect("second");
        assert_eq!(first.conversation_id, second.conversation_id);

        let customer = h.service.start(&SupportActor::customer("alice")).await.expect("c1");
        let again = h.service.start(&SupportActor::customer("alice")).await.expect("c2");
        assert_eq!(customer.conversation_id, again.conversation_id);
        assert_eq!(customer.customer_user_id(), Some("u-alice"));
    }

    #[tokio::test]
    async fn start_after_close_opens_new_conversation_with_same_token() {
        let h = harness().await;
        let actor = SupportActor::guest(Some("tok-1".to_string()));
        let first = h.service.start(&actor).await.expect("first");
        h.service
            .close(&first.conversation_id, &actor)
            .await
            .expect("close");
        let second = h.service.start(&actor).await.expect("second");
        assert_ne!(first.conversation_id, second.conversation_id);
        assert_eq!(second.guest_token(), Some("tok-1"));
        assert_eq!(second.status, ConversationStatus::Open);
    }

    #[tokio::test]
    async fn start_rejects_unknown_customer_and_agents() {
        let h = harness().await;
        let err = h
            .service
            .start(&SupportActor::customer("mallory"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound("user")));

        let err = h
            .service
            .start(&SupportActor::agent("agent-one"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn guest_text_is_saved_and_bumps_last_message_at() {
        let h = harness().await;
        let conversation = h.service.start(&SupportActor::guest(None)).await.expect("start");
        let token = conversation.guest_token().map(str::to_string);
        let message = h
            .service
            .send_text(
                &conversation.conversation_id,
                &SupportActor::guest(token.clone()),
                "  Hello  ",
            )
            .await
            .expect("send");

        assert_eq!(message.sender, Sender::Guest(token.clone().expect("token")));
        assert_eq!(message.body, MessageBody::Text("Hello".to_string()));
        let stored = h
            .service
            .get_conversation(&conversation.conversation_id)
            .await
            .expect("conversation");
        assert_eq!(stored.last_message_at_ms, message.created_at_ms);
        assert_eq!(h.notifier.messages.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn blank_or_oversized_text_is_rejected_without_persisting() {
        let h = harness().await;
        let actor = SupportActor::customer("alice");
        let conversation = h.service.start(&actor).await.expect("start");

        let too_long = "x".repeat(33);
        for text in ["", "   ", "\n\t", too_long.as_str()] {
            let err = h
                .service
                .send_text(&conversation.conversation_id, &actor, text)
                .await
                .unwrap_err();
            assert!(matches!(err, DomainError::InvalidRequest(_)));
        }
        assert!(h.store.messages.read().await.is_empty());
    }

    #[tokio::test]
    async fn claim_is_first_wins_and_close_is_terminal() {
        let h = harness().await;
        let conversation = h.service.start(&SupportActor::guest(None)).await.expect("start");
        let id = conversation.conversation_id.clone();

        let claimed = h.service.claim(&id, "agent-one").await.expect("claim");
        assert_eq!(claimed.status, ConversationStatus::Claimed);
        assert_eq!(claimed.claimed_by_agent_id.as_deref(), Some("a-1"));

        let again = h.service.claim(&id, "agent-one").await.expect("re-claim");
        assert_eq!(again.claimed_by_agent_id.as_deref(), Some("a-1"));

        let err = h.service.claim(&id, "agent-two").await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(msg) if msg.contains("already claimed")));

        let agent = SupportActor::agent("agent-one");
        let closed = h.service.close(&id, &agent).await.expect("close");
        assert_eq!(closed.status, ConversationStatus::Closed);

        let err = h.service.send_text(&id, &agent, "bye").await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(msg) if msg == "conversation is closed"));
        let err = h.service.claim(&id, "agent-two").await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(_)));

        let statuses = h.notifier.statuses.lock().expect("lock").clone();
        assert_eq!(
            statuses,
            vec![ConversationStatus::Claimed, ConversationStatus::Closed]
        );
    }

    #[tokio::test]
    async fn closed_conversation_rejects_sends_from_any_caller() {
        let h = harness().await;
        let conversation = h.service.start(&SupportActor::customer("alice")).await.expect("start");
        let id = conversation.conversation_id;
        h.service
            .close(&id, &SupportActor::customer("alice"))
            .await
            .expect("close");

        for actor in [
            SupportActor::customer("alice"),
            SupportActor::customer("bob"),
            SupportActor::guest(None),
            SupportActor::agent("agent-two"),
        ] {
            let err = h.service.send_text(&id, &actor, "hi").await.unwrap_err();
            assert!(matches!(err, DomainError::InvalidRequest(_)), "{actor:?}");
        }
    }

    #[tokio::test]
    async fn close_landing_before_append_rejects_send_and_upload() {
        let h = harness().await;
        let actor = SupportActor::customer("alice");
        let conversation = h.service.start(&actor).await.expect("start");
        let id = conversation.conversation_id;
        h.store.close_before_append.store(true, Ordering::SeqCst);

        let err = h.service.send_text(&id, &actor, "still there?").await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(msg) if msg.contains("closed")));
        let err = h
            .service
            .upload_attachment(&id, &actor, upload(8))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(msg) if msg.contains("closed")));

        assert!(h.store.messages.read().await.is_empty());
        assert!(h.store.attachments.read().await.is_empty());
        assert!(h.notifier.messages.lock().expect("notifier lock").is_empty());
    }

    #[tokio::test]
    async fn guest_access_requires_exact_token() {
        let h = harness().await;
        let conversation = h
            .service
            .start(&SupportActor::guest(Some("secret-token".to_string())))
            .await
            .expect("start");

        let err = h
            .service
            .assert_customer_or_guest_access(&conversation, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(_)));

        let err = h
            .service
            .assert_customer_or_guest_access(&conversation, None, Some("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(_)));

        let err = h
            .service
            .assert_customer_or_guest_access(&conversation, None, Some("secret-token "))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AccessDenied(_)));

        let sender = h
            .service
            .assert_customer_or_guest_access(&conversation, None, Some("secret-token"))
            .await
            .expect("access");
        assert_eq!(sender, Sender::Guest("secret-token".to_string()));
    }

    #[tokio::test]
    async fn customers_and_unclaimed_agents_are_denied() {
        let h = harness().await;
        let conversation = h.service.start(&SupportActor::customer("alice")).await.expect("start");
        let id = conversation.conversation_id.clone();

        let err = h
            .service
            .list_messages(&id, &SupportActor::customer("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AccessDenied(_)));

        let err = h
            .service
            .list_messages(&id, &SupportActor::agent("agent-one"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AccessDenied(_)));

        h.service.claim(&id, "agent-one").await.expect("claim");
        let err = h
            .service
            .send_text(&id, &SupportActor::agent("agent-two"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AccessDenied(_)));

        let reply = h
            .service
            .send_text(&id, &SupportActor::agent("agent-one"), "how can I help?")
            .await
            .expect("reply");
        assert_eq!(reply.sender, Sender::SupportAgent("a-1".to_string()));
    }

    #[tokio::test]
    async fn oversized_upload_persists_nothing() {
        let h = harness().await;
        let actor = SupportActor::customer("alice");
        let conversation = h.service.start(&actor).await.expect("start");
        let id = conversation.conversation_id;
        h.service.send_text(&id, &actor, "before").await.expect("send");

        let err = h
            .service
            .upload_attachment(&id, &actor, upload(1025))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(msg) if msg.starts_with("file too large")));
        assert_eq!(h.store.messages.read().await.len(), 1);
        assert!(h.store.attachments.read().await.is_empty());

        for missing in [None, upload(0)] {
            let err = h
                .service
                .upload_attachment(&id, &actor, missing)
                .await
                .unwrap_err();
            assert!(matches!(err, DomainError::InvalidRequest(msg) if msg == "file is required"));
        }
    }

    #[tokio::test]
    async fn upload_applies_defaults_and_links_message() {
        let h = harness().await;
        let actor = SupportActor::customer("alice");
        let conversation = h.service.start(&actor).await.expect("start");
        let message = h
            .service
            .upload_attachment(&conversation.conversation_id, &actor, upload(1024))
            .await
            .expect("upload");

        let attachment_id = message.body.attachment_id().expect("attachment id");
        let attachment = h.service.get_attachment(attachment_id).await.expect("attachment");
        assert_eq!(attachment.file_name, DEFAULT_ATTACHMENT_FILE_NAME);
        assert_eq!(attachment.content_type, DEFAULT_ATTACHMENT_CONTENT_TYPE);
        assert_eq!(attachment.size, 1024);
        assert_eq!(attachment.uploaded_by, message.sender);
        assert_eq!(message.body.message_type(), "ATTACHMENT");
        assert!(message.body.text().is_none());
    }

    #[tokio::test]
    async fn upload_keeps_only_base_file_name() {
        let h = harness().await;
        let actor = SupportActor::customer("alice");
        let conversation = h.service.start(&actor).await.expect("start");
        let message = h
            .service
            .upload_attachment(
                &conversation.conversation_id,
                &actor,
                Some(AttachmentUpload {
                    file_name: Some("C:\\Users\\alice\\receipt.pdf".to_string()),
                    content_type: Some("application/pdf".to_string()),
                    data: vec![1, 2, 3],
                }),
            )
            .await
            .expect("upload");
        let attachment = h
            .service
            .get_attachment(message.body.attachment_id().expect("id"))
            .await
            .expect("attachment");
        assert_eq!(attachment.file_name, "receipt.pdf");
        assert_eq!(attachment.content_type, "application/pdf");
    }

    #[tokio::test]
    async fn failed_message_append_removes_uploaded_attachment() {
        let h = harness().await;
        let actor = SupportActor::customer("alice");
        let conversation = h.service.start(&actor).await.expect("start");
        h.store.fail_message_append.store(true, Ordering::SeqCst);

        let err = h
            .service
            .upload_attachment(&conversation.conversation_id, &actor, upload(8))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict));
        assert!(h.store.attachments.read().await.is_empty());
        assert!(h.notifier.messages.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn messages_are_listed_in_creation_order() {
        let h = harness().await;
        let actor = SupportActor::customer("alice");
        let conversation = h.service.start(&actor).await.expect("start");
        let id = conversation.conversation_id;
        for idx in 0..6 {
            if idx % 2 == 0 {
                h.service
                    .send_text(&id, &actor, &format!("msg-{idx}"))
                    .await
                    .expect("send");
            } else {
                h.service
                    .upload_attachment(&id, &actor, upload(idx))
                    .await
                    .expect("upload");
            }
        }

        let messages = h.service.list_messages(&id, &actor).await.expect("list");
        assert_eq!(messages.len(), 6);
        assert!(
            messages
                .windows(2)
                .all(|pair| pair[0].created_at_ms <= pair[1].created_at_ms)
        );
    }

    #[tokio::test]
    async fn download_checks_owning_conversation() {
        let h = harness().await;
        let actor = SupportActor::customer("alice");
        let conversation = h.service.start(&actor).await.expect("start");
        let message = h
            .service
            .upload_attachment(&conversation.conversation_id, &actor, upload(4))
            .await
            .expect("upload");
        let attachment_id = message.body.attachment_id().expect("id");

        let attachment = h
            .service
            .download_attachment(attachment_id, &actor)
            .await
            .expect("download");
        assert_eq!(&*attachment.data, &[7, 7, 7, 7]);

        let err = h
            .service
            .download_attachment(attachment_id, &SupportActor::customer("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AccessDenied(_)));

        let err = h
            .service
            .download_attachment("missing", &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound("attachment")));
    }

    #[tokio::test]
    async fn guest_context_is_empty() {
        let h = harness().await;
        let actor = SupportActor::guest(Some("g-1".to_string()));
        let conversation = h.service.start(&actor).await.expect("start");
        let context = h
            .service
            .context(&conversation.conversation_id, &actor)
            .await
            .expect("context");
        assert_eq!(context, SupportContext::empty());
    }

    #[tokio::test]
    async fn customer_context_degrades_failed_sections() {
        let h = harness().await;
        h.store.orders.write().await.push(OrderSummary {
            order_id: "o-1".to_string(),
            user_id: "u-alice".to_string(),
            status: "SHIPPED".to_string(),
            total_cents: 1_250,
            placed_at_ms: 10,
        });
        let actor = SupportActor::customer("alice");
        let conversation = h.service.start(&actor).await.expect("start");

        let context = h
            .service
            .context(&conversation.conversation_id, &actor)
            .await
            .expect("context");
        assert_eq!(
            context.profile.as_ref().map(|profile| profile.user_id.as_str()),
            Some("u-alice")
        );
        assert_eq!(context.orders.len(), 1);
        assert_eq!(context.wishlist_product_ids, vec!["sku-1".to_string()]);

        h.store.fail_profile_lookups.store(true, Ordering::SeqCst);
        h.store.fail_order_lookups.store(true, Ordering::SeqCst);
        let context = h
            .service
            .context(&conversation.conversation_id, &actor)
            .await
            .expect("degraded context");
        assert!(context.profile.is_none());
        assert!(context.orders.is_empty());
        assert!(context.cart.is_some());
    }

    #[tokio::test]
    async fn agent_queue_filters_and_tolerates_directory_failures() {
        let h = harness().await;
        let customer = h.service.start(&SupportActor::customer("alice")).await.expect("c");
        let guest = h.service.start(&SupportActor::guest(None)).await.expect("g");
        h.service
            .claim(&guest.conversation_id, "agent-one")
            .await
            .expect("claim");

        let open = h
            .service
            .agent_queue(Some(ConversationStatus::Open))
            .await
            .expect("queue");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].conversation.conversation_id, customer.conversation_id);
        assert_eq!(open[0].customer_display_name.as_deref(), Some("alice display"));
        assert_eq!(open[0].customer_email.as_deref(), Some("alice@example.test"));

        h.store.fail_profile_lookups.store(true, Ordering::SeqCst);
        let all = h.service.agent_queue(None).await.expect("queue");
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|summary| summary.customer_display_name.is_none()));
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(ConversationStatus::parse("open"), Some(ConversationStatus::Open));
        assert_eq!(ConversationStatus::parse(" CLOSED "), Some(ConversationStatus::Closed));
        assert_eq!(ConversationStatus::parse("pending"), None);
    }

    #[test]
    fn file_name_falls_back_to_default() {
        assert_eq!(normalize_file_name(None), DEFAULT_ATTACHMENT_FILE_NAME);
        assert_eq!(normalize_file_name(Some("  ")), DEFAULT_ATTACHMENT_FILE_NAME);
        assert_eq!(normalize_file_name(Some("dir/")), DEFAULT_ATTACHMENT_FILE_NAME);
        assert_eq!(normalize_file_name(Some("a/b/photo.png")), "photo.png");
    }
}
