use serde::Serialize;

use crate::support::{
    Conversation, ConversationStatus, ConversationSummary, Sender, SupportMessage,
};

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ConversationView {
    pub conversation_id: String,
    pub customer_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_token: Option<String>,
    pub claimed_by_agent_id: Option<String>,
    pub status: ConversationStatus,
    pub created_at_ms: i64,
    pub last_message_at_ms: i64,
}

impl ConversationView {
    /// Owner-facing view; carries the guest token so a guest can resume.
    pub fn for_owner(conversation: &Conversation) -> Self {
        Self {
            guest_token: conversation.guest_token().map(str::to_string),
            ..Self::for_agent(conversation)
        }
    }

    pub fn for_agent(conversation: &Conversation) -> Self {
        Self {
            conversation_id: conversation.conversation_id.clone(),
            customer_user_id: conversation.customer_user_id().map(str::to_string),
            guest_token: None,
            claimed_by_agent_id: conversation.claimed_by_agent_id.clone(),
            status: conversation.status,
            created_at_ms: conversation.created_at_ms,
            last_message_at_ms: conversation.last_message_at_ms,
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ConversationSummaryView {
    #[serde(flatten)]
    pub conversation: ConversationView,
    pub is_guest: bool,
    pub customer_display_name: Option<String>,
    pub customer_email: Option<String>,
}

impl From<&ConversationSummary> for ConversationSummaryView {
    fn from(summary: &ConversationSummary) -> Self {
        Self {
            conversation: ConversationView::for_agent(&summary.conversation),
            is_guest: summary.conversation.guest_token().is_some(),
            customer_display_name: summary.customer_display_name.clone(),
            customer_email: summary.customer_email.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MessageView {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_type: &'static str,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub text: Option<String>,
    pub attachment_id: Option<String>,
    pub created_at_ms: i64,
}

impl From<&SupportMessage> for MessageView {
    fn from(message: &SupportMessage) -> Self {
        Self {
            message_id: message.message_id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender_type: message.sender.sender_type(),
            sender_id: public_sender_id(message),
            message_type: message.body.message_type(),
            text: message.body.text().map(str::to_string),
            attachment_id: message.body.attachment_id().map(str::to_string),
            created_at_ms: message.created_at_ms,
        }
    }
}

/// Guest tokens are credentials, so guest senders are named after their
/// conversation instead.
fn public_sender_id(message: &SupportMessage) -> String {
    match &message.sender {
        Sender::Guest(_) => format!("guest:{}", message.conversation_id),
        sender => sender.sender_id().to_string(),
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct StatusView {
    pub conversation_id: String,
    pub status: ConversationStatus,
    pub claimed_by_agent_id: Option<String>,
}

impl From<&Conversation> for StatusView {
    fn from(conversation: &Conversation) -> Self {
        Self {
            conversation_id: conversation.conversation_id.clone(),
            status: conversation.status,
            claimed_by_agent_id: conversation.claimed_by_agent_id.clone(),
        }
    }
}
