use std::fmt;

use serde::Serialize;

use crate::views::{MessageView, StatusView};

const TOPIC_PREFIX: &str = "support/";
const STATUS_SUFFIX: &str = "/status";

pub fn message_topic(conversation_id: &str) -> String {
    format!("{TOPIC_PREFIX}{conversation_id}")
}

pub fn status_topic(conversation_id: &str) -> String {
    format!("{TOPIC_PREFIX}{conversation_id}{STATUS_SUFFIX}")
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Messages(String),
    Status(String),
}

impl Topic {
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix(TOPIC_PREFIX)?;
        let (conversation_id, is_status) = match rest.strip_suffix(STATUS_SUFFIX) {
            Some(conversation_id) => (conversation_id, true),
            None => (rest, false),
        };
        if conversation_id.is_empty() || conversation_id.contains('/') {
            return None;
        }
        let conversation_id = conversation_id.to_string();
        Some(if is_status {
            Self::Status(conversation_id)
        } else {
            Self::Messages(conversation_id)
        })
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            Self::Messages(id) | Self::Status(id) => id,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Messages(id) => f.write_str(&message_topic(id)),
            Self::Status(id) => f.write_str(&status_topic(id)),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupportEvent {
    Message(MessageView),
    Status(StatusView),
}

impl SupportEvent {
    pub fn topic(&self) -> String {
        match self {
            Self::Message(message) => message_topic(&message.conversation_id),
            Self::Status(status) => status_topic(&status.conversation_id),
        }
    }
}
