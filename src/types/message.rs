use crate::protocol::replace_emoji;
use serde::{Deserialize, Serialize};

/// Message categories, keyed by the backend's numeric `MsgType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    FriendRequest,
    ContactCard,
    Video,
    Emotion,
    Location,
    Link,
    StatusNotify,
    System,
    Revoke,
    Unknown(i64),
}

impl MessageKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => MessageKind::Text,
            3 => MessageKind::Image,
            34 => MessageKind::Voice,
            37 => MessageKind::FriendRequest,
            42 => MessageKind::ContactCard,
            43 | 62 => MessageKind::Video,
            47 => MessageKind::Emotion,
            48 => MessageKind::Location,
            49 => MessageKind::Link,
            51 => MessageKind::StatusNotify,
            10000 => MessageKind::System,
            10002 => MessageKind::Revoke,
            other => MessageKind::Unknown(other),
        }
    }
}

/// A message entry as it appears in `AddMsgList`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawMessage {
    pub msg_id: String,
    pub from_user_name: String,
    pub to_user_name: String,
    pub msg_type: i64,
    pub content: String,
    pub create_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundMessage {
    pub is_group: bool,
    pub message_id: String,
    pub content: String,
    pub from_id: String,
    pub to_id: String,
    /// Who spoke inside a group chat; `None` for direct messages.
    pub sender_within_group: Option<String>,
    pub kind: MessageKind,
    pub create_time: i64,
}

fn is_group_id(id: &str) -> bool {
    id.starts_with("@@")
}

impl InboundMessage {
    /// Classifies a raw entry. `self_id` is the logged-in user's name, used
    /// as the speaker for messages this account sent to a group.
    pub fn from_raw(raw: RawMessage, self_id: &str) -> Self {
        let kind = MessageKind::from_code(raw.msg_type);
        let content = replace_emoji(&raw.content);

        let (is_group, sender_within_group, content) = if is_group_id(&raw.from_user_name) {
            match content.split_once(":<br/>") {
                Some((sender, body)) if sender.starts_with('@') => {
                    (true, Some(sender.to_string()), body.to_string())
                }
                _ => (true, None, content),
            }
        } else if is_group_id(&raw.to_user_name) {
            let speaker = if raw.from_user_name.is_empty() {
                self_id.to_string()
            } else {
                raw.from_user_name.clone()
            };
            (true, Some(speaker), content)
        } else {
            (false, None, content)
        };

        Self {
            is_group,
            message_id: raw.msg_id,
            content,
            from_id: raw.from_user_name,
            to_id: raw.to_user_name,
            sender_within_group,
            kind,
            create_time: raw.create_time,
        }
    }

    /// The conversation this message belongs to, from this account's view.
    pub fn chat_id(&self, self_id: &str) -> &str {
        if is_group_id(&self.from_id) {
            &self.from_id
        } else if is_group_id(&self.to_id) || self.from_id == self_id {
            &self.to_id
        } else {
            &self.from_id
        }
    }
}
