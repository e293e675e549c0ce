//! Bot Framework activity model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::session::{Attachment, conversation_key};

/// Activity type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    /// User or bot message.
    #[default]
    Message,
    /// Typing indicator, also used for streaming updates.
    Typing,
    /// Members joined or left.
    ConversationUpdate,
    /// Synchronous invoke (sign-in verification and similar).
    Invoke,
    /// Named event.
    Event,
    /// Any other activity type.
    #[serde(other)]
    Other,
}

/// A user or bot identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    /// Channel-specific id.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Conversation reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    /// Conversation id.
    pub id: String,
    /// Tenant, for Teams conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// File or card attached to an activity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityAttachment {
    /// MIME type, or a card content type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Download URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    /// Inline content (cards).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// File name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Clickable action on a card or suggestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAction {
    /// Action type, e.g. `imBack` or `signin`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Button caption.
    pub title: String,
    /// Value sent back or URL opened.
    pub value: String,
}

/// Quick replies shown under a message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedActions {
    /// Offered actions.
    pub actions: Vec<CardAction>,
}

/// A Bot Framework activity, inbound or outbound.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Activity type.
    #[serde(rename = "type")]
    pub kind: ActivityType,
    /// Activity id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base URL of the channel connector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    /// Channel name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    /// Receiver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    /// Conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    /// Activity this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    /// Members added (conversation updates).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_added: Vec<ChannelAccount>,
    /// Files and cards.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<ActivityAttachment>,
    /// Entities such as `streaminfo`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Value>,
    /// Quick replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_actions: Option<SuggestedActions>,
    /// Channel-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Value>,
    /// Event or invoke name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Event or invoke payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Activity {
    /// Plain text message.
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            kind: ActivityType::Message,
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Typing indicator.
    #[must_use]
    pub fn typing() -> Self {
        Self {
            kind: ActivityType::Typing,
            ..Self::default()
        }
    }

    /// Attach a card or file.
    #[must_use]
    pub fn with_attachment(mut self, attachment: ActivityAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Address this activity as a reply to `inbound`.
    #[must_use]
    pub fn reply_to(mut self, inbound: &Self) -> Self {
        self.service_url.clone_from(&inbound.service_url);
        self.channel_id.clone_from(&inbound.channel_id);
        self.conversation.clone_from(&inbound.conversation);
        self.from.clone_from(&inbound.recipient);
        self.recipient.clone_from(&inbound.from);
        self.reply_to_id.clone_from(&inbound.id);
        self
    }

    /// Conversation state key, when channel and conversation are known.
    #[must_use]
    pub fn conversation_key(&self) -> Option<String> {
        let channel = self.channel_id.as_deref()?;
        let conversation = self.conversation.as_ref()?;
        Some(conversation_key(channel, &conversation.id))
    }

    /// Members added other than the bot itself.
    pub fn members_joined(&self) -> impl Iterator<Item = &ChannelAccount> {
        let bot_id = self.recipient.as_ref().map(|r| r.id.as_str());
        self.members_added
            .iter()
            .filter(move |member| Some(member.id.as_str()) != bot_id)
    }
}

/// Normalised inbound user message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Trimmed text, empty when the message only carried files.
    pub text: String,
    /// Downloadable files.
    pub attachments: Vec<Attachment>,
    /// Sender id.
    pub sender_id: String,
    /// Channel name.
    pub channel_id: String,
    /// Conversation state key.
    pub conversation_key: String,
}

impl InboundMessage {
    /// Extract a message from an activity. Returns `None` for non-message
    /// activities or when the conversation cannot be identified.
    #[must_use]
    pub fn from_activity(activity: &Activity) -> Option<Self> {
        if activity.kind != ActivityType::Message {
            return None;
        }
        let conversation_key = activity.conversation_key()?;
        let attachments = activity
            .attachments
            .iter()
            .filter_map(|a| {
                let url = a.content_url.as_deref()?;
                Some(Attachment::new(url, a.name.as_deref(), a.content_type.as_deref()))
            })
            .collect();
        Some(Self {
            text: activity.text.as_deref().unwrap_or_default().trim().to_string(),
            attachments,
            sender_id: activity
                .from
                .as_ref()
                .map(|f| f.id.clone())
                .unwrap_or_default(),
            channel_id: activity.channel_id.clone().unwrap_or_default(),
            conversation_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn inbound() -> Activity {
        serde_json::from_value(json!({
            "type": "message",
            "id": "act-1",
            "text": "  hello  ",
            "serviceUrl": "https://smba.example.com/",
            "channelId": "msteams",
            "from": {"id": "user-1", "name": "Ada"},
            "recipient": {"id": "bot-1"},
            "conversation": {"id": "conv-1"},
            "attachments": [
                {"contentType": "image/png", "contentUrl": "https://files/cat.png", "name": "cat.png"},
                {"contentType": "text/html"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_inbound_message_normalisation() {
        let message = InboundMessage::from_activity(&inbound()).unwrap();
        assert_eq!(message.text, "hello");
        assert_eq!(message.sender_id, "user-1");
        assert_eq!(message.conversation_key, "msteams/conversations/conv-1");
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].name, "cat.png");
    }

    #[test]
    fn test_reply_addressing() {
        let reply = Activity::message("hi").reply_to(&inbound());
        assert_eq!(reply.from.map(|f| f.id).as_deref(), Some("bot-1"));
        assert_eq!(reply.recipient.map(|r| r.id).as_deref(), Some("user-1"));
        assert_eq!(reply.reply_to_id.as_deref(), Some("act-1"));

        let value = serde_json::to_value(Activity::typing()).unwrap();
        assert_eq!(value, json!({"type": "typing"}));
    }

    #[test]
    fn test_unknown_type_and_members() {
        let activity: Activity = serde_json::from_value(json!({
            "type": "conversationUpdate",
            "recipient": {"id": "bot"},
            "membersAdded": [{"id": "bot"}, {"id": "user"}]
        }))
        .unwrap();
        let joined: Vec<&str> = activity.members_joined().map(|m| m.id.as_str()).collect();
        assert_eq!(joined, vec!["user"]);

        let other: Activity = serde_json::from_value(json!({"type": "messageReaction"})).unwrap();
        assert_eq!(other.kind, ActivityType::Other);
    }
}
