//! Bot Framework transport: activity model, connector client, and reply helpers.

pub mod activity;
pub mod cards;
pub mod connector;
pub mod sink;
pub mod streaming;

pub use activity::{
    Activity, ActivityAttachment, ActivityType, CardAction, ChannelAccount, ConversationAccount,
    InboundMessage, SuggestedActions,
};
pub use connector::{ConnectorClient, TurnSink};
pub use sink::{ActivitySink, SinkFuture};
pub use streaming::{StreamingPolicy, StreamingReply};
