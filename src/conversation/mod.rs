//! Conversation state: turns, bounded history, sessions, and their storage.

pub mod session;
pub mod store;
pub mod turn;

pub use session::{Attachment, ConversationSession, conversation_key};
pub use store::{ConversationStore, MemoryConversationStore, SqliteConversationStore, StoreFuture};
pub use turn::{ConversationHistory, ConversationTurn, TurnRole};
