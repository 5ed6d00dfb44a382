pub mod account;
pub mod contact;
pub mod conversation;
pub mod knowledge;

pub use account::{AccountContext, AccountIdentity, AccountStatus};
pub use contact::Contact;
pub use conversation::{
    Conversation, Message, MessageDirection, NewMessage, SenderKind, CONVERSATION_OPEN,
};
pub use knowledge::{KnowledgeChunk, KnowledgeMatch, SourceStatus};
