//! 记忆层：有界对话历史与按会话隔离的存储

pub mod conversation;
pub mod session;

pub use conversation::{ConversationMemory, Message, Role};
pub use session::SessionStore;
