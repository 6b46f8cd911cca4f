pub mod api;
pub mod errors;
pub mod events;
pub mod models;

pub use models::{ConversationId, UserId};
