//! Chat client for a `parley` backend.
//!
//! [`ConversationView`] follows one conversation and sends messages into
//! it, [`Auth`] covers signup, login and logout, and [`chats`] lists and
//! starts conversations. All of them talk to a [`ChatBackend`], either
//! in-process ([`LocalBackend`]) or over the network ([`RemoteBackend`]).

pub mod auth;
pub mod backend;
pub mod chats;
pub mod config;
pub mod error;
pub mod notify;
pub mod retry;
pub mod send;
pub mod time;
pub mod view;

pub use auth::Auth;
pub use backend::{ChatBackend, LocalBackend, RemoteBackend, Session, Snapshot, Subscription};
pub use chats::ChatUser;
pub use config::ClientConfig;
pub use error::{AuthError, BackendError, ChatError, ValidationError};
pub use notify::{LogNotifier, Notification, Notifier, ToastQueue};
pub use retry::RetryPolicy;
pub use send::{Outgoing, SendReport};
pub use time::TimeStyle;
pub use view::{ConversationView, DisplayOrder, Screen, ViewConfig};
