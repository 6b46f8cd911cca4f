//! The conversation pane: input state, the active conversation's live
//! message list, and the send actions.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{FixedOffset, Offset, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use parley_types::models::{ConversationId, MessageBody, MessageEntry, UserProfile};

use crate::backend::{ChatBackend, Snapshot, Subscription};
use crate::chats::ChatUser;
use crate::error::{ChatError, ValidationError};
use crate::notify::{Notification, Notifier};
use crate::retry::RetryPolicy;
use crate::send::{self, Outgoing, SendReport};
use crate::time::TimeStyle;

/// Order of the displayed message list relative to the stored log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayOrder {
    /// Stored log reversed: the latest message comes first.
    #[default]
    NewestFirst,
    OldestFirst,
}

impl DisplayOrder {
    fn arrange(&self, mut messages: Vec<MessageEntry>) -> Vec<MessageEntry> {
        if *self == Self::NewestFirst {
            messages.reverse();
        }
        messages
    }
}

#[derive(Debug, Clone)]
pub struct ViewConfig {
    pub display_order: DisplayOrder,
    pub time_style: TimeStyle,
    pub retry: RetryPolicy,
    /// Offset message times are shown in.
    pub utc_offset: FixedOffset,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            display_order: DisplayOrder::default(),
            time_style: TimeStyle::default(),
            retry: RetryPolicy::default(),
            utc_offset: Utc.fix(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLine {
    pub id: Uuid,
    pub direction: Direction,
    pub body: MessageBody,
    /// `None` when the author has no avatar; show the default one.
    pub avatar_url: Option<String>,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationScreen {
    pub title: String,
    pub avatar_url: Option<String>,
    /// Empty means "No messages yet."
    pub messages: Vec<MessageLine>,
}

/// What the pane shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    /// No chat selected.
    Welcome,
    Conversation(ConversationScreen),
}

#[derive(Default)]
struct ViewState {
    me: Option<UserProfile>,
    chat_user: Option<ChatUser>,
    conversation_id: Option<ConversationId>,
    /// Bumped on every switch; snapshots from an older feed are dropped.
    generation: u64,
    messages: Vec<MessageEntry>,
    input: String,
}

pub struct ConversationView {
    backend: Arc<dyn ChatBackend>,
    notifier: Arc<dyn Notifier>,
    config: ViewConfig,
    state: Arc<Mutex<ViewState>>,
    feed: Option<JoinHandle<()>>,
}

fn lock(state: &Mutex<ViewState>) -> MutexGuard<'_, ViewState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn avatar(profile: &UserProfile) -> Option<String> {
    (!profile.avatar_url.is_empty()).then(|| profile.avatar_url.clone())
}

impl ConversationView {
    pub fn new(backend: Arc<dyn ChatBackend>, notifier: Arc<dyn Notifier>, config: ViewConfig) -> Self {
        Self {
            backend,
            notifier,
            config,
            state: Arc::new(Mutex::new(ViewState::default())),
            feed: None,
        }
    }

    /// Profile of the signed-in user; messages are sent as this user.
    pub fn set_user(&self, me: UserProfile) {
        lock(&self.state).me = Some(me);
    }

    /// Select a chat: mark it seen and follow its conversation.
    pub async fn open_chat(&mut self, mut chat: ChatUser) -> Result<(), ChatError> {
        let conversation_id = chat.summary.conversation_id;
        if !chat.summary.message_seen {
            match self.backend.mark_chat_seen(conversation_id).await {
                Ok(_) => chat.summary.message_seen = true,
                Err(e) => warn!("could not mark {} seen: {}", conversation_id, e),
            }
        }
        lock(&self.state).chat_user = Some(chat);
        self.set_active_conversation(Some(conversation_id)).await
    }

    pub fn chat_user(&self) -> Option<ChatUser> {
        lock(&self.state).chat_user.clone()
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        lock(&self.state).conversation_id
    }

    /// Follow `conversation_id`, or nothing. The previous subscription is
    /// cancelled first and the displayed messages are cleared.
    pub async fn set_active_conversation(&mut self, conversation_id: Option<ConversationId>) -> Result<(), ChatError> {
        let following = self.feed.as_ref().is_some_and(|feed| !feed.is_finished());
        if conversation_id.is_some() && conversation_id == self.active_conversation() && following {
            return Ok(());
        }

        let generation = self.teardown(conversation_id);
        let Some(conversation_id) = conversation_id else {
            return Ok(());
        };

        let subscription = match self.backend.subscribe(conversation_id).await {
            Ok(sub) => sub,
            Err(e) => return Err(self.report(ChatError::Subscribe(e))),
        };
        debug!("following conversation {} (generation {})", conversation_id, generation);

        let feed = Feed {
            backend: self.backend.clone(),
            notifier: self.notifier.clone(),
            state: self.state.clone(),
            retry: self.config.retry.clone(),
            order: self.config.display_order,
            generation,
            conversation_id,
        };
        self.feed = Some(tokio::spawn(feed.run(subscription)));
        Ok(())
    }

    /// Stop following and drop the current chat. Returns to the welcome screen.
    pub fn close(&mut self) {
        self.teardown(None);
        lock(&self.state).chat_user = None;
    }

    pub fn set_input(&self, text: impl Into<String>) {
        lock(&self.state).input = text.into();
    }

    pub fn input(&self) -> String {
        lock(&self.state).input.clone()
    }

    /// Send the current input as a text message. The input is cleared once
    /// a write was attempted, whether or not it succeeded; a rejected
    /// message leaves it in place.
    pub async fn send_message(&self) -> Result<SendReport, ChatError> {
        let text = self.input();
        let out = match self.outgoing(MessageBody::text(text)) {
            Ok(out) => out,
            Err(e) => return Err(self.report(e.into())),
        };
        if let Err(e) = out.validate() {
            return Err(self.report(e.into()));
        }

        let result = send::send(self.backend.as_ref(), &self.config.retry, out).await;
        lock(&self.state).input.clear();
        result.map_err(|e| self.report(e))
    }

    /// Send an uploaded image. The text input is left alone.
    pub async fn send_image(&self, image_url: &str) -> Result<SendReport, ChatError> {
        let out = self
            .outgoing(MessageBody::image(image_url))
            .map_err(|e| self.report(e.into()))?;
        send::send(self.backend.as_ref(), &self.config.retry, out)
            .await
            .map_err(|e| self.report(e))
    }

    /// Messages in display order.
    pub fn messages(&self) -> Vec<MessageEntry> {
        lock(&self.state).messages.clone()
    }

    pub fn render(&self) -> Screen {
        let state = lock(&self.state);
        let Some(chat) = &state.chat_user else {
            return Screen::Welcome;
        };
        let my_id = state.me.as_ref().map(|me| me.id);
        let my_avatar = state.me.as_ref().and_then(avatar);
        let their_avatar = avatar(&chat.profile);

        let messages = state
            .messages
            .iter()
            .map(|m| {
                let direction = if Some(m.sender_id) == my_id {
                    Direction::Sent
                } else {
                    Direction::Received
                };
                let avatar_url = match direction {
                    Direction::Sent => my_avatar.clone(),
                    Direction::Received => their_avatar.clone(),
                };
                let local = m.created_at.with_timezone(&self.config.utc_offset);
                MessageLine {
                    id: m.id,
                    direction,
                    body: m.body.clone(),
                    avatar_url,
                    time: self.config.time_style.format(Some(&local)),
                }
            })
            .collect();

        let title = if chat.profile.name.is_empty() {
            chat.profile.username.clone()
        } else {
            chat.profile.name.clone()
        };
        Screen::Conversation(ConversationScreen {
            title,
            avatar_url: their_avatar,
            messages,
        })
    }

    fn outgoing(&self, body: MessageBody) -> Result<Outgoing, ValidationError> {
        let state = lock(&self.state);
        let Some(me) = &state.me else {
            return Err(ValidationError::NotSignedIn);
        };
        Ok(Outgoing {
            sender_id: me.id,
            conversation_id: state.conversation_id,
            participant_ids: vec![state.chat_user.as_ref().map(|c| c.summary.r_id), Some(me.id)],
            body,
        })
    }

    /// Cancel the running feed and start a new generation.
    fn teardown(&mut self, next: Option<ConversationId>) -> u64 {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
        let mut state = lock(&self.state);
        state.generation += 1;
        state.conversation_id = next;
        state.messages.clear();
        state.generation
    }

    fn report(&self, err: ChatError) -> ChatError {
        error!("{}", err);
        self.notifier.notify(Notification::error(err.to_string()));
        err
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
    }
}

/// Background task applying one subscription's snapshots to the view.
/// A feed that ends while still active is re-established under the retry
/// policy; if that fails the user is notified and the task stops.
struct Feed {
    backend: Arc<dyn ChatBackend>,
    notifier: Arc<dyn Notifier>,
    state: Arc<Mutex<ViewState>>,
    retry: RetryPolicy,
    order: DisplayOrder,
    generation: u64,
    conversation_id: ConversationId,
}

impl Feed {
    async fn run(self, mut subscription: Subscription) {
        loop {
            while let Some(snapshot) = subscription.next().await {
                if !apply(&self.state, self.generation, self.order, snapshot) {
                    return;
                }
            }
            if !self.is_current() {
                return;
            }

            warn!("feed for {} ended, resubscribing", self.conversation_id);
            tokio::time::sleep(self.retry.backoff(1)).await;
            let backend = self.backend.as_ref();
            let conversation_id = self.conversation_id;
            match self
                .retry
                .run("resubscribe", move || backend.subscribe(conversation_id))
                .await
            {
                Ok(next) => subscription = next,
                Err(e) => {
                    if self.is_current() {
                        let err = ChatError::Subscribe(e);
                        error!("{}", err);
                        self.notifier.notify(Notification::error(err.to_string()));
                    }
                    return;
                }
            }
        }
    }

    fn is_current(&self) -> bool {
        let state = lock(&self.state);
        state.generation == self.generation && state.conversation_id == Some(self.conversation_id)
    }
}

/// Store a snapshot if its feed is still the active one. Returns false
/// once the feed is stale.
fn apply(state: &Mutex<ViewState>, generation: u64, order: DisplayOrder, snapshot: Snapshot) -> bool {
    let mut state = lock(state);
    if state.generation != generation || state.conversation_id != Some(snapshot.conversation_id) {
        debug!("dropping stale snapshot of {}", snapshot.conversation_id);
        return false;
    }
    state.messages = order.arrange(snapshot.messages);
    true
}
