use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use parley_types::api::{
    AuthResponse, CreateConversationRequest, LoginRequest, SignupRequest, SummaryMatch,
};
use parley_types::errors::{self, ErrorBody};
use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::{
    ChatListDocument, ChatSummary, ConversationDocument, ConversationId, MessageEntry,
    ProfilePatch, SummaryUpdate, UserId, UserProfile,
};

use super::{ChatBackend, LiveDocument, SNAPSHOT_BUFFER, Session, Subscription};
use crate::config::ClientConfig;
use crate::error::{AuthError, BackendError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long the gateway handshake (Ready, then Subscribed) may take.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a running `parley` server: REST for documents, one gateway
/// socket per live subscription.
pub struct RemoteBackend {
    http: reqwest::Client,
    config: ClientConfig,
    session: RwLock<Option<Session>>,
}

impl RemoteBackend {
    pub fn new(config: ClientConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            session: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server_url.trim_end_matches('/'), path)
    }

    fn token(&self) -> Result<String, BackendError> {
        self.current_session()
            .map(|s| s.token)
            .ok_or_else(|| AuthError::new(errors::NO_CURRENT_USER).into())
    }

    fn actor(&self) -> Result<UserId, BackendError> {
        self.current_session()
            .map(|s| s.user_id)
            .ok_or_else(|| AuthError::new(errors::NO_CURRENT_USER).into())
    }

    fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder, BackendError> {
        Ok(self
            .http
            .request(method, self.url(path))
            .bearer_auth(self.token()?))
    }

    fn set_session(&self, session: Option<Session>) {
        if let Ok(mut slot) = self.session.write() {
            *slot = session;
        }
    }

    async fn authenticate(&self, path: &str, body: &impl Serialize) -> Result<Session, BackendError> {
        let res: AuthResponse = json(
            self.http.post(self.url(path)).json(body).send().await?,
        )
        .await?;
        let session = Session {
            user_id: res.user_id,
            session_id: res.session_id,
            token: res.token,
        };
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    /// Open a gateway socket and wait for `Ready`.
    async fn open_gateway(&self) -> Result<Socket, BackendError> {
        let token = self.token()?;
        let (mut socket, _) = connect_async(self.config.gateway_url()).await?;
        send_command(&mut socket, &GatewayCommand::Identify { token }).await?;

        tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            loop {
                match next_event(&mut socket).await? {
                    GatewayEvent::Ready { user_id } => {
                        debug!("gateway ready for {}", user_id);
                        return Ok::<(), BackendError>(());
                    }
                    other => debug!("ignoring {:?} before Ready", other),
                }
            }
        })
        .await
        .map_err(|_| BackendError::Unavailable("gateway handshake timed out".into()))??;

        Ok(socket)
    }
}

/// Decode a JSON success body, or map the error body.
async fn json<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, BackendError> {
    let res = check(res).await?;
    Ok(res.json().await?)
}

async fn check(res: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.json::<ErrorBody>().await.ok();
    Err(BackendError::from_response(status, body))
}

fn rejection(code: String) -> BackendError {
    match code.as_str() {
        errors::NOT_FOUND => BackendError::NotFound("conversation".into()),
        errors::PERMISSION_DENIED => BackendError::PermissionDenied,
        _ => BackendError::Internal(code),
    }
}

/// Turn a 404 into `None`.
fn optional<T>(result: Result<T, BackendError>) -> Result<Option<T>, BackendError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(BackendError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn send_command(socket: &mut Socket, cmd: &GatewayCommand) -> Result<(), BackendError> {
    let text = serde_json::to_string(cmd).map_err(|e| BackendError::Internal(e.to_string()))?;
    socket.send(Message::text(text)).await?;
    Ok(())
}

/// Next decodable event; pings are answered by the socket itself.
async fn next_event(socket: &mut Socket) -> Result<GatewayEvent, BackendError> {
    while let Some(msg) = socket.next().await {
        match msg? {
            Message::Text(text) => match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                Ok(event) => return Ok(event),
                Err(e) => warn!("undecodable gateway event: {}", e),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(BackendError::Unavailable("gateway closed".into()))
}

#[async_trait]
impl ChatBackend for RemoteBackend {
    async fn create_user(&self, email: &str, password: &str) -> Result<UserId, BackendError> {
        let req = SignupRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        Ok(self.authenticate("/auth/signup", &req).await?.user_id)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let req = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.authenticate("/auth/login", &req).await
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        check(self.authed(Method::POST, "/auth/logout")?.send().await?).await?;
        self.set_session(None);
        Ok(())
    }

    fn current_session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    async fn put_profile(&self, profile: &UserProfile) -> Result<(), BackendError> {
        let path = format!("/users/{}", profile.id);
        check(self.authed(Method::PUT, &path)?.json(profile).send().await?).await?;
        Ok(())
    }

    async fn get_profile(&self, id: UserId) -> Result<Option<UserProfile>, BackendError> {
        let path = format!("/users/{}", id);
        optional(json(self.authed(Method::GET, &path)?.send().await?).await)
    }

    async fn find_profile_by_username(&self, username: &str) -> Result<Option<UserProfile>, BackendError> {
        let req = self
            .authed(Method::GET, "/users")?
            .query(&[("username", username)]);
        optional(json(req.send().await?).await)
    }

    async fn update_profile(&self, patch: &ProfilePatch) -> Result<UserProfile, BackendError> {
        let path = format!("/users/{}", self.actor()?);
        json(self.authed(Method::PATCH, &path)?.json(patch).send().await?).await
    }

    async fn touch_last_seen(&self) -> Result<(), BackendError> {
        let path = format!("/users/{}/last-seen", self.actor()?);
        check(self.authed(Method::POST, &path)?.send().await?).await?;
        Ok(())
    }

    async fn put_chat_list(&self, list: &ChatListDocument) -> Result<(), BackendError> {
        let path = format!("/chats/{}", list.user_id);
        check(self.authed(Method::PUT, &path)?.json(list).send().await?).await?;
        Ok(())
    }

    async fn get_chat_list(&self, user_id: UserId) -> Result<Option<ChatListDocument>, BackendError> {
        let path = format!("/chats/{}", user_id);
        optional(json(self.authed(Method::GET, &path)?.send().await?).await)
    }

    async fn add_chat_summary(&self, owner: UserId, summary: &ChatSummary) -> Result<bool, BackendError> {
        let path = format!("/chats/{}/summaries", owner);
        let res: SummaryMatch = json(self.authed(Method::POST, &path)?.json(summary).send().await?).await?;
        Ok(res.matched)
    }

    async fn update_chat_summary(
        &self,
        owner: UserId,
        conversation_id: ConversationId,
        update: &SummaryUpdate,
    ) -> Result<bool, BackendError> {
        let path = format!("/chats/{}/summaries/{}", owner, conversation_id);
        let res: SummaryMatch = json(self.authed(Method::PATCH, &path)?.json(update).send().await?).await?;
        Ok(res.matched)
    }

    async fn mark_chat_seen(&self, conversation_id: ConversationId) -> Result<bool, BackendError> {
        let path = format!("/chats/{}/summaries/{}/seen", self.actor()?, conversation_id);
        let res: SummaryMatch = json(self.authed(Method::POST, &path)?.send().await?).await?;
        Ok(res.matched)
    }

    async fn create_conversation(&self, counterparty: UserId) -> Result<ConversationDocument, BackendError> {
        let req = CreateConversationRequest {
            counterparty_id: counterparty,
        };
        json(self.authed(Method::POST, "/conversations")?.json(&req).send().await?).await
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<ConversationDocument>, BackendError> {
        let path = format!("/conversations/{}", id);
        optional(json(self.authed(Method::GET, &path)?.send().await?).await)
    }

    async fn append_message(&self, conversation_id: ConversationId, entry: &MessageEntry) -> Result<(), BackendError> {
        let path = format!("/conversations/{}/messages", conversation_id);
        let res = check(self.authed(Method::POST, &path)?.json(entry).send().await?).await?;
        if res.status() == StatusCode::OK {
            debug!("message {} was already stored", entry.id);
        }
        Ok(())
    }

    async fn subscribe(&self, conversation_id: ConversationId) -> Result<Subscription, BackendError> {
        let mut socket = self.open_gateway().await?;
        send_command(&mut socket, &GatewayCommand::Subscribe { conversation_id }).await?;

        // Appends may overtake the acknowledgement; keep them for the snapshot.
        let mut early = Vec::new();
        tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            loop {
                match next_event(&mut socket).await? {
                    GatewayEvent::Subscribed { conversation_id: cid } if cid == conversation_id => {
                        return Ok::<(), BackendError>(());
                    }
                    GatewayEvent::SubscriptionRejected {
                        conversation_id: cid,
                        code,
                    } if cid == conversation_id => {
                        return Err(rejection(code));
                    }
                    GatewayEvent::MessageAppended {
                        conversation_id: cid,
                        entry,
                    } if cid == conversation_id => early.push(entry),
                    _ => {}
                }
            }
        })
        .await
        .map_err(|_| BackendError::Unavailable("subscription not acknowledged".into()))??;

        let initial = self.get_conversation(conversation_id).await?;
        info!("subscribed to conversation {}", conversation_id);

        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let task = tokio::spawn(async move {
            let messages = initial.map(|doc| doc.messages).unwrap_or_default();
            let mut live = LiveDocument::new(conversation_id, messages);
            for entry in early {
                live.apply(entry);
            }
            if tx.send(live.snapshot()).await.is_err() {
                return;
            }

            loop {
                match next_event(&mut socket).await {
                    Ok(GatewayEvent::MessageAppended {
                        conversation_id: cid,
                        entry,
                    }) if cid == conversation_id => {
                        if live.apply(entry) && tx.send(live.snapshot()).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("subscription to {} ended: {}", conversation_id, e);
                        break;
                    }
                }
            }
            let _ = socket.close(None).await;
        });

        Ok(Subscription::new(conversation_id, rx, task))
    }
}
