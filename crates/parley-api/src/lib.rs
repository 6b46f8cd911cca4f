pub mod auth;
pub mod chats;
pub mod conversations;
pub mod error;
pub mod middleware;
pub mod state;
pub mod users;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parley_gateway::connection;

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// All REST routes plus the `/gateway` WebSocket upgrade.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/users", get(users::find_user))
        .route(
            "/users/{user_id}",
            get(users::get_user).put(users::put_user).patch(users::patch_user),
        )
        .route("/users/{user_id}/last-seen", post(users::touch_last_seen))
        .route(
            "/chats/{user_id}",
            get(chats::get_chat_list).put(chats::put_chat_list),
        )
        .route("/chats/{user_id}/summaries", post(chats::add_summary))
        .route(
            "/chats/{user_id}/summaries/{conversation_id}",
            patch(chats::update_summary),
        )
        .route(
            "/chats/{user_id}/summaries/{conversation_id}/seen",
            post(chats::mark_seen),
        )
        .route("/conversations", post(conversations::create_conversation))
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            post(conversations::append_message),
        )
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
