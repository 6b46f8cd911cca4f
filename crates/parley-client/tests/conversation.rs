mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;

use parley_client::chats::{load_chat_users, start_conversation};
use parley_client::send::{Outgoing, send};
use parley_client::view::Direction;
use parley_client::{
    BackendError, ChatBackend, ChatError, ChatUser, Notification, RetryPolicy, Screen, ValidationError,
};
use parley_types::models::{ChatSummary, MessageBody, MessageEntry, UserId};

use common::{Faulty, Peer, eventually, shared_state};

async fn summary_of(peer: &Peer, counterparty: UserId) -> ChatSummary {
    let list = peer
        .backend
        .get_chat_list(peer.profile.id)
        .await
        .unwrap()
        .unwrap();
    list.chats_data
        .into_iter()
        .find(|c| c.r_id == counterparty)
        .unwrap()
}

async fn chat_with(from: &Peer, to: &Peer) -> ChatUser {
    start_conversation(from.backend.as_ref(), &to.profile).await.unwrap()
}

#[tokio::test]
async fn send_appends_one_entry_and_syncs_both_summaries() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;
    let chat = chat_with(&ann, &bob).await;
    let cid = chat.summary.conversation_id;

    let mut view = ann.view();
    view.open_chat(chat).await.unwrap();
    view.set_input("hello bob");
    let before = Utc::now();
    let report = view.send_message().await.unwrap();

    let doc = ann.backend.get_conversation(cid).await.unwrap().unwrap();
    assert_eq!(doc.messages.len(), 1);
    let stored = &doc.messages[0];
    assert_eq!(stored.body.as_text(), Some("hello bob"));
    assert_eq!(stored.sender_id, ann.profile.id);
    assert!(stored.created_at >= before && stored.created_at <= Utc::now());
    assert_eq!(stored.id, report.entry.id);

    let anns = summary_of(&ann, bob.profile.id).await;
    let bobs = summary_of(&bob, ann.profile.id).await;
    assert_eq!(anns.last_message, "hello bob");
    assert_eq!(anns.last_message, bobs.last_message);
    assert_eq!(anns.updated_at, bobs.updated_at);
    assert!(anns.message_seen);
    assert!(!bobs.message_seen);

    assert_eq!(view.input(), "");
    assert!(ann.toasts.drain().is_empty());
}

#[tokio::test]
async fn blank_input_is_rejected_without_write() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;
    let chat = chat_with(&ann, &bob).await;
    let cid = chat.summary.conversation_id;

    let mut view = ann.view();
    view.open_chat(chat).await.unwrap();
    view.set_input("   \n\t");
    let err = view.send_message().await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(ValidationError::EmptyMessage)));

    let doc = ann.backend.get_conversation(cid).await.unwrap().unwrap();
    assert!(doc.messages.is_empty());
    assert_eq!(view.input(), "   \n\t");
    assert_eq!(ann.toasts.drain(), vec![Notification::error("Message is empty")]);
}

#[tokio::test]
async fn sending_without_a_selected_chat_fails() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;
    let chat = chat_with(&ann, &bob).await;

    let view = ann.view();
    view.set_input("hello?");
    let err = view.send_message().await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(ValidationError::NoActiveConversation)));
    assert_eq!(ann.toasts.drain(), vec![Notification::error("Chat not selected!")]);

    let err = view.send_image("https://cdn.example.com/a.png").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(ValidationError::MissingImage)));

    let doc = ann
        .backend
        .get_conversation(chat.summary.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert!(doc.messages.is_empty());
    assert_eq!(summary_of(&ann, bob.profile.id).await.last_message, "");
}

#[tokio::test]
async fn image_preview_ignores_the_file_name() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;

    let mut view = ann.view();
    view.open_chat(chat_with(&ann, &bob).await).await.unwrap();
    view.set_input("draft");
    view.send_image("https://cdn.example.com/uploads/holiday-photo-2024-final-v2.jpeg")
        .await
        .unwrap();

    assert_eq!(summary_of(&ann, bob.profile.id).await.last_message, "Image");
    assert_eq!(summary_of(&bob, ann.profile.id).await.last_message, "Image");
    assert_eq!(view.input(), "draft");
}

#[tokio::test]
async fn preview_keeps_the_first_thirty_characters() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;

    let mut view = ann.view();
    view.open_chat(chat_with(&ann, &bob).await).await.unwrap();
    let text = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFGHI";
    assert_eq!(text.chars().count(), 45);
    view.set_input(text);
    view.send_message().await.unwrap();

    let preview = summary_of(&bob, ann.profile.id).await.last_message;
    assert_eq!(preview.chars().count(), 30);
    assert!(text.starts_with(&preview));
}

#[tokio::test]
async fn live_messages_are_shown_newest_first() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;
    let chat = chat_with(&ann, &bob).await;
    let cid = chat.summary.conversation_id;

    let mut view = ann.view();
    view.open_chat(chat).await.unwrap();
    for text in ["first", "second"] {
        let entry = MessageEntry::new(bob.profile.id, MessageBody::text(text), Utc::now());
        bob.backend.append_message(cid, &entry).await.unwrap();
    }

    assert!(eventually(|| view.messages().len() == 2).await);
    let texts: Vec<_> = view
        .messages()
        .iter()
        .map(|m| m.body.as_text().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["second", "first"]);
}

#[tokio::test]
async fn switching_chats_ignores_the_old_conversation() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;
    let carol = Peer::signup(&state, "carol").await;
    let with_bob = chat_with(&ann, &bob).await;
    let with_carol = chat_with(&ann, &carol).await;
    let bob_cid = with_bob.summary.conversation_id;
    let carol_cid = with_carol.summary.conversation_id;

    let mut view = ann.view();
    view.open_chat(with_bob).await.unwrap();
    view.open_chat(with_carol).await.unwrap();
    assert_eq!(view.active_conversation(), Some(carol_cid));

    let late = MessageEntry::new(bob.profile.id, MessageBody::text("too late"), Utc::now());
    bob.backend.append_message(bob_cid, &late).await.unwrap();
    let hello = MessageEntry::new(carol.profile.id, MessageBody::text("hi ann"), Utc::now());
    carol.backend.append_message(carol_cid, &hello).await.unwrap();

    assert!(eventually(|| view.messages().len() == 1).await);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let messages = view.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, hello.id);
}

#[tokio::test]
async fn opening_a_chat_marks_it_seen() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;

    let mut anns_view = ann.view();
    anns_view.open_chat(chat_with(&ann, &bob).await).await.unwrap();
    anns_view.set_input("ping");
    anns_view.send_message().await.unwrap();
    assert!(!summary_of(&bob, ann.profile.id).await.message_seen);

    let bobs_chat = load_chat_users(bob.backend.as_ref()).await.unwrap().remove(0);
    assert!(!bobs_chat.summary.message_seen);
    let mut bobs_view = bob.view();
    bobs_view.open_chat(bobs_chat).await.unwrap();
    assert!(summary_of(&bob, ann.profile.id).await.message_seen);
    assert!(bobs_view.chat_user().unwrap().summary.message_seen);
}

#[tokio::test]
async fn render_tags_direction_and_falls_back_to_welcome() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;

    let mut view = ann.view();
    assert_eq!(view.render(), Screen::Welcome);

    let chat = chat_with(&ann, &bob).await;
    let cid = chat.summary.conversation_id;
    view.open_chat(chat).await.unwrap();
    view.set_input("from ann");
    view.send_message().await.unwrap();
    let reply = MessageEntry::new(bob.profile.id, MessageBody::text("from bob"), Utc::now());
    bob.backend.append_message(cid, &reply).await.unwrap();
    assert!(eventually(|| view.messages().len() == 2).await);

    let Screen::Conversation(screen) = view.render() else {
        panic!("expected a conversation");
    };
    assert_eq!(screen.title, "bob");
    assert_eq!(screen.messages[0].direction, Direction::Received);
    assert_eq!(screen.messages[1].direction, Direction::Sent);
    assert!(screen.messages.iter().all(|m| m.time.ends_with("AM") || m.time.ends_with("PM")));

    view.close();
    assert_eq!(view.render(), Screen::Welcome);
    assert_eq!(view.active_conversation(), None);
}

#[tokio::test]
async fn repeated_append_is_stored_once() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;
    let cid = chat_with(&ann, &bob).await.summary.conversation_id;

    let entry = MessageEntry::new(ann.profile.id, MessageBody::text("once"), Utc::now());
    ann.backend.append_message(cid, &entry).await.unwrap();
    ann.backend.append_message(cid, &entry).await.unwrap();

    let doc = ann.backend.get_conversation(cid).await.unwrap().unwrap();
    assert_eq!(doc.messages, vec![entry]);
}

fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

#[tokio::test]
async fn failed_append_is_notified_and_clears_the_input() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;
    let chat = chat_with(&ann, &bob).await;
    let cid = chat.summary.conversation_id;

    let mut view = ann.view_over(Arc::new(Faulty::new(ann.backend.clone()).denying_appends()));
    view.open_chat(chat).await.unwrap();
    view.set_input("never stored");
    let err = view.send_message().await.unwrap_err();

    assert!(matches!(err, ChatError::Write(BackendError::PermissionDenied)));
    assert!(!err.message_was_sent());
    assert_eq!(ann.toasts.drain(), vec![Notification::error("permission denied")]);
    assert_eq!(view.input(), "");

    let doc = ann.backend.get_conversation(cid).await.unwrap().unwrap();
    assert!(doc.messages.is_empty());
    assert_eq!(summary_of(&bob, ann.profile.id).await.last_message, "");
}

#[tokio::test]
async fn participants_without_a_summary_are_skipped() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;

    // Only ann lists the conversation.
    let doc = ann.backend.create_conversation(bob.profile.id).await.unwrap();
    let mine = ChatSummary::opened(doc.id, bob.profile.id, Utc::now());
    assert!(ann.backend.add_chat_summary(ann.profile.id, &mine).await.unwrap());

    let out = Outgoing {
        sender_id: ann.profile.id,
        conversation_id: Some(doc.id),
        participant_ids: vec![Some(bob.profile.id), None, Some(ann.profile.id), Some(bob.profile.id)],
        body: MessageBody::text("anyone there?"),
    };
    let report = send(ann.backend.as_ref(), &RetryPolicy::none(), out).await.unwrap();

    assert_eq!(report.synced, vec![ann.profile.id]);
    assert_eq!(report.skipped, vec![bob.profile.id]);
    assert_eq!(summary_of(&ann, bob.profile.id).await.last_message, "anyone there?");
    let bobs = bob.backend.get_chat_list(bob.profile.id).await.unwrap().unwrap();
    assert!(bobs.find(doc.id).is_none());
}

#[tokio::test]
async fn summary_failure_after_append_keeps_the_message() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;
    let chat = chat_with(&ann, &bob).await;
    let cid = chat.summary.conversation_id;

    let faulty = Faulty::new(ann.backend.clone()).with_summary_outage(bob.profile.id);
    let mut view = ann.view_over(Arc::new(faulty));
    view.open_chat(chat).await.unwrap();
    view.set_input("stored anyway");
    let err = view.send_message().await.unwrap_err();

    assert!(err.message_was_sent());
    let ChatError::SummarySync { message_id, source } = &err else {
        panic!("expected a summary sync error, got {:?}", err);
    };
    assert!(source.is_transient());
    assert_eq!(ann.toasts.drain(), vec![Notification::error(err.to_string())]);
    assert_eq!(view.input(), "");

    let doc = ann.backend.get_conversation(cid).await.unwrap().unwrap();
    assert_eq!(doc.messages.len(), 1);
    assert_eq!(doc.messages[0].id, *message_id);
    // The sender's own summary is still brought up to date.
    assert_eq!(summary_of(&ann, bob.profile.id).await.last_message, "stored anyway");
    assert_eq!(summary_of(&bob, ann.profile.id).await.last_message, "");
}

#[tokio::test]
async fn transient_append_failures_are_retried_once_stored() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;
    let cid = chat_with(&ann, &bob).await.summary.conversation_id;

    let faulty = ann.faulty();
    faulty.unavailable_appends.store(1, Ordering::SeqCst);
    faulty.lost_append_replies.store(1, Ordering::SeqCst);
    let out = Outgoing {
        sender_id: ann.profile.id,
        conversation_id: Some(cid),
        participant_ids: vec![Some(bob.profile.id), Some(ann.profile.id)],
        body: MessageBody::text("third time lucky"),
    };
    let report = send(faulty.as_ref(), &quick_retry(3), out).await.unwrap();

    // Refused, stored but unanswered, then accepted as a duplicate.
    assert_eq!(faulty.appends.load(Ordering::SeqCst), 3);
    let doc = ann.backend.get_conversation(cid).await.unwrap().unwrap();
    assert_eq!(doc.messages, vec![report.entry.clone()]);
    assert_eq!(report.synced, vec![bob.profile.id, ann.profile.id]);
}

#[tokio::test]
async fn retries_give_up_after_the_last_attempt() {
    let state = shared_state();
    let ann = Peer::signup(&state, "ann").await;
    let bob = Peer::signup(&state, "bob").await;
    let cid = chat_with(&ann, &bob).await.summary.conversation_id;

    let faulty = ann.faulty();
    faulty.unavailable_appends.store(5, Ordering::SeqCst);
    let out = Outgoing {
        sender_id: ann.profile.id,
        conversation_id: Some(cid),
        participant_ids: vec![Some(bob.profile.id), Some(ann.profile.id)],
        body: MessageBody::text("lost"),
    };
    let err = send(faulty.as_ref(), &quick_retry(2), out).await.unwrap_err();

    assert!(matches!(err, ChatError::Write(BackendError::Unavailable(_))));
    assert_eq!(faulty.appends.load(Ordering::SeqCst), 2);
    let doc = ann.backend.get_conversation(cid).await.unwrap().unwrap();
    assert!(doc.messages.is_empty());
}
