use duochat::{
    auth::Clients,
    db,
    profiles::{store, Profile, SignedIn},
    rooms::{previews::{EMPTY_LABEL, PHOTO_LABEL, TYPING_LABEL}, room_key, SendMessage},
    AppState, Config,
};

async fn state() -> AppState {
    AppState::new(db::memory().await.unwrap(), Clients::default(), Config::default())
}

async fn user(state: &AppState, id: &str, name: &str) -> Profile {
    store::upsert_signed_in(&state.db_pool, &state.hub, SignedIn {
        id: id.to_owned(),
        display_name: Some(name.to_owned()),
        email: None,
        photo_url: None,
    })
    .await
    .unwrap()
}

/// Timestamps are wall-clock milliseconds across rooms; keep them apart.
async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
}

fn text(text: &str) -> SendMessage {
    SendMessage {
        text: Some(text.to_owned()),
        ..SendMessage::default()
    }
}

#[tokio::test]
async fn previews_follow_latest_activity() {
    let state = state().await;
    let alice = user(&state, "alice", "Alice").await;
    let bob = user(&state, "bob", "Bob").await;
    let carol = user(&state, "carol", "Carol").await;
    user(&state, "dave", "Dave").await;

    state.messages.send(&alice, "bob", text("hey bob")).await.unwrap();
    settle().await;
    state.messages.send(&carol, "alice", SendMessage {
        image: Some("https://res.example/sunset.jpg".to_owned()),
        ..SendMessage::default()
    }).await.unwrap();

    let previews = state.previews.for_user("alice").await.unwrap();
    let summary: Vec<_> = previews.iter().map(|p| (p.peer.id.as_str(), p.label.as_str())).collect();
    assert_eq!(summary, [("carol", PHOTO_LABEL), ("bob", "hey bob"), ("dave", EMPTY_LABEL)]);

    // Bob answering moves him back on top, even though the list was cached.
    settle().await;
    state.messages.send(&bob, "alice", text("hi alice")).await.unwrap();
    let previews = state.previews.for_user("alice").await.unwrap();
    assert_eq!(previews[0].peer.id, "bob");
    assert_eq!(previews[0].label, "hi alice");
}

#[tokio::test]
async fn peer_typing_overrides_label() {
    let state = state().await;
    let alice = user(&state, "alice", "Alice").await;
    user(&state, "bob", "Bob").await;
    state.messages.send(&alice, "bob", text("you there?")).await.unwrap();

    let room = room_key("alice", "bob").unwrap();
    state.typing.set(&room, "bob", true).await.unwrap();

    let previews = state.previews.for_user("alice").await.unwrap();
    assert!(previews[0].peer_typing);
    assert_eq!(previews[0].label, TYPING_LABEL);

    // Alice's own typing never shows up in her list.
    state.typing.set(&room, "bob", false).await.unwrap();
    state.typing.set(&room, "alice", true).await.unwrap();
    let previews = state.previews.for_user("alice").await.unwrap();
    assert!(!previews[0].peer_typing);
    assert_eq!(previews[0].label, "you there?");
}

#[tokio::test]
async fn deleting_last_message_falls_back() {
    let state = state().await;
    let alice = user(&state, "alice", "Alice").await;
    user(&state, "bob", "Bob").await;

    let only = state.messages.send(&alice, "bob", text("oops")).await.unwrap();
    assert_eq!(state.previews.for_user("bob").await.unwrap()[0].label, "oops");

    state.messages.delete("alice", "bob", only.id).await.unwrap();
    assert_eq!(state.previews.for_user("bob").await.unwrap()[0].label, EMPTY_LABEL);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_preview_reads_see_the_last_send() {
    let state = state().await;
    let alice = user(&state, "alice", "Alice").await;
    user(&state, "bob", "Bob").await;

    for n in 0..50 {
        let mut readers = Vec::new();
        for _ in 0..4 {
            let previews = state.previews.clone();
            readers.push(tokio::spawn(async move { previews.for_user("bob").await.unwrap() }));
        }
        let sent = state.messages.send(&alice, "bob", text(&format!("note {n}"))).await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        let previews = state.previews.for_user("bob").await.unwrap();
        assert_eq!(previews[0].last_message.as_ref(), Some(&sent));
    }
}
