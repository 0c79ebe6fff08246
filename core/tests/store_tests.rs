/// Conversation store integration tests
/// End-to-end coverage of the dual-write synchronizer over a real
/// sled-backed document tree.
use tempfile::TempDir;
use threadline_core::directory::UserRecord;
use threadline_core::events::{EventBus, StoreEvent};
use threadline_core::message::new_message_id;
use threadline_core::store::{paths, DocTree};
use threadline_core::{Message, MessageKind, StoreError, Synchronizer, UserKey};

fn setup() -> (TempDir, Synchronizer, EventBus) {
    let (dir, _tree, sync, events) = setup_with_tree();
    (dir, sync, events)
}

fn setup_with_tree() -> (TempDir, DocTree, Synchronizer, EventBus) {
    let dir = tempfile::tempdir().unwrap();
    let tree = DocTree::open(dir.path(), false).unwrap();
    let events = EventBus::default();
    let sync = Synchronizer::new(tree.clone(), 5, events.clone());
    (dir, tree, sync, events)
}

fn register(sync: &Synchronizer, email: &str, first: &str, last: &str) -> UserKey {
    sync.directory()
        .insert_user(
            email,
            UserRecord {
                first_name: first.to_string(),
                last_name: last.to_string(),
            },
        )
        .unwrap()
}

fn text(sender: &UserKey, peer: &UserKey, body: &str) -> Message {
    let sent_at = chrono::Utc::now().to_rfc3339();
    Message {
        id: new_message_id(sender, peer, &sent_at),
        sender: sender.clone(),
        sender_name: "Sender".to_string(),
        sent_at,
        kind: MessageKind::Text(body.to_string()),
    }
}

#[tokio::test]
async fn create_then_send_returns_two_messages_in_order() {
    let (_dir, sync, _events) = setup();
    let alice = register(&sync, "alice@gmail.com", "Alice", "Smith");
    let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");

    let first = text(&alice, &bob, "hello");
    let id = sync
        .create_conversation(&alice, &bob, "Bob", &first)
        .await
        .unwrap();

    let second = text(&alice, &bob, "still there?");
    sync.send_message(&id, &alice, &bob, "Bob", &second)
        .await
        .unwrap();

    let messages = sync.log().read_all(&id).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id, first.id);
    assert_eq!(messages[1].id, second.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_sends_are_both_retained() {
    let (_dir, sync, _events) = setup();
    let alice = register(&sync, "alice@gmail.com", "Alice", "Smith");
    let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");

    let id = sync
        .create_conversation(&alice, &bob, "Bob", &text(&alice, &bob, "hi"))
        .await
        .unwrap();

    // Two uncoordinated senders, same conversation, different ids.
    let from_alice = text(&alice, &bob, "from alice");
    let from_bob = text(&bob, &alice, "from bob");

    let sync_a = sync.clone();
    let (id_a, alice_a, bob_a) = (id.clone(), alice.clone(), bob.clone());
    let task_a = tokio::spawn(async move {
        sync_a
            .send_message(&id_a, &alice_a, &bob_a, "Bob", &from_alice)
            .await
    });

    let sync_b = sync.clone();
    let (id_b, alice_b, bob_b) = (id.clone(), alice.clone(), bob.clone());
    let task_b = tokio::spawn(async move {
        sync_b
            .send_message(&id_b, &bob_b, &alice_b, "Alice", &from_bob)
            .await
    });

    task_a.await.unwrap().unwrap();
    task_b.await.unwrap().unwrap();

    // Last-write-wins would have dropped one of the two.
    let messages = sync.log().read_all(&id).unwrap();
    assert_eq!(messages.len(), 3);
}

#[tokio::test]
async fn delete_is_one_sided_and_leaves_the_peer_an_orphan() {
    let (_dir, sync, _events) = setup();
    let alice = register(&sync, "alice@gmail.com", "Alice", "Smith");
    let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");

    let id = sync
        .create_conversation(&alice, &bob, "Bob", &text(&alice, &bob, "hi"))
        .await
        .unwrap();

    assert!(sync.delete_conversation(&alice, &id).await.unwrap());

    // Alice's side is gone...
    assert!(sync.index().list(&alice).unwrap().is_empty());
    // ...and Bob's copy survives untouched.
    let bobs = sync.index().list(&bob).unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].id, id);

    // Deleting again is a quiet no-op.
    assert!(!sync.delete_conversation(&alice, &id).await.unwrap());
}

#[tokio::test]
async fn create_requires_a_registered_initiator() {
    let (_dir, sync, _events) = setup();
    let ghost = UserKey::normalize("ghost@gmail.com");
    let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");

    let err = sync
        .create_conversation(&ghost, &bob, "Bob", &text(&ghost, &bob, "boo"))
        .await
        .unwrap_err();
    assert!(matches!(err, threadline_core::StoreError::UserNotFound(_)));

    // Nothing was written to either side.
    assert!(sync.index().list(&ghost).unwrap().is_empty());
    assert!(sync.index().list(&bob).unwrap().is_empty());
}

#[tokio::test]
async fn first_message_scenario_mirrors_summaries_to_both_indexes() {
    let (_dir, sync, _events) = setup();
    let alice = register(&sync, "a@gmail.com", "Aiyana", "Price");
    let bob = register(&sync, "b@gmail.com", "Bob", "Lee");
    assert_eq!(alice.as_str(), "a-gmail-com");
    assert_eq!(bob.as_str(), "b-gmail-com");

    let first = text(&alice, &bob, "hi");
    let id = sync
        .create_conversation(&alice, &bob, "Bob", &first)
        .await
        .unwrap();
    assert_eq!(id, format!("conversation_{}", first.id));

    let records = sync.log().read_records(&id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, "text");
    assert_eq!(records[0].content, "hi");
    assert!(!records[0].is_read);

    let alice_side = sync.index().list(&alice).unwrap();
    let bob_side = sync.index().list(&bob).unwrap();
    assert_eq!(alice_side.len(), 1);
    assert_eq!(bob_side.len(), 1);
    assert_eq!(alice_side[0].id, id);
    assert_eq!(bob_side[0].id, id);
    // Same preview on both sides.
    assert_eq!(alice_side[0].latest_message, bob_side[0].latest_message);
    assert_eq!(alice_side[0].latest_message.text, "hi");
    // Each side points at the other participant.
    assert_eq!(alice_side[0].peer, bob);
    assert_eq!(bob_side[0].peer, alice);
    // The peer sees the initiator's directory display name.
    assert_eq!(bob_side[0].name, "Aiyana Price");
    assert_eq!(alice_side[0].name, "Bob");
}

#[tokio::test]
async fn send_synthesizes_missing_summaries_from_fallbacks() {
    let (_dir, sync, _events) = setup();
    let alice = register(&sync, "alice@gmail.com", "Alice", "Smith");
    let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");

    // No create_conversation first: both indexes are empty, the log is
    // missing. send_message must still work end to end.
    let id = "conversation_out_of_band";
    sync.send_message(id, &alice, &bob, "Bob", &text(&alice, &bob, "ping"))
        .await
        .unwrap();

    assert_eq!(sync.log().read_all(id).unwrap().len(), 1);

    let alice_side = sync.index().list(&alice).unwrap();
    assert_eq!(alice_side.len(), 1);
    assert_eq!(alice_side[0].name, "Bob");

    let bob_side = sync.index().list(&bob).unwrap();
    assert_eq!(bob_side.len(), 1);
    assert_eq!(bob_side[0].name, "Alice Smith");
    assert_eq!(bob_side[0].latest_message.text, "ping");
}

#[tokio::test]
async fn send_updates_latest_message_preview_in_place() {
    let (_dir, sync, _events) = setup();
    let alice = register(&sync, "alice@gmail.com", "Alice", "Smith");
    let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");

    let id = sync
        .create_conversation(&alice, &bob, "Bob", &text(&alice, &bob, "first"))
        .await
        .unwrap();
    sync.send_message(&id, &alice, &bob, "Bob", &text(&alice, &bob, "second"))
        .await
        .unwrap();

    for user in [&alice, &bob] {
        let list = sync.index().list(user).unwrap();
        assert_eq!(list.len(), 1, "no duplicate summaries for {}", user);
        assert_eq!(list[0].latest_message.text, "second");
    }
}

#[tokio::test]
async fn media_and_location_messages_flow_through_the_log() {
    let (_dir, sync, _events) = setup();
    let alice = register(&sync, "alice@gmail.com", "Alice", "Smith");
    let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");

    let id = sync
        .create_conversation(&alice, &bob, "Bob", &text(&alice, &bob, "look"))
        .await
        .unwrap();

    let mut photo = text(&alice, &bob, "");
    photo.kind = MessageKind::Photo("blob://message_images/cat.png".to_string());
    sync.send_message(&id, &alice, &bob, "Bob", &photo).await.unwrap();

    let mut pin = text(&alice, &bob, "");
    pin.kind = MessageKind::Location {
        latitude: 48.85,
        longitude: 2.35,
    };
    sync.send_message(&id, &alice, &bob, "Bob", &pin).await.unwrap();

    let messages = sync.log().read_all(&id).unwrap();
    assert_eq!(messages.len(), 3);
    assert!(matches!(messages[1].kind, MessageKind::Photo(ref url)
        if url == "blob://message_images/cat.png"));
    // Stored as "lat,lon", decoded with the wire's swapped field order.
    match messages[2].kind {
        MessageKind::Location { latitude, longitude } => {
            assert_eq!(longitude, 48.85);
            assert_eq!(latitude, 2.35);
        }
        ref other => panic!("expected location, got {:?}", other),
    }

    // The index preview carries the raw content string.
    let preview = &sync.index().list(&bob).unwrap()[0].latest_message;
    assert_eq!(preview.text, "48.85,2.35");
}

#[tokio::test]
async fn mutations_emit_store_events() {
    let (_dir, sync, events) = setup();
    let alice = register(&sync, "alice@gmail.com", "Alice", "Smith");
    let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");
    let mut rx = events.subscribe();

    let id = sync
        .create_conversation(&alice, &bob, "Bob", &text(&alice, &bob, "hi"))
        .await
        .unwrap();
    sync.send_message(&id, &alice, &bob, "Bob", &text(&alice, &bob, "again"))
        .await
        .unwrap();
    sync.delete_conversation(&alice, &id).await.unwrap();

    match rx.recv().await.unwrap() {
        StoreEvent::ConversationCreated { conversation_id, .. } => {
            assert_eq!(conversation_id, id)
        }
        other => panic!("expected ConversationCreated, got {:?}", other),
    }
    assert!(matches!(rx.recv().await.unwrap(), StoreEvent::NewMessage { .. }));
    assert!(matches!(
        rx.recv().await.unwrap(),
        StoreEvent::ConversationRemoved { .. }
    ));
}

#[tokio::test]
async fn failed_peer_index_write_surfaces_as_partial_write() {
    let (_dir, tree, sync, _events) = setup_with_tree();
    let alice = register(&sync, "alice@gmail.com", "Alice", "Smith");
    let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");

    let id = sync
        .create_conversation(&alice, &bob, "Bob", &text(&alice, &bob, "hi"))
        .await
        .unwrap();

    // Bob's index becomes unwritable after the log and Alice's index
    // have already committed.
    tree.fail_path(&paths::conversations(&bob));
    let err = sync
        .send_message(&id, &alice, &bob, "Bob", &text(&alice, &bob, "late"))
        .await
        .unwrap_err();

    match err {
        StoreError::PartialWrite { op, committed, failed, .. } => {
            assert_eq!(op, "send_message");
            assert_eq!(committed, "message_log, initiator_index");
            assert_eq!(failed, "peer_index");
        }
        other => panic!("expected PartialWrite, got {:?}", other),
    }

    // The committed half is really there: the log kept the message and
    // Alice's preview moved, while Bob's side stayed behind.
    tree.heal_path(&paths::conversations(&bob));
    assert_eq!(sync.log().read_all(&id).unwrap().len(), 2);
    assert_eq!(sync.index().list(&alice).unwrap()[0].latest_message.text, "late");
    assert_eq!(sync.index().list(&bob).unwrap()[0].latest_message.text, "hi");
}

#[tokio::test]
async fn failed_initiator_index_write_during_create_surfaces_as_partial_write() {
    let (_dir, tree, sync, _events) = setup_with_tree();
    let alice = register(&sync, "alice@gmail.com", "Alice", "Smith");
    let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");

    tree.fail_path(&paths::conversations(&alice));
    let first = text(&alice, &bob, "hi");
    let err = sync
        .create_conversation(&alice, &bob, "Bob", &first)
        .await
        .unwrap_err();

    match err {
        StoreError::PartialWrite { op, committed, failed, .. } => {
            assert_eq!(op, "create_conversation");
            assert_eq!(committed, "peer_index");
            assert_eq!(failed, "initiator_index");
        }
        other => panic!("expected PartialWrite, got {:?}", other),
    }

    // Bob is left holding an orphan summary pointing at a log that was
    // never written — the documented inconsistency window.
    tree.heal_path(&paths::conversations(&alice));
    let id = format!("conversation_{}", first.id);
    assert_eq!(sync.index().list(&bob).unwrap()[0].id, id);
    assert!(sync.index().list(&alice).unwrap().is_empty());
    assert!(sync.log().read_all(&id).unwrap().is_empty());
}

#[tokio::test]
async fn failure_before_the_first_write_is_not_a_partial_write() {
    let (_dir, tree, sync, _events) = setup_with_tree();
    let alice = register(&sync, "alice@gmail.com", "Alice", "Smith");
    let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");

    // The sender's directory record is read before anything commits;
    // a failure there must surface plainly, with no committed steps
    // and no document touched.
    tree.fail_path(&paths::user(&alice));
    let err = sync
        .send_message("conversation_x", &alice, &bob, "Bob", &text(&alice, &bob, "ping"))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Storage(_)));
    tree.heal_path(&paths::user(&alice));
    assert!(sync.log().read_all("conversation_x").unwrap().is_empty());
    assert!(sync.index().list(&alice).unwrap().is_empty());
    assert!(sync.index().list(&bob).unwrap().is_empty());
}

#[tokio::test]
async fn state_survives_reopening_the_tree() {
    let dir = tempfile::tempdir().unwrap();
    let id;
    let alice = UserKey::normalize("alice@gmail.com");
    {
        let tree = DocTree::open(dir.path(), true).unwrap();
        let sync = Synchronizer::new(tree, 5, EventBus::default());
        register(&sync, "alice@gmail.com", "Alice", "Smith");
        let bob = register(&sync, "bob@gmail.com", "Bob", "Jones");
        id = sync
            .create_conversation(&alice, &bob, "Bob", &text(&alice, &bob, "persisted"))
            .await
            .unwrap();
    }

    let tree = DocTree::open(dir.path(), true).unwrap();
    let sync = Synchronizer::new(tree, 5, EventBus::default());
    assert_eq!(sync.log().read_all(&id).unwrap().len(), 1);
    assert_eq!(sync.index().list(&alice).unwrap()[0].id, id);
}
