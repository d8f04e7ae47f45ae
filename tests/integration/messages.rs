use crate::common::{as_info, test_server, test_server_with};

fn dm_pair(server: &crate::common::TestServer) -> (crate::common::TestSession, crate::common::TestSession, String) {
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let alice_sess = server.connect(&alice);
    let bob_sess = server.connect(&bob);
    let conv = server.open_dm(&alice_sess, &bob);
    (alice_sess, bob_sess, conv)
}

// --- Send ---

#[test]
fn send_acks_with_seq_then_fans_out() {
    let server = test_server();
    let (alice_sess, mut bob_sess, conv) = dm_pair(&server);

    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "m1", "send": {"conv": conv, "content": {"v": 1, "text": "hi"}}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 202);
    assert_eq!(ctrl.id.as_deref(), Some("m1"));
    let params = ctrl.params.unwrap();
    assert_eq!(params["conv"], serde_json::json!(conv));
    assert_eq!(params["seq"], 1);
    assert!(params["ts"].is_string());

    let frames = bob_sess.drain();
    let data = frames.iter().find_map(|f| f.data()).expect("data for bob");
    assert_eq!(data.seq, 1);
    assert_eq!(data.content["text"], "hi");
}

#[test]
fn seq_is_contiguous_from_one() {
    let server = test_server();
    let (alice_sess, bob_sess, conv) = dm_pair(&server);

    // Interleave senders; seq must stay gap-free either way.
    let mut seqs = vec![
        server.send_text(&alice_sess, &conv, "a1"),
        server.send_text(&bob_sess, &conv, "b1"),
        server.send_text(&alice_sess, &conv, "a2"),
        server.send_text(&bob_sess, &conv, "b2"),
        server.send_text(&alice_sess, &conv, "a3"),
    ];
    seqs.sort();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

    let conv_row = server.db.get_conversation(&conv).unwrap();
    assert_eq!(conv_row.last_seq, 5);
}

#[test]
fn concurrent_sends_take_adjacent_seqs() {
    let server = test_server();
    let (alice_sess, _bob, conv) = dm_pair(&server);
    let alice = alice_sess.user_id().to_string();
    let state: wirechat::AppState = (*server).clone();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let state = state.clone();
            let conv = conv.clone();
            let alice = alice.clone();
            std::thread::spawn(move || {
                let content = state.codec.encrypt(br#"{"v":1}"#);
                state
                    .db
                    .create_message(&conv, &alice, &content, &serde_json::json!({}))
                    .unwrap()
                    .seq
            })
        })
        .collect();
    let mut seqs: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    seqs.sort();

    // Both succeed with adjacent distinct seqs and last_seq advances by 2.
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(server.db.get_conversation(&conv).unwrap().last_seq, 2);
}

#[test]
fn clear_watermark_never_exceeds_last_seq() {
    let server = test_server();
    let (alice_sess, _bob, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "only one");

    server.db.update_clear_seq(&conv, alice_sess.user_id(), 999).unwrap();
    let member = server.db.get_member(&conv, alice_sess.user_id()).unwrap();
    assert_eq!(member.clear_seq, 1);
}

#[test]
fn members_listing_requires_membership() {
    let server = test_server();
    let (alice_sess, _bob, conv) = dm_pair(&server);

    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "g", "get": {"what": "members", "conv": conv}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 200);
    let members = ctrl.params.unwrap()["members"].as_array().unwrap().clone();
    assert_eq!(members.len(), 2);

    let mallory = server.signup("mallory", "pw123456", "Mallory");
    let mallory_sess = server.connect(&mallory);
    let ctrl = server
        .exec(
            &mallory_sess,
            serde_json::json!({"id": "g", "get": {"what": "members", "conv": conv}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 403);
}

#[test]
fn send_requires_membership() {
    let server = test_server();
    let (alice_sess, _bob_sess, conv) = dm_pair(&server);
    drop(alice_sess);
    let mallory = server.signup("mallory", "pw123456", "Mallory");
    let mallory_sess = server.connect(&mallory);
    let ctrl = server
        .exec(
            &mallory_sess,
            serde_json::json!({"id": "m", "send": {"conv": conv, "content": {"v": 1, "text": "intrude"}}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 403);
}

#[test]
fn send_to_unknown_conversation_not_found() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let sess = server.connect(&alice);
    let ctrl = server
        .exec(
            &sess,
            serde_json::json!({"id": "m", "send": {"conv": "nope", "content": {"v": 1}}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 404);
}

#[test]
fn oversize_content_rejected_at_cap_boundary() {
    let server = test_server_with(|c| c.max_frame_bytes = 4096);
    let (alice_sess, _bob, conv) = dm_pair(&server);

    // Envelope {"pad":"…"} is 10 bytes; fill up to exactly the cap.
    let fits = "x".repeat(4096 - 10);
    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "ok", "send": {"conv": conv, "content": {"pad": fits}}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 202);

    let over = "x".repeat(4096 - 10 + 1);
    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "big", "send": {"conv": conv, "content": {"pad": over}}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 400);
}

#[test]
fn content_is_stored_encrypted() {
    let server = test_server();
    let (alice_sess, _bob, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "very secret words");

    let msg = server.db.get_message_by_seq(&conv, 1).unwrap();
    let raw = String::from_utf8_lossy(&msg.content);
    assert!(!raw.contains("very secret words"));
    // And the codec round-trips it.
    let plain = server.codec.decrypt(&msg.content).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&plain).unwrap();
    assert_eq!(value["text"], "very secret words");
}

#[test]
fn reply_to_lands_in_head() {
    let server = test_server();
    let (alice_sess, mut bob_sess, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "first");
    bob_sess.drain();

    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "r", "send": {"conv": conv, "content": {"v": 1, "text": "re"}, "replyTo": 1}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 202);

    let msg = server.db.get_message_by_seq(&conv, 2).unwrap();
    assert_eq!(msg.head["reply_to"], 1);
    let frames = bob_sess.drain();
    let data = frames.iter().find_map(|f| f.data()).unwrap();
    assert_eq!(data.head.as_ref().unwrap()["reply_to"], 1);
}

// --- Edit ---

#[test]
fn edit_inside_window_updates_and_broadcasts() {
    let server = test_server();
    let (alice_sess, mut bob_sess, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "hi");
    bob_sess.drain();

    // 14 minutes old: still inside the 15 minute window.
    server.backdate_message(&conv, 1, 14 * 60);
    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "e1", "edit": {"conv": conv, "seq": 1, "content": {"v": 1, "text": "hi2"}}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 200);

    let frames = bob_sess.drain();
    let note = as_info(frames.iter().find(|f| f.info().is_some()).unwrap(), "edit");
    assert_eq!(note.seq, Some(1));
    assert_eq!(note.content.as_ref().unwrap()["text"], "hi2");

    let msg = server.db.get_message_by_seq(&conv, 1).unwrap();
    assert_eq!(msg.head["edit_count"], 1);
    assert!(msg.head["edited_at"].is_string());
}

#[test]
fn edit_outside_window_forbidden() {
    let server = test_server();
    let (alice_sess, _bob, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "hi");

    server.backdate_message(&conv, 1, 16 * 60);
    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "e1", "edit": {"conv": conv, "seq": 1, "content": {"v": 1, "text": "late"}}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 403);
    assert_eq!(ctrl.text.as_deref(), Some("edit window expired"));
}

#[test]
fn edit_by_non_sender_forbidden() {
    let server = test_server();
    let (alice_sess, bob_sess, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "mine");
    let ctrl = server
        .exec(
            &bob_sess,
            serde_json::json!({"id": "e", "edit": {"conv": conv, "seq": 1, "content": {"v": 1, "text": "hijack"}}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 403);
}

#[test]
fn tenth_edit_allowed_eleventh_denied() {
    let server = test_server();
    let (alice_sess, _bob, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "v0");

    for i in 1..=10 {
        let ctrl = server
            .exec(
                &alice_sess,
                serde_json::json!({"id": format!("e{i}"), "edit": {"conv": conv, "seq": 1, "content": {"v": 1, "text": format!("v{i}")}}}),
            )
            .unwrap();
        assert_eq!(ctrl.code, 200, "edit {i} should pass");
    }
    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "e11", "edit": {"conv": conv, "seq": 1, "content": {"v": 1, "text": "v11"}}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 403);
    assert_eq!(ctrl.text.as_deref(), Some("maximum edits reached"));
}

// --- Unsend ---

#[test]
fn unsend_inside_window_tombstones() {
    let server = test_server();
    let (alice_sess, mut bob_sess, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "oops");
    bob_sess.drain();

    let ctrl = server
        .exec(&alice_sess, serde_json::json!({"id": "u", "unsend": {"conv": conv, "seq": 1}}))
        .unwrap();
    assert_eq!(ctrl.code, 200);

    let msg = server.db.get_message_by_seq(&conv, 1).unwrap();
    assert!(msg.is_deleted());
    assert_eq!(msg.head["unsent"], true);

    let frames = bob_sess.drain();
    as_info(frames.iter().find(|f| f.info().is_some()).unwrap(), "unsend");
}

#[test]
fn unsend_outside_window_forbidden() {
    let server = test_server();
    let (alice_sess, _bob, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "too late");
    server.backdate_message(&conv, 1, 6 * 60);
    let ctrl = server
        .exec(&alice_sess, serde_json::json!({"id": "u", "unsend": {"conv": conv, "seq": 1}}))
        .unwrap();
    assert_eq!(ctrl.code, 403);
}

#[test]
fn unsend_twice_is_gone() {
    let server = test_server();
    let (alice_sess, _bob, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "x");
    server
        .exec(&alice_sess, serde_json::json!({"id": "u1", "unsend": {"conv": conv, "seq": 1}}))
        .unwrap();
    let ctrl = server
        .exec(&alice_sess, serde_json::json!({"id": "u2", "unsend": {"conv": conv, "seq": 1}}))
        .unwrap();
    assert_eq!(ctrl.code, 410);
}

// --- Delete ---

#[test]
fn delete_for_everyone_is_sender_only_but_unlimited() {
    let server = test_server();
    let (alice_sess, mut bob_sess, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "old");
    bob_sess.drain();
    // Way past any unsend window.
    server.backdate_message(&conv, 1, 90 * 24 * 3600);

    let ctrl = server
        .exec(
            &bob_sess,
            serde_json::json!({"id": "d", "delete": {"conv": conv, "seq": 1, "forEveryone": true}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 403);

    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "d", "delete": {"conv": conv, "seq": 1, "forEveryone": true}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 200);
    assert!(server.db.get_message_by_seq(&conv, 1).unwrap().is_deleted());

    let frames = bob_sess.drain();
    as_info(frames.iter().find(|f| f.info().is_some()).unwrap(), "delete");
}

#[test]
fn delete_for_self_hides_only_for_caller() {
    let server = test_server();
    let (alice_sess, mut bob_sess, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "keep for alice");
    bob_sess.drain();

    let ctrl = server
        .exec(&bob_sess, serde_json::json!({"id": "d", "delete": {"conv": conv, "seq": 1}}))
        .unwrap();
    assert_eq!(ctrl.code, 200);
    // No broadcast for a personal hide.
    assert!(bob_sess.drain().is_empty());

    let bob_view = server.db.get_messages(&conv, bob_sess.user_id(), 0, 0, 0).unwrap();
    assert!(bob_view.is_empty());
    let alice_view = server.db.get_messages(&conv, alice_sess.user_id(), 0, 0, 0).unwrap();
    assert_eq!(alice_view.len(), 1);

    // Idempotent.
    let ctrl = server
        .exec(&bob_sess, serde_json::json!({"id": "d2", "delete": {"conv": conv, "seq": 1}}))
        .unwrap();
    assert_eq!(ctrl.code, 200);
}

// --- Typing ---

#[test]
fn typing_is_silent_and_broadcast() {
    let server = test_server();
    let (alice_sess, mut bob_sess, conv) = dm_pair(&server);

    let ctrl = server.exec(&alice_sess, serde_json::json!({"typing": {"conv": conv}}));
    assert!(ctrl.is_none());

    let frames = bob_sess.drain();
    let note = as_info(frames.iter().find(|f| f.info().is_some()).unwrap(), "typing");
    assert_eq!(note.from.as_deref(), Some(alice_sess.user_id()));
}

#[test]
fn typing_in_foreign_conversation_fails_silently() {
    let server = test_server();
    let (_alice_sess, _bob_sess, conv) = dm_pair(&server);
    let mallory = server.signup("mallory", "pw123456", "Mallory");
    let mallory_sess = server.connect(&mallory);
    let ctrl = server.exec(&mallory_sess, serde_json::json!({"typing": {"conv": conv}}));
    assert!(ctrl.is_none());
}

// --- History ---

#[test]
fn history_is_descending_and_respects_before() {
    let server = test_server();
    let (alice_sess, _bob, conv) = dm_pair(&server);
    for i in 1..=6 {
        server.send_text(&alice_sess, &conv, &format!("m{i}"));
    }

    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "g", "get": {"what": "messages", "conv": conv, "before": 5, "limit": 3}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 200);
    let messages = ctrl.params.unwrap()["messages"].as_array().unwrap().clone();
    let seqs: Vec<i64> = messages.iter().map(|m| m["seq"].as_i64().unwrap()).collect();
    assert_eq!(seqs, vec![4, 3, 2]);
}

#[test]
fn history_hides_below_clear_watermark() {
    let server = test_server();
    let (alice_sess, _bob, conv) = dm_pair(&server);
    for i in 1..=4 {
        server.send_text(&alice_sess, &conv, &format!("m{i}"));
    }
    server
        .db
        .update_clear_seq(&conv, alice_sess.user_id(), 2)
        .unwrap();

    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "g", "get": {"what": "messages", "conv": conv}}),
        )
        .unwrap();
    let messages = ctrl.params.unwrap()["messages"].as_array().unwrap().clone();
    let seqs: Vec<i64> = messages.iter().map(|m| m["seq"].as_i64().unwrap()).collect();
    assert_eq!(seqs, vec![4, 3]);
}

#[test]
fn tombstones_are_head_only() {
    let server = test_server();
    let (alice_sess, _bob, conv) = dm_pair(&server);
    server.send_text(&alice_sess, &conv, "will vanish");
    server
        .exec(&alice_sess, serde_json::json!({"id": "u", "unsend": {"conv": conv, "seq": 1}}))
        .unwrap();

    let ctrl = server
        .exec(
            &alice_sess,
            serde_json::json!({"id": "g", "get": {"what": "messages", "conv": conv}}),
        )
        .unwrap();
    let messages = ctrl.params.unwrap()["messages"].as_array().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["deleted"], true);
    assert_eq!(messages[0]["head"]["unsent"], true);
    assert!(messages[0].get("content").is_none());
}
