use crate::common::{as_info, test_server};
use wirechat::models::Role;

#[test]
fn dm_member_can_pin_and_unpin() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let alice_sess = server.connect(&alice);
    let mut bob_sess = server.connect(&bob);
    let conv = server.open_dm(&alice_sess, &bob);
    server.send_text(&alice_sess, &conv, "pin me");
    bob_sess.drain();

    let ctrl = server
        .exec(&alice_sess, serde_json::json!({"id": "p", "pin": {"conv": conv, "seq": 1}}))
        .unwrap();
    assert_eq!(ctrl.code, 200);
    assert_eq!(server.db.get_pinned_message_seq(&conv).unwrap(), Some(1));

    let frames = bob_sess.drain();
    let note = as_info(frames.iter().find(|f| f.info().is_some()).unwrap(), "pin");
    assert_eq!(note.seq, Some(1));

    // seq 0 unpins.
    let ctrl = server
        .exec(&bob_sess, serde_json::json!({"id": "u", "pin": {"conv": conv, "seq": 0}}))
        .unwrap();
    assert_eq!(ctrl.code, 200);
    assert_eq!(server.db.get_pinned_message_seq(&conv).unwrap(), None);
}

#[test]
fn room_pin_requires_admin() {
    let server = test_server();
    let owner = server.signup("owner", "pw123456", "Olivia");
    let member = server.signup("member", "pw123456", "Mel");
    let owner_sess = server.connect(&owner);
    let ctrl = server
        .exec(&owner_sess, serde_json::json!({"id": "c", "room": {"action": "create"}}))
        .unwrap();
    let conv = ctrl.params.unwrap()["conv"]["id"].as_str().unwrap().to_string();
    server
        .exec(
            &owner_sess,
            serde_json::json!({"id": "i", "room": {"action": "invite", "id": conv, "user": member}}),
        )
        .unwrap();
    server.send_text(&owner_sess, &conv, "announcement");

    let member_sess = server.connect(&member);
    let ctrl = server
        .exec(&member_sess, serde_json::json!({"id": "p", "pin": {"conv": conv, "seq": 1}}))
        .unwrap();
    assert_eq!(ctrl.code, 403);

    server.db.add_room_member(&conv, &member, Role::Admin).unwrap();
    let ctrl = server
        .exec(&member_sess, serde_json::json!({"id": "p2", "pin": {"conv": conv, "seq": 1}}))
        .unwrap();
    assert_eq!(ctrl.code, 200);
}

#[test]
fn pin_records_who_and_when() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let alice_sess = server.connect(&alice);
    let conv = server.open_dm(&alice_sess, &bob);
    server.send_text(&alice_sess, &conv, "pinned");
    server
        .exec(&alice_sess, serde_json::json!({"id": "p", "pin": {"conv": conv, "seq": 1}}))
        .unwrap();

    let row = server.db.get_conversation(&conv).unwrap();
    assert_eq!(row.pinned_by.as_deref(), Some(alice.as_str()));
    assert!(row.pinned_at.is_some());
    assert!(row.pinned_message_id.is_some());
}

#[test]
fn pinning_missing_or_deleted_message_fails() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let alice_sess = server.connect(&alice);
    let conv = server.open_dm(&alice_sess, &bob);

    let ctrl = server
        .exec(&alice_sess, serde_json::json!({"id": "p", "pin": {"conv": conv, "seq": 5}}))
        .unwrap();
    assert_eq!(ctrl.code, 404);

    server.send_text(&alice_sess, &conv, "soon gone");
    server
        .exec(&alice_sess, serde_json::json!({"id": "u", "unsend": {"conv": conv, "seq": 1}}))
        .unwrap();
    let ctrl = server
        .exec(&alice_sess, serde_json::json!({"id": "p2", "pin": {"conv": conv, "seq": 1}}))
        .unwrap();
    assert_eq!(ctrl.code, 410);
}

#[test]
fn conversation_list_carries_pinned_seq() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let alice_sess = server.connect(&alice);
    let conv = server.open_dm(&alice_sess, &bob);
    server.send_text(&alice_sess, &conv, "one");
    server.send_text(&alice_sess, &conv, "two");
    server
        .exec(&alice_sess, serde_json::json!({"id": "p", "pin": {"conv": conv, "seq": 2}}))
        .unwrap();

    let ctrl = server
        .exec(&alice_sess, serde_json::json!({"id": "g", "get": {"what": "conversations"}}))
        .unwrap();
    let convs = ctrl.params.unwrap()["conversations"].as_array().unwrap().clone();
    assert_eq!(convs[0]["pinned_seq"], 2);
}
