use crate::common::test_server;

#[test]
fn add_creates_both_directions() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let sess = server.connect(&alice);

    let ctrl = server
        .exec(&sess, serde_json::json!({"id": "c", "contact": {"add": bob}}))
        .unwrap();
    assert_eq!(ctrl.code, 200);
    assert!(server.db.has_contact(&alice, &bob).unwrap());
    assert!(server.db.has_contact(&bob, &alice).unwrap());
}

#[test]
fn add_is_idempotent() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let sess = server.connect(&alice);

    for _ in 0..2 {
        let ctrl = server
            .exec(&sess, serde_json::json!({"id": "c", "contact": {"add": bob}}))
            .unwrap();
        assert_eq!(ctrl.code, 200);
    }
    let online = |_: &str| false;
    let contacts = server.db.get_contacts(&alice, &online).unwrap();
    assert_eq!(contacts.len(), 1);
}

#[test]
fn remove_deletes_both_directions() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let sess = server.connect(&alice);
    server
        .exec(&sess, serde_json::json!({"id": "c", "contact": {"add": bob}}))
        .unwrap();

    let ctrl = server
        .exec(&sess, serde_json::json!({"id": "r", "contact": {"remove": bob}}))
        .unwrap();
    assert_eq!(ctrl.code, 200);
    assert!(!server.db.has_contact(&alice, &bob).unwrap());
    assert!(!server.db.has_contact(&bob, &alice).unwrap());
}

#[test]
fn add_self_or_unknown_rejected() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let sess = server.connect(&alice);

    let ctrl = server
        .exec(&sess, serde_json::json!({"id": "c", "contact": {"add": alice}}))
        .unwrap();
    assert_eq!(ctrl.code, 400);

    let ctrl = server
        .exec(&sess, serde_json::json!({"id": "c2", "contact": {"add": "ghost"}}))
        .unwrap();
    assert_eq!(ctrl.code, 404);
}

#[test]
fn nickname_is_private_to_one_direction() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let sess = server.connect(&alice);
    server
        .exec(&sess, serde_json::json!({"id": "c", "contact": {"add": bob}}))
        .unwrap();

    let ctrl = server
        .exec(
            &sess,
            serde_json::json!({"id": "n", "contact": {"user": bob, "nickname": "Bobby"}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 200);

    let online = |_: &str| false;
    let alice_contacts = server.db.get_contacts(&alice, &online).unwrap();
    assert_eq!(alice_contacts[0].nickname.as_deref(), Some("Bobby"));
    let bob_contacts = server.db.get_contacts(&bob, &online).unwrap();
    assert!(bob_contacts[0].nickname.is_none());

    // null clears.
    let ctrl = server
        .exec(
            &sess,
            serde_json::json!({"id": "n2", "contact": {"user": bob, "nickname": null}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 200);
    let alice_contacts = server.db.get_contacts(&alice, &online).unwrap();
    assert!(alice_contacts[0].nickname.is_none());
}

#[test]
fn nickname_for_non_contact_not_found() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let sess = server.connect(&alice);
    let ctrl = server
        .exec(
            &sess,
            serde_json::json!({"id": "n", "contact": {"user": bob, "nickname": "Bobby"}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 404);
}

#[test]
fn contact_listing_carries_profile_and_presence() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let alice_sess = server.connect(&alice);
    let _bob_sess = server.connect(&bob);
    server
        .exec(&alice_sess, serde_json::json!({"id": "c", "contact": {"add": bob}}))
        .unwrap();

    let ctrl = server
        .exec(&alice_sess, serde_json::json!({"id": "g", "get": {"what": "contacts"}}))
        .unwrap();
    assert_eq!(ctrl.code, 200);
    let contacts = ctrl.params.unwrap()["contacts"].as_array().unwrap().clone();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0]["user_id"], serde_json::json!(bob));
    assert_eq!(contacts[0]["public"]["fn"], "Bob");
    assert_eq!(contacts[0]["online"], true);
    assert_eq!(contacts[0]["source"], "manual");
}
