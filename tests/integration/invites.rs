use crate::common::test_server;
use wirechat::models::InviteStatus;

fn create_invite(server: &crate::common::TestServer, sess: &crate::common::TestSession, email: &str) -> (String, String) {
    let ctrl = server
        .exec(
            sess,
            serde_json::json!({"id": "i", "invite": {"create": {"email": email, "name": "Bob"}}}),
        )
        .unwrap();
    assert_eq!(ctrl.code, 201, "invite create failed: {ctrl:?}");
    let params = ctrl.params.unwrap();
    (
        params["id"].as_str().unwrap().to_string(),
        params["code"].as_str().unwrap().to_string(),
    )
}

// --- Create / list / revoke ---

#[test]
fn invite_create_returns_short_code() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let sess = server.connect(&alice);
    let (_id, code) = create_invite(&server, &sess, "bob@example.com");
    assert_eq!(code.len(), 10);

    let invite = server.db.get_invite_by_code(&code).unwrap();
    assert_eq!(invite.email, "bob@example.com");
    assert_eq!(invite.status, InviteStatus::Pending);
    // Stored token is ciphertext, not the token itself.
    assert!(!String::from_utf8_lossy(&invite.token).starts_with("v1|"));
}

#[test]
fn invite_create_rejects_bad_email() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let sess = server.connect(&alice);
    let ctrl = server
        .exec(&sess, serde_json::json!({"id": "i", "invite": {"create": {"email": "not-an-email"}}}))
        .unwrap();
    assert_eq!(ctrl.code, 400);
}

#[test]
fn invite_list_shows_own_invites_only() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let carol = server.signup("carol", "pw123456", "Carol");
    let alice_sess = server.connect(&alice);
    let carol_sess = server.connect(&carol);
    create_invite(&server, &alice_sess, "x@example.com");
    create_invite(&server, &alice_sess, "y@example.com");
    create_invite(&server, &carol_sess, "z@example.com");

    let ctrl = server
        .exec(&alice_sess, serde_json::json!({"id": "l", "invite": {"list": true}}))
        .unwrap();
    let invites = ctrl.params.unwrap()["invites"].as_array().unwrap().clone();
    assert_eq!(invites.len(), 2);
}

#[test]
fn revoke_is_creator_only_and_final() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let carol = server.signup("carol", "pw123456", "Carol");
    let alice_sess = server.connect(&alice);
    let carol_sess = server.connect(&carol);
    let (id, code) = create_invite(&server, &alice_sess, "bob@example.com");

    // Not the creator.
    let ctrl = server
        .exec(&carol_sess, serde_json::json!({"id": "r", "invite": {"revoke": id}}))
        .unwrap();
    assert_eq!(ctrl.code, 404);

    let ctrl = server
        .exec(&alice_sess, serde_json::json!({"id": "r2", "invite": {"revoke": id}}))
        .unwrap();
    assert_eq!(ctrl.code, 200);

    // Revoked codes no longer resolve, and cannot be revoked twice.
    assert!(server.db.get_invite_by_code(&code).is_err());
    let ctrl = server
        .exec(&alice_sess, serde_json::json!({"id": "r3", "invite": {"revoke": id}}))
        .unwrap();
    assert_eq!(ctrl.code, 404);
}

// --- Redemption: signup path ---

#[test]
fn signup_with_code_consumes_all_pending_for_email() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let cathy = server.signup("cathy", "pw123456", "Cathy");
    let alice_sess = server.connect(&alice);
    let cathy_sess = server.connect(&cathy);
    let (_, code_a) = create_invite(&server, &alice_sess, "bob@x.test");
    let (cathy_invite_id, _) = create_invite(&server, &cathy_sess, "bob@x.test");

    let outcome = server
        .try_signup("bob", "pw123456", "Bob", Some(code_a.as_str()))
        .unwrap();
    assert!(outcome.grant.is_some());

    // Both inviters materialise, not just the code's owner.
    let mut inviters = outcome.inviter_ids.clone();
    inviters.sort();
    let mut expected = vec![alice.clone(), cathy.clone()];
    expected.sort();
    assert_eq!(inviters, expected);

    let bob = outcome.user.id;
    // Contacts exist bidirectionally for both pairs.
    for inviter in [&alice, &cathy] {
        assert!(server.db.has_contact(inviter, &bob).unwrap());
        assert!(server.db.has_contact(&bob, inviter).unwrap());
    }
    // Both DMs exist.
    let (_, created_a) = server.db.create_dm(&alice, &bob).unwrap();
    let (_, created_c) = server.db.create_dm(&cathy, &bob).unwrap();
    assert!(!created_a);
    assert!(!created_c);

    // Cathy's sibling invite was consumed by the same redemption.
    let cathy_invites = server.db.get_user_invites(&cathy).unwrap();
    let sibling = cathy_invites.iter().find(|i| i.id == cathy_invite_id).unwrap();
    assert_eq!(sibling.status, InviteStatus::Used);
    assert_eq!(sibling.used_by.as_deref(), Some(bob.as_str()));
    assert!(sibling.used_at.is_some());
}

#[test]
fn invite_is_single_use() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let alice_sess = server.connect(&alice);
    let (_, code) = create_invite(&server, &alice_sess, "bob@x.test");

    server.try_signup("bob", "pw123456", "Bob", Some(code.as_str())).unwrap();
    let err = server
        .try_signup("eve", "pw123456", "Eve", Some(code.as_str()))
        .unwrap_err();
    assert_eq!(err.code.as_u16(), 404);
}

#[test]
fn signup_with_unknown_code_fails() {
    let server = test_server();
    let err = server
        .try_signup("bob", "pw123456", "Bob", Some("nope123456"))
        .unwrap_err();
    assert_eq!(err.code.as_u16(), 404);
}

#[test]
fn invite_email_seeds_verified_account() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let alice_sess = server.connect(&alice);
    let (_, code) = create_invite(&server, &alice_sess, "bob@x.test");

    let outcome = server.try_signup("bob", "pw123456", "Bob", Some(code.as_str())).unwrap();
    let user = server.db.get_user(&outcome.user.id).unwrap();
    assert_eq!(user.email.as_deref(), Some("bob@x.test"));
    assert!(user.email_verified);
}

// --- Redemption: existing-user path ---

#[test]
fn existing_user_redeems_into_dm_and_contacts() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let bob = server.signup("bob", "pw123456", "Bob");
    let alice_sess = server.connect(&alice);
    let bob_sess = server.connect(&bob);
    let (_, code) = create_invite(&server, &alice_sess, "bob@elsewhere.test");

    let ctrl = server
        .exec(&bob_sess, serde_json::json!({"id": "r", "invite": {"redeem": code}}))
        .unwrap();
    assert_eq!(ctrl.code, 200);
    let params = ctrl.params.unwrap();
    assert_eq!(params["inviters"], serde_json::json!([alice]));

    assert!(server.db.has_contact(&alice, &bob).unwrap());
    assert!(server.db.has_contact(&bob, &alice).unwrap());
    let conv = params["convs"][0].as_str().unwrap();
    assert!(server.db.is_member(conv, &alice).unwrap());
    assert!(server.db.is_member(conv, &bob).unwrap());
}

#[test]
fn expired_invite_cannot_be_redeemed() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let alice_sess = server.connect(&alice);
    let (_, code) = create_invite(&server, &alice_sess, "bob@x.test");

    // Age the row past its expiry.
    let past = (chrono::Utc::now() - chrono::Duration::days(8))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    {
        let conn = server.db.conn.lock().unwrap();
        conn.execute(
            "UPDATE invites SET expires_at = ?1 WHERE code = ?2",
            rusqlite::params![past, code],
        )
        .unwrap();
    }

    let err = server
        .try_signup("bob", "pw123456", "Bob", Some(code.as_str()))
        .unwrap_err();
    assert_eq!(err.code.as_u16(), 404);
}

#[test]
fn sweep_expires_stale_invites() {
    let server = test_server();
    let alice = server.signup("alice", "pw123456", "Alice");
    let alice_sess = server.connect(&alice);
    let (id, code) = create_invite(&server, &alice_sess, "bob@x.test");

    let past = (chrono::Utc::now() - chrono::Duration::days(8))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    {
        let conn = server.db.conn.lock().unwrap();
        conn.execute(
            "UPDATE invites SET expires_at = ?1 WHERE code = ?2",
            rusqlite::params![past, code],
        )
        .unwrap();
    }
    assert_eq!(server.db.expire_old_invites(), 1);

    let invites = server.db.get_user_invites(&alice).unwrap();
    let invite = invites.iter().find(|i| i.id == id).unwrap();
    assert_eq!(invite.status, InviteStatus::Expired);
}
