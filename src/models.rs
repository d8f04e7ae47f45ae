use serde::{Deserialize, Serialize};

/// Lifecycle state of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    Ok,
    Suspended,
    Deleted,
}

impl UserState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserState::Ok => "ok",
            UserState::Suspended => "suspended",
            UserState::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "suspended" => UserState::Suspended,
            "deleted" => UserState::Deleted,
            _ => UserState::Ok,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub state: UserState,
    /// Opaque client-owned profile (display name, avatar, …).
    pub public: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    pub user_agent: String,
    pub must_change_password: bool,
}

#[derive(Debug, Clone)]
pub struct AuthRecord {
    pub user_id: String,
    pub scheme: String,
    /// Salted hash for `basic`, opaque otherwise.
    pub secret: String,
    pub uname: Option<String>,
}

/// DM or room. `owner_id` is set iff `kind == Room`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Dm,
    Room,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Dm => "dm",
            ConversationKind::Room => "room",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "room" { ConversationKind::Room } else { ConversationKind::Dm }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<serde_json::Value>,
    pub last_seq: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_msg_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disappearing_ttl: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_by: Option<String>,
    pub no_screenshots: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Member role with a total order for permission checks:
/// `Member < Admin < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "owner" => Role::Owner,
            "admin" => Role::Admin,
            _ => Role::Member,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Member {
    pub conversation_id: String,
    pub user_id: String,
    pub role: Role,
    pub read_seq: i64,
    pub recv_seq: i64,
    pub clear_seq: i64,
    pub favorite: bool,
    pub muted: bool,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Member {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub seq: i64,
    pub from_user_id: String,
    pub created_at: String,
    pub updated_at: String,
    /// AEAD ciphertext of the caller-supplied content.
    #[serde(skip)]
    pub content: Vec<u8>,
    /// Metadata bag: edit_count, edited_at, reactions, reply_to, unsent,
    /// view_once, view_once_ttl.
    pub head: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    pub view_once: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_once_ttl: Option<i64>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn edit_count(&self) -> i64 {
        self.head.get("edit_count").and_then(|v| v.as_i64()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Used,
    Expired,
    Revoked,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Used => "used",
            InviteStatus::Expired => "expired",
            InviteStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "used" => InviteStatus::Used,
            "expired" => InviteStatus::Expired,
            "revoked" => InviteStatus::Revoked,
            _ => InviteStatus::Pending,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Invite {
    pub id: String,
    pub inviter_id: String,
    /// Short URL-safe redemption handle.
    pub code: String,
    /// AEAD ciphertext of the full invite token. Never serialized.
    #[serde(skip)]
    pub token: Vec<u8>,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitee_name: Option<String>,
    pub status: InviteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_by: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Contact {
    pub user_id: String,
    pub contact_id: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_id: Option<String>,
    pub created_at: String,
}

// --- Read-model composites ---

/// One row of `get{what:"conversations"}`: the conversation joined with the
/// caller's membership, the DM peer, and the pinned message seq.
#[derive(Debug, Serialize, Clone)]
pub struct ConversationEntry {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub role: Role,
    pub read_seq: i64,
    pub recv_seq: i64,
    pub clear_seq: i64,
    pub favorite: bool,
    pub muted: bool,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_seq: Option<i64>,
}

/// The other side of a DM.
#[derive(Debug, Serialize, Clone)]
pub struct PeerInfo {
    pub id: String,
    pub public: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    pub online: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct MemberEntry {
    pub user_id: String,
    pub role: Role,
    pub public: serde_json::Value,
    pub read_seq: i64,
    pub recv_seq: i64,
}

#[derive(Debug, Serialize, Clone)]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_seq: i64,
    pub recv_seq: i64,
}

#[derive(Debug, Serialize, Clone)]
pub struct ContactEntry {
    pub user_id: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub public: serde_json::Value,
    pub online: bool,
    pub created_at: String,
}
