//! Wire frames. Every client frame is a JSON object carrying a caller-chosen
//! `id` plus exactly one verb field; every server frame is one of
//! `{ctrl:…}`, `{data:…}`, `{info:…}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response codes carried in `ctrl` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Ok,
    Created,
    Accepted,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Gone,
    InternalError,
}

impl Code {
    pub fn as_u16(&self) -> u16 {
        match self {
            Code::Ok => 200,
            Code::Created => 201,
            Code::Accepted => 202,
            Code::BadRequest => 400,
            Code::Unauthorized => 401,
            Code::Forbidden => 403,
            Code::NotFound => 404,
            Code::Conflict => 409,
            Code::Gone => 410,
            Code::InternalError => 500,
        }
    }
}

// --- Client → server payloads ---

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub ver: String,
    #[serde(default)]
    pub ua: Option<String>,
    #[serde(default, rename = "deviceId")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Login {
    pub scheme: String,
    pub secret: String,
}

/// Signup (`user:"new"`) or password change (`user:"me"`).
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub user: String,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub login: Option<bool>,
    #[serde(default, rename = "inviteCode")]
    pub invite_code: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub desc: Option<AccountDesc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountDesc {
    #[serde(default)]
    pub public: Option<Value>,
}

/// `{user}` starts (or finds) a DM; `{conv, …}` updates per-member settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DmCall {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub conv: Option<String>,
    #[serde(default)]
    pub favorite: Option<bool>,
    #[serde(default)]
    pub muted: Option<bool>,
    #[serde(default)]
    pub blocked: Option<bool>,
    #[serde(default)]
    pub private: Option<Value>,
    #[serde(default, rename = "disappearingTTL")]
    pub disappearing_ttl: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomCall {
    pub action: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub desc: Option<Value>,
    #[serde(default, rename = "disappearingTTL")]
    pub disappearing_ttl: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessage {
    pub conv: String,
    pub content: Value,
    #[serde(default, rename = "replyTo")]
    pub reply_to: Option<i64>,
    #[serde(default, rename = "viewOnce")]
    pub view_once: Option<bool>,
    #[serde(default, rename = "viewOnceTTL")]
    pub view_once_ttl: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditMessage {
    pub conv: String,
    pub seq: i64,
    pub content: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsendMessage {
    pub conv: String,
    pub seq: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteMessage {
    pub conv: String,
    pub seq: i64,
    #[serde(default, rename = "forEveryone")]
    pub for_everyone: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddReaction {
    pub conv: String,
    pub seq: i64,
    pub emoji: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypingNote {
    pub conv: String,
}

/// Payload of `read` and `recv`.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkSeq {
    pub conv: String,
    pub seq: i64,
}

/// `seq = 0` unpins.
#[derive(Debug, Clone, Deserialize)]
pub struct PinMessage {
    pub conv: String,
    pub seq: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InviteCall {
    #[serde(default)]
    pub create: Option<InviteCreate>,
    #[serde(default)]
    pub list: Option<bool>,
    #[serde(default)]
    pub revoke: Option<String>,
    #[serde(default)]
    pub redeem: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InviteCreate {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactCall {
    #[serde(default)]
    pub add: Option<String>,
    #[serde(default)]
    pub remove: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetCall {
    pub what: String,
    #[serde(default)]
    pub conv: Option<String>,
    #[serde(default)]
    pub before: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchCall {
    pub query: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// One inbound frame. Exactly one verb field must be present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientFrame {
    pub id: Option<String>,
    pub hi: Option<Hello>,
    pub login: Option<Login>,
    pub acc: Option<Account>,
    pub dm: Option<DmCall>,
    pub room: Option<RoomCall>,
    pub get: Option<GetCall>,
    pub send: Option<SendMessage>,
    pub edit: Option<EditMessage>,
    pub unsend: Option<UnsendMessage>,
    pub delete: Option<DeleteMessage>,
    pub react: Option<AddReaction>,
    pub typing: Option<TypingNote>,
    pub read: Option<MarkSeq>,
    pub recv: Option<MarkSeq>,
    pub pin: Option<PinMessage>,
    pub invite: Option<InviteCall>,
    pub contact: Option<ContactCall>,
    pub search: Option<SearchCall>,
    pub file: Option<Value>,
}

/// The verb a frame carries, with its payload moved out.
#[derive(Debug, Clone)]
pub enum Verb {
    Hi(Hello),
    Login(Login),
    Acc(Account),
    Dm(DmCall),
    Room(RoomCall),
    Get(GetCall),
    Send(SendMessage),
    Edit(EditMessage),
    Unsend(UnsendMessage),
    Delete(DeleteMessage),
    React(AddReaction),
    Typing(TypingNote),
    Read(MarkSeq),
    Recv(MarkSeq),
    Pin(PinMessage),
    Invite(InviteCall),
    Contact(ContactCall),
    Search(SearchCall),
    File(Value),
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Hi(_) => "hi",
            Verb::Login(_) => "login",
            Verb::Acc(_) => "acc",
            Verb::Dm(_) => "dm",
            Verb::Room(_) => "room",
            Verb::Get(_) => "get",
            Verb::Send(_) => "send",
            Verb::Edit(_) => "edit",
            Verb::Unsend(_) => "unsend",
            Verb::Delete(_) => "delete",
            Verb::React(_) => "react",
            Verb::Typing(_) => "typing",
            Verb::Read(_) => "read",
            Verb::Recv(_) => "recv",
            Verb::Pin(_) => "pin",
            Verb::Invite(_) => "invite",
            Verb::Contact(_) => "contact",
            Verb::Search(_) => "search",
            Verb::File(_) => "file",
        }
    }
}

impl ClientFrame {
    /// Extract the single verb. Errors when none or more than one is set.
    pub fn into_verb(self) -> Result<Verb, &'static str> {
        let mut verbs: Vec<Verb> = Vec::with_capacity(1);
        if let Some(p) = self.hi {
            verbs.push(Verb::Hi(p));
        }
        if let Some(p) = self.login {
            verbs.push(Verb::Login(p));
        }
        if let Some(p) = self.acc {
            verbs.push(Verb::Acc(p));
        }
        if let Some(p) = self.dm {
            verbs.push(Verb::Dm(p));
        }
        if let Some(p) = self.room {
            verbs.push(Verb::Room(p));
        }
        if let Some(p) = self.get {
            verbs.push(Verb::Get(p));
        }
        if let Some(p) = self.send {
            verbs.push(Verb::Send(p));
        }
        if let Some(p) = self.edit {
            verbs.push(Verb::Edit(p));
        }
        if let Some(p) = self.unsend {
            verbs.push(Verb::Unsend(p));
        }
        if let Some(p) = self.delete {
            verbs.push(Verb::Delete(p));
        }
        if let Some(p) = self.react {
            verbs.push(Verb::React(p));
        }
        if let Some(p) = self.typing {
            verbs.push(Verb::Typing(p));
        }
        if let Some(p) = self.read {
            verbs.push(Verb::Read(p));
        }
        if let Some(p) = self.recv {
            verbs.push(Verb::Recv(p));
        }
        if let Some(p) = self.pin {
            verbs.push(Verb::Pin(p));
        }
        if let Some(p) = self.invite {
            verbs.push(Verb::Invite(p));
        }
        if let Some(p) = self.contact {
            verbs.push(Verb::Contact(p));
        }
        if let Some(p) = self.search {
            verbs.push(Verb::Search(p));
        }
        if let Some(p) = self.file {
            verbs.push(Verb::File(p));
        }
        match verbs.len() {
            0 => Err("frame carries no verb"),
            1 => Ok(verbs.pop().unwrap()),
            _ => Err("frame carries more than one verb"),
        }
    }
}

// --- Server → client frames ---

#[derive(Debug, Serialize, Clone)]
pub struct Ctrl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub ts: String,
}

/// New-message fan-out. `content` is the sender's opaque JSON, decrypted.
#[derive(Debug, Serialize, Clone)]
pub struct Data {
    pub conv: String,
    pub seq: i64,
    pub from: String,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<Value>,
    pub ts: String,
}

/// Side-channel events: typing, edit, unsend, delete, react, read, recv,
/// pin, unpin, presence, disappearing_updated, member_joined, member_left,
/// member_kicked, room_updated.
#[derive(Debug, Serialize, Clone)]
pub struct Info {
    pub what: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    pub ts: String,
}

impl Info {
    pub fn new(what: &str, ts: String) -> Self {
        Info {
            what: what.to_string(),
            conv: None,
            from: None,
            seq: None,
            content: None,
            emoji: None,
            user: None,
            online: None,
            ttl: None,
            desc: None,
            last_seen: None,
            ts,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub enum ServerFrame {
    #[serde(rename = "ctrl")]
    Ctrl(Ctrl),
    #[serde(rename = "data")]
    Data(Data),
    #[serde(rename = "info")]
    Info(Info),
}

impl ServerFrame {
    pub fn ctrl(&self) -> Option<&Ctrl> {
        match self {
            ServerFrame::Ctrl(c) => Some(c),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&Data> {
        match self {
            ServerFrame::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn info(&self) -> Option<&Info> {
        match self {
            ServerFrame::Info(i) => Some(i),
            _ => None,
        }
    }
}
