//! Invite tokens and their short shareable codes.
//!
//! A full token binds inviter username, invitee email, mint time, and fresh
//! entropy under an HMAC-SHA256 tag:
//! `v1|uname|email|unix_ts|entropy_b64|mac_b64`. The ~10-character lookup
//! code is derived deterministically from the full token (HMAC → base64url →
//! truncate), and the full token itself is stored encrypted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::codec::ContentCodec;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "v1";
const CODE_LEN: usize = 10;
const ENTROPY_LEN: usize = 16;

/// Invites are redeemable for 7 days.
pub const INVITE_TTL_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InviteError {
    #[error("malformed invite token")]
    Malformed,
    #[error("invite token signature mismatch")]
    BadSignature,
    #[error("invite token expired")]
    Expired,
}

#[derive(Debug, Clone)]
pub struct MintedInvite {
    pub token: String,
    pub code: String,
    /// AEAD ciphertext of `token`, ready for storage.
    pub token_ciphertext: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct InviteClaims {
    pub inviter_uname: String,
    pub email: String,
    pub issued_at: i64,
}

pub struct InviteTokens {
    mac_key: Vec<u8>,
    codec: ContentCodec,
}

impl InviteTokens {
    pub fn new(invite_key: &[u8]) -> Self {
        InviteTokens {
            mac_key: invite_key.to_vec(),
            codec: ContentCodec::new(invite_key),
        }
    }

    fn tag(&self, payload: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.mac_key).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    pub fn mint(&self, inviter_uname: &str, email: &str) -> MintedInvite {
        let issued_at = chrono::Utc::now().timestamp();
        let entropy: [u8; ENTROPY_LEN] = rand::random();
        let payload = format!(
            "{TOKEN_VERSION}|{inviter_uname}|{email}|{issued_at}|{}",
            URL_SAFE_NO_PAD.encode(entropy)
        );
        let token = format!("{payload}|{}", URL_SAFE_NO_PAD.encode(self.tag(&payload)));
        let code = self.code_for(&token);
        let token_ciphertext = self.codec.encrypt(token.as_bytes());
        MintedInvite {
            token,
            code,
            token_ciphertext,
        }
    }

    /// The short lookup handle: uniform ~60 bits derived from the full token.
    pub fn code_for(&self, token: &str) -> String {
        let digest = self.tag(token);
        URL_SAFE_NO_PAD.encode(digest)[..CODE_LEN].to_string()
    }

    /// Decrypt a stored token and verify tag and TTL.
    pub fn open(&self, token_ciphertext: &[u8], now_ts: i64) -> Result<InviteClaims, InviteError> {
        let raw = self
            .codec
            .decrypt(token_ciphertext)
            .map_err(|_| InviteError::Malformed)?;
        let token = String::from_utf8(raw).map_err(|_| InviteError::Malformed)?;
        self.verify(&token, now_ts)
    }

    pub fn verify(&self, token: &str, now_ts: i64) -> Result<InviteClaims, InviteError> {
        let (payload, mac_b64) = token.rsplit_once('|').ok_or(InviteError::Malformed)?;
        let presented = URL_SAFE_NO_PAD
            .decode(mac_b64)
            .map_err(|_| InviteError::Malformed)?;
        let mut mac = HmacSha256::new_from_slice(&self.mac_key).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        mac.verify_slice(&presented)
            .map_err(|_| InviteError::BadSignature)?;

        let parts: Vec<&str> = payload.split('|').collect();
        if parts.len() != 5 || parts[0] != TOKEN_VERSION {
            return Err(InviteError::Malformed);
        }
        let issued_at: i64 = parts[3].parse().map_err(|_| InviteError::Malformed)?;
        if now_ts - issued_at > INVITE_TTL_SECS {
            return Err(InviteError::Expired);
        }
        Ok(InviteClaims {
            inviter_uname: parts[1].to_string(),
            email: parts[2].to_string(),
            issued_at,
        })
    }
}
