use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    error::{AppError, AppResult},
    models::OwnerId,
};

pub const SESSION_COOKIE: &str = "session";
pub const SESSION_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 7;

const SESSION_SALT: &[u8] = b"steamrec-session";

type HmacSha256 = Hmac<Sha256>;

/// Signs and resolves the opaque session token stored in the cookie
///
/// Token layout: `base64(owner_id) "." base64(tag)` where the tag is
/// HMAC-SHA256 over the salt and the owner id.
#[derive(Clone)]
pub struct SessionSigner {
    secret: Vec<u8>,
}

impl SessionSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    pub fn sign(&self, owner_id: &str) -> AppResult<String> {
        let tag = self
            .mac(owner_id.as_bytes())
            .map_err(|e| AppError::Internal(format!("Session signing failed: {}", e)))?
            .finalize()
            .into_bytes();

        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(owner_id.as_bytes()),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    /// Owner id carried by a valid token, `None` for anything tampered or malformed
    pub fn resolve(&self, token: &str) -> Option<OwnerId> {
        let (payload, tag) = token.split_once('.')?;
        let owner_id = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;

        // constant-time comparison
        self.mac(&owner_id).ok()?.verify_slice(&tag).ok()?;

        String::from_utf8(owner_id).ok().filter(|id| !id.is_empty())
    }

    fn mac(&self, message: &[u8]) -> Result<HmacSha256, hmac::digest::InvalidLength> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)?;
        mac.update(SESSION_SALT);
        mac.update(message);
        Ok(mac)
    }
}

/// Finds a cookie value in a raw `Cookie` header
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// `Set-Cookie` value that stores the session
pub fn session_cookie(token: &str) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, token, SESSION_MAX_AGE_SECS
    )
}

/// `Set-Cookie` value that clears the session
pub fn expired_session_cookie() -> String {
    format!("{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax", SESSION_COOKIE)
}
