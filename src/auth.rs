//! Caller identity.
//!
//! Requests carry `Authorization: Bearer <token>` where the token is
//! `{user_id}.{hex(HMAC-SHA256(secret, user_id))}`. Issuing tokens to end
//! users is out of scope; `pdfchat token <user_id>` mints one for local use.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &str, user_id: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid session secret: {}", e))?;
    mac.update(user_id.as_bytes());
    Ok(mac)
}

/// Mint a session token for `user_id`.
pub fn mint_token(secret: &str, user_id: &str) -> Result<String> {
    if user_id.trim().is_empty() {
        return Err(Error::BadRequest("user id must not be empty".into()));
    }
    let signature = mac_for(secret, user_id)?.finalize().into_bytes();
    Ok(format!("{}.{}", user_id, hex::encode(signature)))
}

/// Verify a token and return the user id it names.
pub fn verify_token(secret: &str, token: &str) -> Result<String> {
    let unauthorized = || Error::Unauthorized("Unauthorized".into());

    let (user_id, signature) = token.rsplit_once('.').ok_or_else(unauthorized)?;
    if user_id.is_empty() {
        return Err(unauthorized());
    }
    let signature = hex::decode(signature).map_err(|_| unauthorized())?;

    mac_for(secret, user_id)?
        .verify_slice(&signature)
        .map_err(|_| unauthorized())?;

    Ok(user_id.to_string())
}

/// Extract the token from an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
