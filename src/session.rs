//! Credential digesting and session-token issuance.
//!
//! Passwords are never stored: `credential_digest` is `sha256(salt || password)`
//! hex-encoded, with a fresh random salt per player. Session tokens are 32
//! random bytes hex-encoded -- opaque bearer tokens, not JWTs, since the
//! engine is the only party that ever needs to validate them.

use crate::config::CONFIG;
use crate::error::{codes, EngineError, Refusal};
use crate::store::Store;
use rand::RngCore;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};

pub struct Session {
    pub token: String,
    pub player_id: i64,
    pub expires_at: i64,
}

fn random_hex(nbytes: usize) -> String {
    let mut buf = vec![0u8; nbytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create a new player row with a freshly salted credential digest. Returns
/// the new player id.
pub fn register(store: &Store, name: &str, password: &str, now: i64) -> Result<i64, EngineError> {
    let salt = random_hex(16);
    let credential_digest = digest(&salt, password);
    store
        .execute(
            "INSERT INTO players (name, credential_digest, credential_salt, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![name, credential_digest, salt, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref sqlite_err, _)
                if sqlite_err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                EngineError::Malformed(format!("player name '{name}' already taken"))
            }
            other => EngineError::Db(other.to_string()),
        })?;
    Ok(store.last_insert_rowid())
}

/// Verify credentials and mint a session token good for `CONFIG.session_ttl_sec`.
pub fn login(store: &Store, name: &str, password: &str, now: i64) -> Result<Session, Refusal> {
    let row: Option<(i64, String, String)> = store
        .query_row(
            "SELECT id, credential_digest, credential_salt FROM players WHERE name = ?1",
            rusqlite::params![name],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| Refusal::new(codes::ERR_DB, e.to_string()))?;

    let (player_id, want_digest, salt) = match row {
        Some(v) => v,
        None => return Err(Refusal::new(codes::ERR_NOT_AUTHENTICATED, "bad credentials")),
    };

    if digest(&salt, password) != want_digest {
        return Err(Refusal::new(codes::ERR_NOT_AUTHENTICATED, "bad credentials"));
    }

    let token = random_hex(32);
    let expires_at = now + CONFIG.session_ttl_sec;
    store
        .execute(
            "INSERT INTO sessions (token, player_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![token, player_id, now, expires_at],
        )
        .map_err(|e| Refusal::new(codes::ERR_DB, e.to_string()))?;

    Ok(Session {
        token,
        player_id,
        expires_at,
    })
}

/// Resolve a bearer token to its owning player id, rejecting expired sessions.
pub fn authenticate(store: &Store, token: &str, now: i64) -> Result<i64, Refusal> {
    let row: Option<(i64, i64)> = store
        .query_row(
            "SELECT player_id, expires_at FROM sessions WHERE token = ?1",
            rusqlite::params![token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| Refusal::new(codes::ERR_DB, e.to_string()))?;

    match row {
        Some((player_id, expires_at)) if expires_at > now => Ok(player_id),
        Some(_) => Err(Refusal::not_authenticated()),
        None => Err(Refusal::not_authenticated()),
    }
}

pub fn refresh(store: &Store, token: &str, now: i64) -> Result<i64, Refusal> {
    let new_expires = now + CONFIG.session_ttl_sec;
    let updated = store
        .execute(
            "UPDATE sessions SET expires_at = ?1 WHERE token = ?2 AND expires_at > ?3",
            rusqlite::params![new_expires, token, now],
        )
        .map_err(|e| Refusal::new(codes::ERR_DB, e.to_string()))?;
    if updated == 0 {
        return Err(Refusal::not_authenticated());
    }
    authenticate(store, token, now)
}

pub fn revoke(store: &Store, token: &str) -> Result<(), EngineError> {
    store
        .execute("DELETE FROM sessions WHERE token = ?1", rusqlite::params![token])
        .map_err(|e| EngineError::Db(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::ensure_schema;

    #[test]
    fn register_then_login_round_trips() {
        let store = Store::open_in_memory().unwrap();
        ensure_schema(&store).unwrap();
        let id = register(&store, "kirk", "hunter2", 1_000).unwrap();
        let session = login(&store, "kirk", "hunter2", 1_001).unwrap();
        assert_eq!(session.player_id, id);
        let authed = authenticate(&store, &session.token, 1_002).unwrap();
        assert_eq!(authed, id);
    }

    #[test]
    fn wrong_password_is_refused() {
        let store = Store::open_in_memory().unwrap();
        ensure_schema(&store).unwrap();
        register(&store, "spock", "logical", 1_000).unwrap();
        let err = login(&store, "spock", "illogical", 1_001).unwrap_err();
        assert_eq!(err.code, codes::ERR_NOT_AUTHENTICATED);
    }

    #[test]
    fn expired_session_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        ensure_schema(&store).unwrap();
        register(&store, "sulu", "helm", 1_000).unwrap();
        let session = login(&store, "sulu", "helm", 1_001).unwrap();
        let err = authenticate(&store, &session.token, session.expires_at + 1).unwrap_err();
        assert_eq!(err.code, codes::ERR_NOT_AUTHENTICATED);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        ensure_schema(&store).unwrap();
        register(&store, "uhura", "comms", 1_000).unwrap();
        let err = register(&store, "uhura", "other", 1_001).unwrap_err();
        assert!(matches!(err, EngineError::Malformed(_)));
    }
}
