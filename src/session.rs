use std::sync::Arc;

use anyhow::Result;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use crate::storage::{self, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("token is empty")]
    EmptyToken,
}

/// Claims read from the token payload. Nothing here is verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    pub username: Option<String>,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The persisted bearer token plus an in-memory copy of it.
///
/// Shared by the API client (which attaches and clears it) and the UI
/// (which reads the username for "is this mine" decisions).
pub struct Session {
    store: Arc<storage::Store>,
    token: RwLock<Option<String>>,
}

impl Session {
    pub fn new(store: Arc<storage::Store>) -> Result<Self> {
        let token = store.get(ACCESS_TOKEN_KEY)?.filter(|t| !t.trim().is_empty());
        Ok(Self {
            store,
            token: RwLock::new(token),
        })
    }

    pub fn save(&self, token: &str, refresh_token: Option<&str>) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SessionError::EmptyToken.into());
        }
        self.store.put(ACCESS_TOKEN_KEY, token)?;
        match refresh_token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(refresh) => self.store.put(REFRESH_TOKEN_KEY, refresh)?,
            None => self.store.remove(REFRESH_TOKEN_KEY)?,
        }
        *self.token.write() = Some(token.to_string());
        tracing::info!(token_len = token.len(), "session saved");
        Ok(())
    }

    pub fn read(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.store.get(REFRESH_TOKEN_KEY).ok().flatten()
    }

    /// The in-memory token is dropped even if the storage delete fails.
    pub fn clear(&self) -> Result<()> {
        let had_token = self.token.write().take().is_some();
        self.store.remove(ACCESS_TOKEN_KEY)?;
        self.store.remove(REFRESH_TOKEN_KEY)?;
        if had_token {
            tracing::info!("session cleared");
        }
        Ok(())
    }

    pub fn claims(&self) -> Option<Claims> {
        let token = self.token.read();
        token.as_deref().and_then(decode_claims)
    }

    pub fn current_username(&self) -> Option<String> {
        self.claims().and_then(|claims| claims.username)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.claims()
            .and_then(|claims| claims.expires_at)
            .map(|exp| exp <= now)
            .unwrap_or(false)
    }

    /// True when `author` is the logged-in user. Display only.
    pub fn is_mine(&self, author: &str) -> bool {
        match self.current_username() {
            Some(me) => !author.is_empty() && me == author,
            None => false,
        }
    }
}

/// Decodes the middle segment of a `header.payload.signature` token.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .or_else(|_| STANDARD.decode(payload))
        .ok()?;
    let raw: Value = serde_json::from_slice(&bytes).ok()?;
    if !raw.is_object() {
        return None;
    }
    // A numeric `sub` is used only when no textual name is present.
    let username = text_claim(&raw, "sub")
        .or_else(|| text_claim(&raw, "username"))
        .or_else(|| raw.get("sub").filter(|v| v.is_number()).map(Value::to_string));
    let expires_at = raw
        .get("exp")
        .and_then(Value::as_f64)
        .filter(|ts| ts.is_finite())
        .and_then(|ts| Utc.timestamp_opt(ts.trunc() as i64, 0).single());
    Some(Claims {
        username,
        email: text_claim(&raw, "email"),
        expires_at,
    })
}

fn text_claim(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) fn test_token(payload: &str) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
        URL_SAFE_NO_PAD.encode(payload)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Options;
    use tempfile::{tempdir, TempDir};

    fn session() -> (TempDir, Session) {
        let dir = tempdir().unwrap();
        let store = storage::Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();
        (dir, Session::new(Arc::new(store)).unwrap())
    }

    #[test]
    fn username_from_sub_claim() {
        let (_dir, session) = session();
        session
            .save(&test_token(r#"{"sub":"alice","exp":4102444800}"#), None)
            .unwrap();
        assert_eq!(session.current_username().as_deref(), Some("alice"));
        assert!(session.is_mine("alice"));
        assert!(!session.is_mine("bob"));
    }

    #[test]
    fn username_falls_back_to_username_claim() {
        let claims = decode_claims(&test_token(r#"{"username":"carol","email":"c@x.io"}"#))
            .unwrap();
        assert_eq!(claims.username.as_deref(), Some("carol"));
        assert_eq!(claims.email.as_deref(), Some("c@x.io"));
    }

    #[test]
    fn no_token_means_no_username() {
        let (_dir, session) = session();
        assert_eq!(session.read(), None);
        assert_eq!(session.current_username(), None);
        assert!(!session.is_mine(""));
    }

    #[test]
    fn garbage_token_fails_soft() {
        let (_dir, session) = session();
        session.save("abc.def.ghi", None).unwrap();
        assert_eq!(session.read().as_deref(), Some("abc.def.ghi"));
        assert_eq!(session.current_username(), None);
        assert!(!session.is_expired(Utc::now()));
    }

    #[test]
    fn clear_removes_persisted_token() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Arc::new(
            storage::Store::open(Options {
                path: Some(path.clone()),
            })
            .unwrap(),
        );
        let session = Session::new(store.clone()).unwrap();
        session.save("a.b.c", Some("refresh")).unwrap();
        assert_eq!(session.refresh_token().as_deref(), Some("refresh"));

        let reopened = Session::new(store.clone()).unwrap();
        assert_eq!(reopened.read().as_deref(), Some("a.b.c"));

        session.clear().unwrap();
        assert_eq!(session.read(), None);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(session.refresh_token(), None);
    }

    #[test]
    fn empty_token_is_rejected() {
        let (_dir, session) = session();
        assert!(session.save("   ", None).is_err());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn expiry_is_read_from_exp() {
        let (_dir, session) = session();
        session
            .save(&test_token(r#"{"sub":"dave","exp":1000}"#), None)
            .unwrap();
        assert!(session.is_expired(Utc::now()));
    }

    #[test]
    fn fractional_exp_still_yields_username() {
        let claims = decode_claims(&test_token(r#"{"sub":"alice","exp":1.7e9}"#)).unwrap();
        assert_eq!(claims.username.as_deref(), Some("alice"));
        assert_eq!(
            claims.expires_at,
            Utc.timestamp_opt(1_700_000_000, 0).single()
        );
    }

    #[test]
    fn numeric_sub_falls_back_to_username() {
        let claims = decode_claims(&test_token(r#"{"sub":42,"username":"bob"}"#)).unwrap();
        assert_eq!(claims.username.as_deref(), Some("bob"));

        let id_only = decode_claims(&test_token(r#"{"sub":42,"exp":"soon"}"#)).unwrap();
        assert_eq!(id_only.username.as_deref(), Some("42"));
        assert_eq!(id_only.expires_at, None);
    }
}
