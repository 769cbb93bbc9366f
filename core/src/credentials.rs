/*
 * credentials.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Apribuste, a POP3 mail retrieval library.
 *
 * Apribuste is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Apribuste is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Apribuste.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Credential sources. A source resolves the mailbox URL
//! (pop3://user@host:port) to a username and secret; the client asks once
//! per authentication attempt.

use std::fmt;

use keyring::Entry;

/// Service name for keyring entries (one entry per mailbox URI).
const KEYRING_SERVICE: &str = "apribuste";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// Resolves a target resource (mailbox URL) to credentials.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self, target: &str) -> Result<Credentials, String>;
}

/// Fixed credentials, whatever the target.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self(Credentials::new(username, password))
    }
}

impl CredentialSource for StaticCredentials {
    fn credentials(&self, _target: &str) -> Result<Credentials, String> {
        Ok(self.0.clone())
    }
}

/// Credentials held in the system keychain, keyed by mailbox URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringCredentials;

impl CredentialSource for KeyringCredentials {
    fn credentials(&self, target: &str) -> Result<Credentials, String> {
        let entry = Entry::new(KEYRING_SERVICE, target).map_err(|e| e.to_string())?;
        let secret = entry.get_secret().map_err(|e| format!("{}: {}", target, e))?;
        decode_credential_secret(&secret).ok_or_else(|| format!("{}: malformed keychain entry", target))
    }
}

fn contains_nul(s: &str) -> bool {
    s.contains('\0')
}

/// Encode (username, password) as: 4-byte LE username length + username UTF-8 + password UTF-8.
fn encode_credential_secret(username: &str, password: &str) -> Vec<u8> {
    let u = username.as_bytes();
    let p = password.as_bytes();
    let mut out = Vec::with_capacity(4 + u.len() + p.len());
    out.extend_from_slice(&(u.len() as u32).to_le_bytes());
    out.extend_from_slice(u);
    out.extend_from_slice(p);
    out
}

fn decode_credential_secret(secret: &[u8]) -> Option<Credentials> {
    let len_bytes: [u8; 4] = secret.get(..4)?.try_into().ok()?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let rest = &secret[4..];
    if len > rest.len() {
        return None;
    }
    let username = std::str::from_utf8(&rest[..len]).ok()?;
    let password = std::str::from_utf8(&rest[len..]).ok()?;
    Some(Credentials::new(username, password))
}

/// Store credentials for `uri` in the system keychain. Rejects U+0000 in any value.
pub fn save_keyring_credential(uri: &str, username: &str, password: &str) -> Result<(), String> {
    if contains_nul(uri) || contains_nul(username) || contains_nul(password) {
        return Err("credential values must not contain NUL (U+0000)".to_string());
    }
    let entry = Entry::new(KEYRING_SERVICE, uri).map_err(|e| e.to_string())?;
    entry
        .set_secret(&encode_credential_secret(username, password))
        .map_err(|e| e.to_string())
}

/// Remove one credential from the system keychain. No-op if the entry does not exist.
pub fn delete_keyring_credential(uri: &str) -> Result<(), String> {
    let entry = Entry::new(KEYRING_SERVICE, uri).map_err(|e| e.to_string())?;
    let _ = entry.delete_credential();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_encoding() {
        let secret = encode_credential_secret("tim", "tanstaaf");
        assert_eq!(&secret[..4], &[3, 0, 0, 0]);
        assert_eq!(decode_credential_secret(&secret), Some(Credentials::new("tim", "tanstaaf")));
        // Password may be empty; username may contain anything but NUL.
        let secret = encode_credential_secret("a@b:c", "");
        assert_eq!(decode_credential_secret(&secret), Some(Credentials::new("a@b:c", "")));
    }

    #[test]
    fn malformed_secrets() {
        assert_eq!(decode_credential_secret(&[1, 0]), None);
        assert_eq!(decode_credential_secret(&[9, 0, 0, 0, b'x']), None);
        assert_eq!(decode_credential_secret(&[1, 0, 0, 0, 0xff]), None);
    }

    #[test]
    fn debug_hides_password() {
        let c = Credentials::new("tim", "tanstaaf");
        let shown = format!("{:?}", c);
        assert!(shown.contains("tim"));
        assert!(!shown.contains("tanstaaf"));
    }

    #[test]
    fn nul_is_rejected_before_touching_the_keychain() {
        assert!(save_keyring_credential("pop3://h:110", "a\0b", "pw").is_err());
    }

    #[test]
    fn static_source_ignores_target() {
        let s = StaticCredentials::new("u", "p");
        assert_eq!(s.credentials("pop3://x:1").unwrap().username, "u");
    }
}
