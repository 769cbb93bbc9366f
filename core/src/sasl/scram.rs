/*
 * scram.rs
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

//! SCRAM-SHA-256 SASL client (RFC 5802, 7677).
//!
//! Three rounds: client-first, client-final (after server-first), then an
//! empty response once the server-final signature has been verified.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

use super::{SaslClient, SaslError, SaslMechanism};

type HmacSha256 = Hmac<Sha256>;

/// gs2-header: no channel binding, no authzid.
const GS2_HEADER: &str = "n,,";

enum State {
    Initial,
    ClientFirstSent { client_first_bare: String },
    ClientFinalSent { server_signature: Vec<u8> },
    Authenticated,
}

pub struct ScramSha256 {
    username: String,
    password: String,
    client_nonce: String,
    state: State,
}

impl ScramSha256 {
    pub fn new(username: &str, password: &str) -> Self {
        Self::with_nonce(username, password, &generate_nonce())
    }

    pub(crate) fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            state: State::Initial,
        }
    }

    fn client_first(&mut self) -> Vec<u8> {
        let client_first_bare = format!("n={},r={}", sasl_name(&self.username), self.client_nonce);
        let message = format!("{}{}", GS2_HEADER, client_first_bare);
        self.state = State::ClientFirstSent { client_first_bare };
        message.into_bytes()
    }

    fn client_final(&mut self, client_first_bare: &str, server_first: &[u8]) -> Result<Vec<u8>, SaslError> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| SaslError::InvalidChallenge("server-first not UTF-8"))?;
        let (nonce, salt_b64, iter_str) = parse_server_first(server_first)?;
        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(SaslError::InvalidChallenge("server nonce must extend client nonce"));
        }
        let salt = BASE64
            .decode(salt_b64.as_bytes())
            .map_err(|_| SaslError::InvalidChallenge("invalid salt base64"))?;
        let iterations: u32 = iter_str
            .parse()
            .map_err(|_| SaslError::InvalidChallenge("invalid iteration count"))?;
        if iterations == 0 {
            return Err(SaslError::InvalidChallenge("invalid iteration count"));
        }

        let salted_password = hi(&self.password, &salt, iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let server_key = hmac(&salted_password, b"Server Key");

        let client_final_no_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), nonce);
        let auth_message = format!("{},{},{}", client_first_bare, server_first, client_final_no_proof);
        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(x, y)| x ^ y)
            .collect();

        self.state = State::ClientFinalSent {
            server_signature: hmac(&server_key, auth_message.as_bytes()),
        };
        Ok(format!("{},p={}", client_final_no_proof, BASE64.encode(client_proof)).into_bytes())
    }

    fn verify_server_final(&mut self, expected: &[u8], server_final: &[u8]) -> Result<Vec<u8>, SaslError> {
        let server_final = std::str::from_utf8(server_final)
            .map_err(|_| SaslError::InvalidChallenge("server-final not UTF-8"))?;
        for part in server_final.split(',') {
            if let Some(err) = part.strip_prefix("e=") {
                return Err(SaslError::ServerError(err.to_string()));
            }
            if let Some(v) = part.strip_prefix("v=") {
                let signature = BASE64
                    .decode(v.trim().as_bytes())
                    .map_err(|_| SaslError::InvalidChallenge("invalid verifier base64"))?;
                if signature != expected {
                    return Err(SaslError::ServerSignature);
                }
                self.state = State::Authenticated;
                return Ok(Vec::new());
            }
        }
        Err(SaslError::InvalidChallenge("missing v in server-final"))
    }
}

impl SaslClient for ScramSha256 {
    fn mechanism(&self) -> SaslMechanism {
        SaslMechanism::ScramSha256
    }

    fn is_authenticated(&self) -> bool {
        matches!(self.state, State::Authenticated)
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        match std::mem::replace(&mut self.state, State::Initial) {
            State::Initial => Ok(self.client_first()),
            State::ClientFirstSent { client_first_bare } => {
                self.client_final(&client_first_bare, challenge)
            }
            State::ClientFinalSent { server_signature } => {
                self.verify_server_final(&server_signature, challenge)
            }
            State::Authenticated => {
                self.state = State::Authenticated;
                Err(SaslError::Completed("SCRAM-SHA-256"))
            }
        }
    }
}

fn generate_nonce() -> String {
    let mut raw = [0u8; 18];
    if getrandom::getrandom(&mut raw).is_err() {
        // Fall back to the clock; uniqueness matters more than secrecy here.
        use std::time::{SystemTime, UNIX_EPOCH};
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        raw[..16].copy_from_slice(&t.to_le_bytes());
    }
    BASE64.encode(raw)
}

fn sasl_name(s: &str) -> String {
    s.replace('=', "=3D").replace(',', "=2C")
}

fn parse_server_first(input: &str) -> Result<(String, String, String), SaslError> {
    let mut r = None;
    let mut s = None;
    let mut i = None;
    for part in input.split(',') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("r=") {
            r = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("s=") {
            s = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("i=") {
            i = Some(v.to_string());
        }
    }
    let r = r.ok_or(SaslError::InvalidChallenge("missing r in server-first"))?;
    let s = s.ok_or(SaslError::InvalidChallenge("missing s in server-first"))?;
    let i = i.ok_or(SaslError::InvalidChallenge("missing i in server-first"))?;
    Ok((r, s, i))
}

fn hi(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out.to_vec()
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7677 section 3.
    const NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn rfc7677_exchange() {
        let mut s = ScramSha256::with_nonce("user", "pencil", NONCE);
        let first = s.step(b"").unwrap();
        assert_eq!(first, b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO".to_vec());
        let fin = s.step(SERVER_FIRST.as_bytes()).unwrap();
        assert_eq!(String::from_utf8(fin).unwrap(), CLIENT_FINAL);
        assert!(!s.is_authenticated());
        let last = s.step(SERVER_FINAL.as_bytes()).unwrap();
        assert!(last.is_empty());
        assert!(s.is_authenticated());
    }

    #[test]
    fn bad_server_signature() {
        let mut s = ScramSha256::with_nonce("user", "pencil", NONCE);
        s.step(b"").unwrap();
        s.step(SERVER_FIRST.as_bytes()).unwrap();
        let forged = format!("v={}", BASE64.encode([0u8; 32]));
        assert_eq!(s.step(forged.as_bytes()), Err(SaslError::ServerSignature));
        assert!(!s.is_authenticated());
    }

    #[test]
    fn nonce_must_extend_client_nonce() {
        let mut s = ScramSha256::with_nonce("user", "pencil", NONCE);
        s.step(b"").unwrap();
        let r = s.step(b"r=somethingelse,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096");
        assert!(matches!(r, Err(SaslError::InvalidChallenge(_))));
    }

    #[test]
    fn username_is_escaped() {
        assert_eq!(sasl_name("a=b,c"), "a=3Db=2Cc");
    }
}
