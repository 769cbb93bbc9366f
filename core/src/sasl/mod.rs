/*
 * mod.rs
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

//! SASL client: SCRAM-SHA-256, CRAM-MD5, PLAIN, LOGIN.
//!
//! Every mechanism is an opaque state machine behind [`SaslClient`]. The caller
//! feeds it the decoded server challenge (an empty slice for the first round)
//! and sends back whatever `step` returns; base64 framing is the caller's job.

mod cram_md5;
mod login;
mod mechanism;
mod plain;
mod scram;

pub use cram_md5::CramMd5;
pub use login::Login;
pub use mechanism::{select_mechanism, SaslMechanism, PREFERENCE};
pub use plain::{encode_plain, Plain};
pub use scram::ScramSha256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaslError {
    #[error("invalid server message: {0}")]
    InvalidChallenge(&'static str),
    #[error("{0} exchange already complete")]
    Completed(&'static str),
    #[error("server signature did not verify")]
    ServerSignature,
    #[error("server rejected exchange: {0}")]
    ServerError(String),
}

/// Client side of one SASL exchange.
pub trait SaslClient: Send {
    fn mechanism(&self) -> SaslMechanism;

    /// True once the client has sent its last response (and, for mechanisms
    /// with mutual authentication, verified the server).
    fn is_authenticated(&self) -> bool;

    /// Produce the response to a decoded server challenge.
    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError>;
}

/// Instantiate the client for `mechanism` with the given credentials.
pub fn new_client(mechanism: SaslMechanism, username: &str, password: &str) -> Box<dyn SaslClient> {
    match mechanism {
        SaslMechanism::ScramSha256 => Box::new(ScramSha256::new(username, password)),
        SaslMechanism::CramMd5 => Box::new(CramMd5::new(username, password)),
        SaslMechanism::Plain => Box::new(Plain::new("", username, password)),
        SaslMechanism::Login => Box::new(Login::new(username, password)),
    }
}

pub(crate) fn bytes_to_hex(b: &[u8]) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut s = String::with_capacity(b.len() * 2);
    for &x in b {
        s.push(HEX[(x >> 4) as usize] as char);
        s.push(HEX[(x & 15) as usize] as char);
    }
    s
}
