/*
 * cram_md5.rs
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

//! CRAM-MD5 (RFC 2195): one response, "user hex(HMAC-MD5(password, challenge))".

use hmac::{Hmac, Mac};

use super::{bytes_to_hex, SaslClient, SaslError, SaslMechanism};

type HmacMd5 = Hmac<md5::Md5>;

pub struct CramMd5 {
    username: String,
    password: String,
    done: bool,
}

impl CramMd5 {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            done: false,
        }
    }
}

impl SaslClient for CramMd5 {
    fn mechanism(&self) -> SaslMechanism {
        SaslMechanism::CramMd5
    }

    fn is_authenticated(&self) -> bool {
        self.done
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        if self.done {
            return Err(SaslError::Completed("CRAM-MD5"));
        }
        if challenge.is_empty() {
            return Err(SaslError::InvalidChallenge("CRAM-MD5 challenge is empty"));
        }
        // HMAC accepts keys of any length.
        let mut mac = HmacMd5::new_from_slice(self.password.as_bytes())
            .map_err(|_| SaslError::InvalidChallenge("CRAM-MD5 key"))?;
        mac.update(challenge);
        let digest = mac.finalize().into_bytes();
        self.done = true;
        Ok(format!("{} {}", self.username, bytes_to_hex(&digest)).into_bytes())
    }
}
