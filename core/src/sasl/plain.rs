/*
 * plain.rs
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

//! PLAIN SASL (RFC 4616). Single round.

use super::{SaslClient, SaslError, SaslMechanism};

/// Build PLAIN response: authzid NUL authcid NUL password (UTF-8).
pub fn encode_plain(authzid: &str, authcid: &str, password: &str) -> Vec<u8> {
    format!("{}\0{}\0{}", authzid, authcid, password).into_bytes()
}

pub struct Plain {
    authzid: String,
    authcid: String,
    password: String,
    sent: bool,
}

impl Plain {
    pub fn new(authzid: &str, authcid: &str, password: &str) -> Self {
        Self {
            authzid: authzid.to_string(),
            authcid: authcid.to_string(),
            password: password.to_string(),
            sent: false,
        }
    }
}

impl SaslClient for Plain {
    fn mechanism(&self) -> SaslMechanism {
        SaslMechanism::Plain
    }

    fn is_authenticated(&self) -> bool {
        self.sent
    }

    fn step(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        if self.sent {
            return Err(SaslError::Completed("PLAIN"));
        }
        self.sent = true;
        Ok(encode_plain(&self.authzid, &self.authcid, &self.password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_response_with_nul_separators() {
        let mut p = Plain::new("", "tim", "tanstaaf");
        assert_eq!(p.step(b"").unwrap(), b"\0tim\0tanstaaf".to_vec());
        assert!(p.is_authenticated());
        assert_eq!(p.step(b""), Err(SaslError::Completed("PLAIN")));
    }
}
