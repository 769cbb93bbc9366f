/*
 * mechanism.rs
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

//! SASL mechanism names and the client preference table.

/// Supported SASL mechanisms (client-side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaslMechanism {
    /// SCRAM-SHA-256 (RFC 5802, 7677): challenge-response with server verification.
    ScramSha256,
    /// CRAM-MD5 (RFC 2195): challenge-response.
    CramMd5,
    /// PLAIN (RFC 4616).
    Plain,
    /// Legacy LOGIN.
    Login,
}

/// Client preference order, strongest first. Intersected at runtime with the
/// mechanisms the server lists in its `SASL` capability.
pub const PREFERENCE: [SaslMechanism; 4] = [
    SaslMechanism::ScramSha256,
    SaslMechanism::CramMd5,
    SaslMechanism::Plain,
    SaslMechanism::Login,
];

impl SaslMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::CramMd5 => "CRAM-MD5",
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::Login => "LOGIN",
        }
    }

    /// True when the password never crosses the wire in a recoverable form.
    pub fn is_challenge_response(&self) -> bool {
        matches!(self, SaslMechanism::CramMd5 | SaslMechanism::ScramSha256)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "SCRAM-SHA-256" => Some(SaslMechanism::ScramSha256),
            "CRAM-MD5" => Some(SaslMechanism::CramMd5),
            "PLAIN" => Some(SaslMechanism::Plain),
            "LOGIN" => Some(SaslMechanism::Login),
            _ => None,
        }
    }
}

impl std::fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Pick the first mechanism in preference order that the server advertises and
/// the caller allows. Server names are compared case-insensitively.
pub fn select_mechanism(advertised: &[String], allowed: &[SaslMechanism]) -> Option<SaslMechanism> {
    PREFERENCE.iter().copied().find(|m| {
        allowed.contains(m) && advertised.iter().any(|a| a.eq_ignore_ascii_case(m.name()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strongest_advertised_wins() {
        let advertised = names(&["PLAIN", "LOGIN", "CRAM-MD5"]);
        assert_eq!(
            select_mechanism(&advertised, &PREFERENCE),
            Some(SaslMechanism::CramMd5)
        );
    }

    #[test]
    fn caller_can_exclude_mechanisms() {
        let advertised = names(&["scram-sha-256", "PLAIN"]);
        assert_eq!(
            select_mechanism(&advertised, &[SaslMechanism::Plain]),
            Some(SaslMechanism::Plain)
        );
    }

    #[test]
    fn no_intersection() {
        let advertised = names(&["GSSAPI", "NTLM"]);
        assert_eq!(select_mechanism(&advertised, &PREFERENCE), None);
    }

    #[test]
    fn name_round_trip() {
        for m in PREFERENCE {
            assert_eq!(SaslMechanism::from_name(m.name()), Some(m));
        }
        assert_eq!(SaslMechanism::from_name("xoauth2"), None);
    }
}
