/*
 * capability.rs
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

//! POP3 capabilities (RFC 2449): the set the server declares in its CAPA
//! reply, plus what the client learned by probing when the server stayed silent.

use std::time::Duration;

/// One protocol extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Top,
    User,
    Sasl,
    RespCodes,
    AuthRespCode,
    Pipelining,
    Uidl,
    Stls,
    /// Not listed by CAPA; set when the greeting carries an APOP timestamp.
    Apop,
    LoginDelay,
    Expire,
    Implementation,
    Utf8,
}

impl Capability {
    pub const ALL: [Capability; 13] = [
        Capability::Top,
        Capability::User,
        Capability::Sasl,
        Capability::RespCodes,
        Capability::AuthRespCode,
        Capability::Pipelining,
        Capability::Uidl,
        Capability::Stls,
        Capability::Apop,
        Capability::LoginDelay,
        Capability::Expire,
        Capability::Implementation,
        Capability::Utf8,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Capability::Top => "TOP",
            Capability::User => "USER",
            Capability::Sasl => "SASL",
            Capability::RespCodes => "RESP-CODES",
            Capability::AuthRespCode => "AUTH-RESP-CODE",
            Capability::Pipelining => "PIPELINING",
            Capability::Uidl => "UIDL",
            Capability::Stls => "STLS",
            Capability::Apop => "APOP",
            Capability::LoginDelay => "LOGIN-DELAY",
            Capability::Expire => "EXPIRE",
            Capability::Implementation => "IMPLEMENTATION",
            Capability::Utf8 => "UTF8",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }
}

/// Bit-set of capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u16);

impl Capabilities {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap.bit();
    }

    pub fn remove(&mut self, cap: Capability) {
        self.0 &= !cap.bit();
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.iter().copied().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut caps = Capabilities::empty();
        for c in iter {
            caps.insert(c);
        }
        caps
    }
}

/// How long the server keeps retrieved messages (EXPIRE).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiration {
    Never,
    Days { days: u32, per_user: bool },
}

/// Everything a CAPA reply says.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityInfo {
    pub capabilities: Capabilities,
    pub login_delay: Option<Duration>,
    pub expire: Option<Expiration>,
    pub implementation: Option<String>,
    pub sasl_mechanisms: Vec<String>,
}

/// Parse the lines of a CAPA reply. Unknown tags are ignored; an unparsable
/// parameter keeps the tag but drops the value.
pub fn parse_capabilities(lines: &[String]) -> CapabilityInfo {
    let mut info = CapabilityInfo::default();
    for line in lines {
        let mut words = line.split_whitespace();
        let tag = match words.next() {
            Some(t) => t,
            None => continue,
        };
        let cap = match Capability::from_name(tag) {
            Some(Capability::Apop) | None => continue,
            Some(c) => c,
        };
        info.capabilities.insert(cap);
        match cap {
            Capability::Sasl => {
                info.sasl_mechanisms = words.map(|w| w.to_uppercase()).collect();
            }
            Capability::LoginDelay => {
                info.login_delay = words
                    .next()
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs);
            }
            Capability::Expire => {
                let value = words.next();
                let per_user = words.next().is_some_and(|w| w.eq_ignore_ascii_case("USER"));
                info.expire = match value {
                    Some(v) if v.eq_ignore_ascii_case("NEVER") => Some(Expiration::Never),
                    Some(v) => v.parse().ok().map(|days| Expiration::Days { days, per_user }),
                    None => None,
                };
            }
            Capability::Implementation => {
                let text = line[tag.len()..].trim();
                if !text.is_empty() {
                    info.implementation = Some(text.to_string());
                }
            }
            _ => {}
        }
    }
    info
}

/// Declared capabilities plus probe results, kept apart so "unknown" is
/// never confused with "known absent".
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    declared: Capabilities,
    probed_ok: Capabilities,
    probed_fail: Capabilities,
}

impl CapabilitySet {
    pub fn declared(&self) -> Capabilities {
        self.declared
    }

    /// Some(true) when declared or confirmed, Some(false) when a probe
    /// failed, None while unknown.
    pub fn supports(&self, cap: Capability) -> Option<bool> {
        if self.declared.contains(cap) || self.probed_ok.contains(cap) {
            Some(true)
        } else if self.probed_fail.contains(cap) {
            Some(false)
        } else {
            None
        }
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.supports(cap) == Some(true)
    }

    pub fn is_probed(&self, cap: Capability) -> bool {
        self.probed_ok.contains(cap) || self.probed_fail.contains(cap)
    }

    /// Replace the declared layer; probe results survive.
    pub(crate) fn set_declared(&mut self, declared: Capabilities) {
        self.declared = declared;
    }

    pub(crate) fn declare(&mut self, cap: Capability) {
        self.declared.insert(cap);
    }

    pub(crate) fn record_probe(&mut self, cap: Capability, supported: bool) {
        if supported {
            self.probed_ok.insert(cap);
            self.probed_fail.remove(cap);
        } else {
            self.probed_fail.insert(cap);
            self.probed_ok.remove(cap);
        }
    }

    pub(crate) fn forget_probe(&mut self, cap: Capability) {
        self.probed_ok.remove(cap);
        self.probed_fail.remove(cap);
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rfc2449_example() {
        let info = parse_capabilities(&lines(&[
            "TOP",
            "USER",
            "SASL CRAM-MD5 KERBEROS_V4",
            "RESP-CODES",
            "LOGIN-DELAY 900",
            "PIPELINING",
            "EXPIRE 60",
            "UIDL",
            "IMPLEMENTATION Shlemazle-Plotz-v302",
        ]));
        let caps = info.capabilities;
        for c in [
            Capability::Top,
            Capability::User,
            Capability::Sasl,
            Capability::RespCodes,
            Capability::LoginDelay,
            Capability::Pipelining,
            Capability::Expire,
            Capability::Uidl,
            Capability::Implementation,
        ] {
            assert!(caps.contains(c), "missing {}", c.name());
        }
        assert!(!caps.contains(Capability::Stls));
        assert_eq!(info.sasl_mechanisms, vec!["CRAM-MD5", "KERBEROS_V4"]);
        assert_eq!(info.login_delay, Some(Duration::from_secs(900)));
        assert_eq!(info.expire, Some(Expiration::Days { days: 60, per_user: false }));
        assert_eq!(info.implementation.as_deref(), Some("Shlemazle-Plotz-v302"));
    }

    #[test]
    fn expire_never_and_per_user() {
        let info = parse_capabilities(&lines(&["EXPIRE NEVER"]));
        assert_eq!(info.expire, Some(Expiration::Never));
        let info = parse_capabilities(&lines(&["expire 30 USER", "stls"]));
        assert_eq!(info.expire, Some(Expiration::Days { days: 30, per_user: true }));
        assert!(info.capabilities.contains(Capability::Stls));
    }

    #[test]
    fn malformed_parameter_keeps_tag() {
        let info = parse_capabilities(&lines(&["LOGIN-DELAY soon", "", "X-UNKNOWN 1"]));
        assert!(info.capabilities.contains(Capability::LoginDelay));
        assert_eq!(info.login_delay, None);
    }

    #[test]
    fn probe_layer_is_separate() {
        let mut set = CapabilitySet::default();
        assert_eq!(set.supports(Capability::Uidl), None);
        set.record_probe(Capability::Uidl, false);
        assert_eq!(set.supports(Capability::Uidl), Some(false));
        assert!(set.is_probed(Capability::Uidl));
        set.set_declared([Capability::Top].into_iter().collect());
        assert_eq!(set.supports(Capability::Uidl), Some(false));
        assert!(set.has(Capability::Top));
        set.forget_probe(Capability::Uidl);
        assert_eq!(set.supports(Capability::Uidl), None);
    }
}
