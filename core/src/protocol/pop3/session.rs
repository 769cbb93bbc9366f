/*
 * session.rs
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

//! Per-connection session state. Mutated only by command completion handlers
//! while the engine delivers a reply.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::capability::{Capability, CapabilityInfo, CapabilitySet, Expiration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Greeting received, not yet authenticated.
    Authorizing,
    Transaction,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) state: SessionState,
    pub(crate) capabilities: CapabilitySet,
    pub(crate) login_delay: Option<Duration>,
    pub(crate) expire: Option<Expiration>,
    pub(crate) implementation: Option<String>,
    pub(crate) sasl_mechanisms: Vec<String>,
    /// APOP timestamp from the greeting; cleared once authenticated.
    pub(crate) apop_token: Option<String>,
    /// UID to message number, filled by UIDL.
    pub(crate) uids: HashMap<String, u32>,
    /// Message numbers marked by a successful DELE; cleared by RSET.
    pub(crate) deleted: HashSet<u32>,
    pub(crate) count: u32,
    pub(crate) total_size: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            capabilities: CapabilitySet::default(),
            login_delay: None,
            expire: None,
            implementation: None,
            sasl_mechanisms: Vec::new(),
            apop_token: None,
            uids: HashMap::new(),
            deleted: HashSet::new(),
            count: 0,
            total_size: 0,
        }
    }
}

impl Session {
    /// Back to Disconnected with everything learned about the server forgotten.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Install a fresh CAPA result. Probe outcomes are kept.
    pub(crate) fn apply_capabilities(&mut self, info: CapabilityInfo) {
        let mut declared = info.capabilities;
        if self.apop_token.is_some() {
            declared.insert(Capability::Apop);
        }
        self.capabilities.set_declared(declared);
        self.login_delay = info.login_delay;
        self.expire = info.expire;
        self.implementation = info.implementation;
        self.sasl_mechanisms = info.sasl_mechanisms;
    }

    /// Forget every capability, declared or probed (after a TLS upgrade).
    pub(crate) fn clear_capabilities(&mut self) {
        self.capabilities.clear();
        self.login_delay = None;
        self.expire = None;
        self.implementation = None;
        self.sasl_mechanisms.clear();
    }

    pub(crate) fn message_for_uid(&self, uid: &str) -> Option<u32> {
        self.uids.get(uid).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::pop3::capability::Capabilities;

    #[test]
    fn apop_bit_survives_capa() {
        let mut s = Session {
            apop_token: Some("<1.2@host>".into()),
            ..Session::default()
        };
        s.apply_capabilities(CapabilityInfo::default());
        assert!(s.capabilities.has(Capability::Apop));

        s.apop_token = None;
        s.apply_capabilities(CapabilityInfo {
            capabilities: [Capability::Uidl].into_iter().collect::<Capabilities>(),
            ..CapabilityInfo::default()
        });
        assert!(!s.capabilities.has(Capability::Apop));
        assert!(s.capabilities.has(Capability::Uidl));
    }

    #[test]
    fn reset_forgets_everything() {
        let mut s = Session::default();
        s.state = SessionState::Transaction;
        s.uids.insert("abc".into(), 1);
        s.deleted.insert(1);
        s.count = 1;
        s.capabilities.record_probe(Capability::Top, true);
        s.reset();
        assert_eq!(s.state, SessionState::Disconnected);
        assert!(s.uids.is_empty());
        assert!(s.deleted.is_empty());
        assert_eq!(s.count, 0);
        assert_eq!(s.capabilities.supports(Capability::Top), None);
    }
}
