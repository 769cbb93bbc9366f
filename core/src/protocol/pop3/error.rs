/*
 * error.rs
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

//! POP3 client errors.
//!
//! Four families: local contract violations (no I/O was performed), command
//! errors (`-ERR` to a well-formed request), protocol errors (the reply did not
//! follow the grammar) and transport failures (I/O, TLS, cancellation).

use std::io;
use std::sync::Arc;

use super::response::ResponseCode;
use super::session::SessionState;
use crate::sasl::SaslError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Pop3Error {
    #[error("not connected")]
    NotConnected,
    #[error("operation requires {expected:?} state, session is {actual:?}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },
    #[error("message index {index} out of range (mailbox has {count} messages)")]
    IndexOutOfRange { index: usize, count: u32 },
    #[error("message {index} is marked for deletion")]
    MessageDeleted { index: usize },
    #[error("unknown UID {0}")]
    UnknownUid(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("no credentials: {0}")]
    Credentials(String),

    #[error("{command} rejected: {text}")]
    Command {
        command: String,
        code: Option<ResponseCode>,
        text: String,
    },
    #[error("{0} not supported by server")]
    NotSupported(&'static str),
    #[error("authentication failed: {text}")]
    Authentication {
        code: Option<ResponseCode>,
        text: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("operation cancelled")]
    Cancelled,

    #[error("SASL: {0}")]
    Sasl(#[from] SaslError),
}

impl Pop3Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn authentication(text: impl Into<String>) -> Self {
        Self::Authentication {
            code: None,
            text: text.into(),
        }
    }

    /// Raised before any network I/O; the session is untouched.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Pop3Error::NotConnected
                | Pop3Error::InvalidState { .. }
                | Pop3Error::IndexOutOfRange { .. }
                | Pop3Error::MessageDeleted { .. }
                | Pop3Error::UnknownUid(_)
                | Pop3Error::InvalidArgument(_)
                | Pop3Error::Credentials(_)
        )
    }

    /// The stream can no longer be trusted; callers should disconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Pop3Error::Protocol(_) | Pop3Error::Io(_) | Pop3Error::Tls(_) | Pop3Error::Cancelled
        )
    }

    /// Extended response code carried by a `-ERR [CODE]` reply, if any
    /// (`[AUTH]`, `[SYS/TEMP]`, `[IN-USE]` and so on).
    pub fn response_code(&self) -> Option<&ResponseCode> {
        match self {
            Pop3Error::Command { code, .. } | Pop3Error::Authentication { code, .. } => code.as_ref(),
            _ => None,
        }
    }
}

impl From<io::Error> for Pop3Error {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}
