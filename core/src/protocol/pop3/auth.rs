/*
 * auth.rs
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

//! Authentication: APOP, then SASL, then USER/PASS.
//!
//! The strategy is chosen once per attempt from what the server offered.
//! A `-ERR` is reported as [`Pop3Error::Authentication`]; any other reply
//! that is not `+OK` (a garbled line, a stray continuation) is a protocol
//! error, and no other strategy is tried.

use md5::{Digest, Md5};
use tokio_util::sync::CancellationToken;

use super::capability::Capability;
use super::engine::{Command, Context, Engine, Reply};
use super::error::Pop3Error;
use super::response::{split_response_code, Status};
use super::session::Session;
use crate::sasl::{bytes_to_hex, new_client, select_mechanism, SaslMechanism};

/// Which strategies the caller permits.
#[derive(Debug, Clone)]
pub(crate) struct AuthOptions<'a> {
    pub enable_apop: bool,
    pub mechanisms: &'a [SaslMechanism],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Strategy {
    Apop { token: String },
    Sasl(SaslMechanism),
    UserPass,
}

pub(crate) fn choose_strategy(session: &Session, options: &AuthOptions<'_>) -> Strategy {
    if options.enable_apop && session.capabilities.has(Capability::Apop) {
        if let Some(token) = &session.apop_token {
            return Strategy::Apop { token: token.clone() };
        }
    }
    if session.capabilities.has(Capability::Sasl) {
        if let Some(m) = select_mechanism(&session.sasl_mechanisms, options.mechanisms) {
            return Strategy::Sasl(m);
        }
    }
    Strategy::UserPass
}

/// `hex(MD5(token || password))`, lower case (RFC 1939 section 7).
pub fn apop_digest(token: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(token.as_bytes());
    hasher.update(password.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

fn rejected(reply: Reply, command: &str) -> Pop3Error {
    match reply.status {
        Status::Error => {
            let (code, text) = split_response_code(&reply.text);
            Pop3Error::Authentication {
                code,
                text: text.to_string(),
            }
        }
        _ => reply.into_error(command),
    }
}

fn accept(command: &'static str) -> impl FnOnce(&mut Context<'_>, Reply) -> Result<(), Pop3Error> + Send {
    move |_, reply| match reply.status {
        Status::Ok => Ok(()),
        _ => Err(rejected(reply, command)),
    }
}

/// Authenticate with the chosen strategy. On success the session is still
/// in Authorizing state; the caller completes the transition.
pub(crate) async fn authenticate(
    engine: &mut Engine,
    username: &str,
    password: &str,
    options: &AuthOptions<'_>,
    cancel: &CancellationToken,
) -> Result<(), Pop3Error> {
    if username.is_empty() {
        return Err(Pop3Error::InvalidArgument("empty username"));
    }
    let strategy = choose_strategy(&engine.session, options);
    tracing::debug!(?strategy, username, "authenticating");
    match strategy {
        Strategy::Apop { token } => {
            let digest = apop_digest(&token, password);
            let command = Command::new(format!("APOP {} {}", username, digest))
                .redact(format!("APOP {} ****", username));
            let handle = engine.enqueue(command, accept("APOP"));
            engine.run(handle, cancel).await
        }
        Strategy::Sasl(mechanism) => {
            let client = new_client(mechanism, username, password);
            let handle = engine.enqueue(Command::sasl(client), move |_, reply| match reply.status {
                Status::Ok if reply.sasl_authenticated => Ok(()),
                Status::Ok => Err(Pop3Error::authentication(format!(
                    "server accepted AUTH {} before the exchange completed",
                    mechanism
                ))),
                Status::Error => Err(rejected(reply, "AUTH")),
                _ => Err(Pop3Error::protocol(format!(
                    "bad reply during AUTH {}: {:?}",
                    mechanism, reply.text
                ))),
            });
            engine.run(handle, cancel).await
        }
        Strategy::UserPass => {
            let user = engine.enqueue(Command::new(format!("USER {}", username)), accept("USER"));
            engine.run(user, cancel).await?;
            let pass = engine.enqueue(
                Command::new(format!("PASS {}", password)).redact("PASS ****"),
                accept("PASS"),
            );
            engine.run(pass, cancel).await
        }
    }
}
