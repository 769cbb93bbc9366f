/*
 * client.rs
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

//! POP3 client: connect, CAPA, STLS, authentication, STAT, LIST, UIDL,
//! TOP, RETR, DELE, RSET, NOOP, QUIT.
//!
//! Every operation checks its preconditions (connection, session state,
//! message index, UID) before anything is written, then queues its command
//! and drives the engine until that command has resolved. Message indices
//! are zero-based; the protocol's message numbers are index + 1.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::auth::{self, AuthOptions};
use super::capability::{parse_capabilities, Capability, CapabilityInfo, CapabilitySet, Expiration};
use super::engine::{Command, CommandHandle, CommandId, Context, Engine, Reply};
use super::error::Pop3Error;
use super::response::{extract_apop_token, parse_list_entry, parse_stat, parse_uidl_entry, Status};
use super::session::{Session, SessionState};
use super::transport::BoxedStream;
use crate::config::{Pop3Config, Security};
use crate::credentials::CredentialSource;
use crate::net;
use crate::sasl::SaslMechanism;
use crate::uri::pop3_uri;

pub struct Pop3Client {
    engine: Engine,
    host: String,
    port: u16,
    security: Security,
    username: Option<String>,
    enable_apop: bool,
    mechanisms: Vec<SaslMechanism>,
}

fn enqueue_capabilities(ctx: &mut Context<'_>) -> CommandHandle<()> {
    ctx.enqueue(Command::new("CAPA").lines(), |ctx, reply| match reply.status {
        Status::Ok => {
            ctx.session.apply_capabilities(parse_capabilities(&reply.lines()));
            Ok(())
        }
        // No CAPA (RFC 1939 server): nothing declared, APOP still known from the greeting.
        Status::Error => {
            ctx.session.apply_capabilities(CapabilityInfo::default());
            Ok(())
        }
        _ => Err(reply.into_error("CAPA")),
    })
}

fn enqueue_stat(ctx: &mut Context<'_>) -> CommandHandle<(u32, u64)> {
    ctx.enqueue(Command::new("STAT"), |ctx, reply| {
        let reply = reply.into_ok("STAT")?;
        let (count, size) = parse_stat(&reply.text)?;
        ctx.session.count = count;
        ctx.session.total_size = size;
        Ok((count, size))
    })
}

/// `-ERR` to a command whose support was never declared: record the
/// negative probe and report it unsupported; otherwise a command error.
/// A request about a message marked deleted says nothing about support.
fn unsupported_or_error(
    session: &mut Session,
    reply: Reply,
    cap: Capability,
    command: &str,
    seq: Option<u32>,
) -> Pop3Error {
    let about_deleted = seq.is_some_and(|seq| session.deleted.contains(&seq));
    if reply.status == Status::Error && !about_deleted && session.capabilities.supports(cap).is_none() {
        tracing::debug!(capability = cap.name(), "negative probe");
        session.capabilities.record_probe(cap, false);
        return Pop3Error::NotSupported(cap.name());
    }
    reply.into_error(command)
}

impl Pop3Client {
    fn new(config: &Pop3Config) -> Self {
        Self {
            engine: Engine::new(),
            host: config.host.clone(),
            port: config.port,
            security: config.security,
            username: config.username.clone(),
            enable_apop: config.enable_apop,
            mechanisms: config.sasl_mechanisms.clone(),
        }
    }

    /// Connect, read the greeting and query capabilities. With
    /// [`Security::StartTls`] the connection is upgraded before returning.
    pub async fn connect(config: &Pop3Config, cancel: &CancellationToken) -> Result<Self, Pop3Error> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Pop3Error::Cancelled),
            r = net::connect(&config.host, config.port, config.security) => r?,
        };
        let mut client = Self::new(config);
        client.open(stream, config.security == Security::Tls, cancel).await?;
        if config.security == Security::StartTls {
            client.start_tls(cancel).await?;
        }
        Ok(client)
    }

    /// Run the session over an already established stream (greeting, then CAPA).
    /// `secure` tells whether the stream is already encrypted.
    pub async fn from_stream(
        stream: BoxedStream,
        config: &Pop3Config,
        secure: bool,
        cancel: &CancellationToken,
    ) -> Result<Self, Pop3Error> {
        let mut client = Self::new(config);
        client.open(stream, secure, cancel).await?;
        Ok(client)
    }

    async fn open(&mut self, stream: BoxedStream, secure: bool, cancel: &CancellationToken) -> Result<(), Pop3Error> {
        self.engine.attach(stream, secure);
        let greeting = self.engine.enqueue(Command::greeting(), |ctx, reply| {
            let reply = reply.into_ok("greeting")?;
            let session = &mut *ctx.session;
            session.state = SessionState::Authorizing;
            session.apop_token = extract_apop_token(&reply.text);
            if session.apop_token.is_some() {
                session.capabilities.declare(Capability::Apop);
            }
            Ok(enqueue_capabilities(ctx))
        });
        let capa = match self.engine.run(greeting, cancel).await {
            Ok(capa) => capa,
            Err(e) => {
                self.engine.shutdown(cancel).await;
                return Err(e);
            }
        };
        tracing::info!(host = %self.host, secure, "POP3 server greeted");
        self.engine.run(capa, cancel).await
    }

    fn require_state(&self, expected: SessionState) -> Result<(), Pop3Error> {
        if !self.engine.is_connected() {
            return Err(Pop3Error::NotConnected);
        }
        let actual = self.engine.session.state;
        if actual != expected {
            return Err(Pop3Error::InvalidState { expected, actual });
        }
        Ok(())
    }

    /// Message number for a zero-based index, checked against the mailbox size.
    fn sequence(&self, index: usize) -> Result<u32, Pop3Error> {
        self.require_state(SessionState::Transaction)?;
        let count = self.engine.session.count;
        if index >= count as usize {
            return Err(Pop3Error::IndexOutOfRange { index, count });
        }
        Ok(index as u32 + 1)
    }

    /// As [`sequence`](Self::sequence), refusing messages marked deleted.
    fn live_sequence(&self, index: usize) -> Result<u32, Pop3Error> {
        let seq = self.sequence(index)?;
        if self.engine.session.deleted.contains(&seq) {
            return Err(Pop3Error::MessageDeleted { index });
        }
        Ok(seq)
    }

    fn index_for_uid(&self, uid: &str) -> Result<usize, Pop3Error> {
        self.require_state(SessionState::Transaction)?;
        if uid.is_empty() {
            return Err(Pop3Error::InvalidArgument("empty UID"));
        }
        self.engine
            .session
            .message_for_uid(uid)
            .map(|seq| seq as usize - 1)
            .ok_or_else(|| Pop3Error::UnknownUid(uid.to_string()))
    }

    fn require_capability(&self, cap: Capability) -> Result<(), Pop3Error> {
        match self.engine.session.capabilities.supports(cap) {
            Some(false) => Err(Pop3Error::NotSupported(cap.name())),
            _ => Ok(()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.engine.session.state
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    pub fn is_secure(&self) -> bool {
        self.engine.is_secure()
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.engine.session.capabilities
    }

    pub fn login_delay(&self) -> Option<Duration> {
        self.engine.session.login_delay
    }

    pub fn expire(&self) -> Option<&Expiration> {
        self.engine.session.expire.as_ref()
    }

    pub fn implementation(&self) -> Option<&str> {
        self.engine.session.implementation.as_deref()
    }

    /// SASL mechanisms the server advertised.
    pub fn sasl_mechanisms(&self) -> &[String] {
        &self.engine.session.sasl_mechanisms
    }

    /// Message count as of the last STAT.
    pub fn count(&self) -> u32 {
        self.engine.session.count
    }

    /// Mailbox size in octets as of the last STAT.
    pub fn total_size(&self) -> u64 {
        self.engine.session.total_size
    }

    /// Mailbox URL; the key the credential source is asked about.
    pub fn uri(&self) -> String {
        pop3_uri(self.username.as_deref(), &self.host, self.port, self.security)
    }

    /// Re-read the capability list, replacing what the server declared before.
    pub async fn query_capabilities(&mut self, cancel: &CancellationToken) -> Result<(), Pop3Error> {
        if !self.engine.is_connected() {
            return Err(Pop3Error::NotConnected);
        }
        let handle = enqueue_capabilities(&mut self.engine.context());
        self.engine.run(handle, cancel).await
    }

    /// STLS with the default TLS connector.
    pub async fn start_tls(&mut self, cancel: &CancellationToken) -> Result<(), Pop3Error> {
        let host = self.host.clone();
        self.start_tls_with(move |stream| async move { net::upgrade_to_tls(stream, &host).await }, cancel)
            .await
    }

    /// STLS, then `upgrade` replaces the plain stream. Capabilities learned
    /// before the upgrade are discarded; the STLS handler queues CAPA, which
    /// goes out over the upgraded stream.
    pub async fn start_tls_with<F, Fut>(&mut self, upgrade: F, cancel: &CancellationToken) -> Result<(), Pop3Error>
    where
        F: FnOnce(BoxedStream) -> Fut,
        Fut: Future<Output = Result<BoxedStream, Pop3Error>>,
    {
        self.require_state(SessionState::Authorizing)?;
        if self.engine.is_secure() {
            return Err(Pop3Error::InvalidArgument("connection is already encrypted"));
        }
        if !self.engine.session.capabilities.has(Capability::Stls) {
            return Err(Pop3Error::NotSupported("STLS"));
        }
        if !self.engine.is_idle() {
            return Err(Pop3Error::InvalidArgument("commands pending"));
        }
        let stls = self.engine.enqueue(Command::new("STLS"), |ctx, reply| {
            reply.into_ok("STLS")?;
            ctx.session.clear_capabilities();
            Ok(enqueue_capabilities(ctx))
        });
        let capa = self.engine.run(stls, cancel).await?;
        self.engine.upgrade_transport(upgrade, cancel).await?;
        tracing::info!(host = %self.host, "TLS established");
        self.engine.run(capa, cancel).await
    }

    /// Authenticate with credentials for this mailbox's URL, then enter the
    /// transaction state: capabilities are re-read, STAT fills the message
    /// count and, if the server never declared UIDL, one UIDL probe is made.
    ///
    /// Once the server has accepted the login this returns `Ok` and the
    /// session is in Transaction, even if the follow-up refresh failed (it is
    /// logged; call [`stat`](Self::stat) to retry). It fails after login only
    /// when the refresh cost the connection, leaving the session Disconnected.
    pub async fn authenticate(
        &mut self,
        source: &dyn CredentialSource,
        cancel: &CancellationToken,
    ) -> Result<(), Pop3Error> {
        self.require_state(SessionState::Authorizing)?;
        if !self.engine.is_idle() {
            return Err(Pop3Error::InvalidArgument("commands pending"));
        }
        let target = self.uri();
        let credentials = source.credentials(&target).map_err(Pop3Error::Credentials)?;
        let options = AuthOptions {
            enable_apop: self.enable_apop,
            mechanisms: &self.mechanisms,
        };
        auth::authenticate(
            &mut self.engine,
            &credentials.username,
            credentials.password(),
            &options,
            cancel,
        )
        .await?;

        let session = &mut self.engine.session;
        session.state = SessionState::Transaction;
        session.apop_token = None;
        tracing::info!(host = %self.host, username = %credentials.username, "authenticated");

        if let Err(e) = self.refresh_after_login(cancel).await {
            if !self.engine.is_connected() {
                return Err(e);
            }
            tracing::warn!(host = %self.host, error = %e, "refresh after login failed");
        }
        Ok(())
    }

    async fn refresh_after_login(&mut self, cancel: &CancellationToken) -> Result<(), Pop3Error> {
        let mut ctx = self.engine.context();
        let capa = enqueue_capabilities(&mut ctx);
        let stat = enqueue_stat(&mut ctx);
        self.engine.run(capa, cancel).await?;
        self.engine.run(stat, cancel).await?;
        self.probe_uidl(cancel).await
    }

    async fn probe_uidl(&mut self, cancel: &CancellationToken) -> Result<(), Pop3Error> {
        let session = &self.engine.session;
        if session.count == 0 || session.capabilities.supports(Capability::Uidl).is_some() {
            return Ok(());
        }
        match self.get_uid(0, cancel).await {
            Ok(_) | Err(Pop3Error::NotSupported(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Forget the UIDL probe outcome and every cached UID.
    pub fn reset_uidl_probe(&mut self) {
        self.engine.session.capabilities.forget_probe(Capability::Uidl);
        self.engine.session.uids.clear();
    }

    /// STAT: message count and mailbox size in octets.
    pub async fn stat(&mut self, cancel: &CancellationToken) -> Result<(u32, u64), Pop3Error> {
        self.require_state(SessionState::Transaction)?;
        let handle = enqueue_stat(&mut self.engine.context());
        self.engine.run(handle, cancel).await
    }

    /// UIDL for one message.
    pub async fn get_uid(&mut self, index: usize, cancel: &CancellationToken) -> Result<String, Pop3Error> {
        let seq = self.live_sequence(index)?;
        self.require_capability(Capability::Uidl)?;
        let handle = self
            .engine
            .enqueue(Command::new(format!("UIDL {}", seq)), move |ctx, reply| {
                let session = &mut *ctx.session;
                if reply.status != Status::Ok {
                    return Err(unsupported_or_error(session, reply, Capability::Uidl, "UIDL", Some(seq)));
                }
                let (got, uid) = parse_uidl_entry(&reply.text)?;
                if got != seq {
                    return Err(Pop3Error::protocol(format!(
                        "UIDL {} answered for message {}",
                        seq, got
                    )));
                }
                if !session.capabilities.has(Capability::Uidl) {
                    session.capabilities.record_probe(Capability::Uidl, true);
                }
                session.uids.insert(uid.clone(), seq);
                Ok(uid)
            });
        self.engine.run(handle, cancel).await
    }

    /// UIDL for the whole mailbox as (index, UID) pairs. Replaces the UID cache.
    pub async fn get_uids(&mut self, cancel: &CancellationToken) -> Result<Vec<(usize, String)>, Pop3Error> {
        self.require_state(SessionState::Transaction)?;
        self.require_capability(Capability::Uidl)?;
        let handle = self
            .engine
            .enqueue(Command::new("UIDL").lines(), |ctx, reply| {
                let session = &mut *ctx.session;
                if reply.status != Status::Ok {
                    return Err(unsupported_or_error(session, reply, Capability::Uidl, "UIDL", None));
                }
                // The block has been read to its end already, so a bad line
                // fails this listing without desynchronising the stream.
                let mut uids = HashMap::new();
                let mut listing = Vec::new();
                for line in reply.lines() {
                    let (seq, uid) = parse_uidl_entry(&line)?;
                    uids.insert(uid.clone(), seq);
                    listing.push((seq as usize - 1, uid));
                }
                if !session.capabilities.has(Capability::Uidl) {
                    session.capabilities.record_probe(Capability::Uidl, true);
                }
                session.uids = uids;
                Ok(listing)
            });
        self.engine.run(handle, cancel).await
    }

    /// LIST for one message: its size in octets.
    pub async fn get_size(&mut self, index: usize, cancel: &CancellationToken) -> Result<u64, Pop3Error> {
        let seq = self.live_sequence(index)?;
        let handle = self
            .engine
            .enqueue(Command::new(format!("LIST {}", seq)), move |_, reply| {
                let reply = reply.into_ok("LIST")?;
                let (got, size) = parse_list_entry(&reply.text)?;
                if got != seq {
                    return Err(Pop3Error::protocol(format!(
                        "LIST {} answered for message {}",
                        seq, got
                    )));
                }
                Ok(size)
            });
        self.engine.run(handle, cancel).await
    }

    /// LIST for the whole mailbox as (index, size) pairs. The server lists
    /// every message not marked deleted, in order, and nothing else.
    pub async fn get_sizes(&mut self, cancel: &CancellationToken) -> Result<Vec<(usize, u64)>, Pop3Error> {
        self.require_state(SessionState::Transaction)?;
        let handle = self.engine.enqueue(Command::new("LIST").lines(), |ctx, reply| {
            let lines = reply.into_ok("LIST")?.lines();
            let session = &*ctx.session;
            let mut live = (1..=session.count).filter(|seq| !session.deleted.contains(seq));
            let mut sizes = Vec::with_capacity(lines.len());
            for line in &lines {
                let (seq, size) = parse_list_entry(line)?;
                match live.next() {
                    Some(expected) if expected == seq => sizes.push((seq as usize - 1, size)),
                    expected => {
                        return Err(Pop3Error::protocol(format!(
                            "LIST entry for message {} where {:?} was due",
                            seq, expected
                        )))
                    }
                }
            }
            if let Some(missing) = live.next() {
                return Err(Pop3Error::protocol(format!("LIST omitted message {}", missing)));
            }
            Ok(sizes)
        });
        self.engine.run(handle, cancel).await
    }

    fn enqueue_top(&mut self, seq: u32) -> CommandHandle<Vec<u8>> {
        self.engine
            .enqueue(Command::new(format!("TOP {} 0", seq)).data(), move |ctx, reply| {
                let session = &mut *ctx.session;
                if reply.status != Status::Ok {
                    return Err(unsupported_or_error(session, reply, Capability::Top, "TOP", Some(seq)));
                }
                if !session.capabilities.has(Capability::Top) {
                    session.capabilities.record_probe(Capability::Top, true);
                }
                Ok(reply.data())
            })
    }

    fn enqueue_retr(&mut self, seq: u32) -> CommandHandle<Vec<u8>> {
        self.engine
            .enqueue(Command::new(format!("RETR {}", seq)).data(), |_, reply| {
                Ok(reply.into_ok("RETR")?.data())
            })
    }

    fn enqueue_dele(&mut self, seq: u32) -> CommandHandle<()> {
        self.engine
            .enqueue(Command::new(format!("DELE {}", seq)), move |ctx, reply| {
                reply.into_ok("DELE")?;
                ctx.session.deleted.insert(seq);
                Ok(())
            })
    }

    /// Message header block (TOP n 0), raw bytes with the server's line endings.
    pub async fn get_headers(&mut self, index: usize, cancel: &CancellationToken) -> Result<Vec<u8>, Pop3Error> {
        let seq = self.live_sequence(index)?;
        self.require_capability(Capability::Top)?;
        let handle = self.enqueue_top(seq);
        self.engine.run(handle, cancel).await
    }

    /// Whole message (RETR), unstuffed raw bytes.
    pub async fn get_message(&mut self, index: usize, cancel: &CancellationToken) -> Result<Vec<u8>, Pop3Error> {
        let seq = self.live_sequence(index)?;
        let handle = self.enqueue_retr(seq);
        self.engine.run(handle, cancel).await
    }

    /// Mark a message for deletion. The server removes it on QUIT.
    pub async fn delete(&mut self, index: usize, cancel: &CancellationToken) -> Result<(), Pop3Error> {
        let seq = self.live_sequence(index)?;
        let handle = self.enqueue_dele(seq);
        self.engine.run(handle, cancel).await
    }

    pub async fn get_headers_by_uid(&mut self, uid: &str, cancel: &CancellationToken) -> Result<Vec<u8>, Pop3Error> {
        let index = self.index_for_uid(uid)?;
        self.get_headers(index, cancel).await
    }

    pub async fn get_message_by_uid(&mut self, uid: &str, cancel: &CancellationToken) -> Result<Vec<u8>, Pop3Error> {
        let index = self.index_for_uid(uid)?;
        self.get_message(index, cancel).await
    }

    pub async fn delete_by_uid(&mut self, uid: &str, cancel: &CancellationToken) -> Result<(), Pop3Error> {
        let index = self.index_for_uid(uid)?;
        self.delete(index, cancel).await
    }

    /// RSET: unmark every message marked for deletion.
    pub async fn reset(&mut self, cancel: &CancellationToken) -> Result<(), Pop3Error> {
        self.require_state(SessionState::Transaction)?;
        let handle = self.engine.enqueue(Command::new("RSET"), |ctx, reply| {
            reply.into_ok("RSET")?;
            ctx.session.deleted.clear();
            Ok(())
        });
        self.engine.run(handle, cancel).await
    }

    pub async fn noop(&mut self, cancel: &CancellationToken) -> Result<(), Pop3Error> {
        self.require_state(SessionState::Transaction)?;
        let handle = self
            .engine
            .enqueue(Command::new("NOOP"), |_, reply| reply.into_ok("NOOP").map(|_| ()));
        self.engine.run(handle, cancel).await
    }

    /// Queue RETR without waiting; drive it with [`step`](Self::step) or [`wait`](Self::wait).
    pub fn enqueue_retrieve(&mut self, index: usize) -> Result<CommandHandle<Vec<u8>>, Pop3Error> {
        let seq = self.live_sequence(index)?;
        Ok(self.enqueue_retr(seq))
    }

    /// Queue DELE without waiting.
    pub fn enqueue_delete(&mut self, index: usize) -> Result<CommandHandle<()>, Pop3Error> {
        let seq = self.live_sequence(index)?;
        Ok(self.enqueue_dele(seq))
    }

    /// One engine step: resolve the oldest queued command.
    pub async fn step(&mut self, cancel: &CancellationToken) -> Result<CommandId, Pop3Error> {
        self.engine.step(cancel).await
    }

    /// Drive the queue until `handle` has resolved.
    pub async fn wait<T>(&mut self, handle: CommandHandle<T>, cancel: &CancellationToken) -> Result<T, Pop3Error> {
        self.engine.run(handle, cancel).await
    }

    /// Close the session, sending QUIT first when `quit` is set. The
    /// transport is dropped and every cached fact (UIDs, count,
    /// capabilities) is cleared whatever QUIT's outcome.
    pub async fn disconnect(&mut self, quit: bool, cancel: &CancellationToken) -> Result<(), Pop3Error> {
        let result = if quit && self.engine.is_connected() {
            let handle = self
                .engine
                .enqueue(Command::new("QUIT"), |_, reply| reply.into_ok("QUIT").map(|_| ()));
            self.engine.run(handle, cancel).await
        } else {
            Ok(())
        };
        self.engine.shutdown(cancel).await;
        tracing::info!(host = %self.host, "disconnected");
        result
    }
}
