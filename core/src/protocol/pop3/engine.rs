/*
 * engine.rs
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

//! Command queue: FIFO of pending commands, each carrying the handler that
//! consumes its reply.
//!
//! Callers enqueue any number of commands and then drive [`Engine::step`]
//! until the one they care about has resolved. Each step performs one whole
//! exchange (write, status line, optional body or SASL sub-loop) for the head
//! command. POP3 allows one command in flight, so queuing only decouples call
//! sites; it never overlaps requests on the wire.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio_util::sync::CancellationToken;

use super::error::Pop3Error;
use super::response::{parse_status, split_response_code, Status, StatusLine};
use super::session::Session;
use super::transport::{BoxedStream, Transport, TransportMode};
use crate::sasl::SaslClient;

pub type CommandId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Queued,
    /// Written, reply not yet consumed.
    Active,
    Ok,
    Error,
    ProtocolError,
}

/// What follows the status line.
pub(crate) enum ReplyShape {
    Line,
    /// Dot-terminated block read in line mode (CAPA, LIST, UIDL).
    Lines,
    /// Dot-terminated block read in data mode (RETR, TOP).
    Data,
    /// `+ ` continuations answered by the mechanism until a final status.
    Sasl(Box<dyn SaslClient>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Body {
    None,
    Lines(Vec<String>),
    Data(Vec<u8>),
}

/// Reply as delivered to a command's handler.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub status: Status,
    pub text: String,
    pub body: Body,
    /// For SASL commands: whether the mechanism finished its side.
    pub sasl_authenticated: bool,
}

impl Reply {
    fn from_status(line: StatusLine, body: Body) -> Self {
        Self {
            status: line.status,
            text: line.text,
            body,
            sasl_authenticated: false,
        }
    }

    /// Map anything but `+OK` to the matching error for `command`.
    pub fn into_ok(self, command: &str) -> Result<Reply, Pop3Error> {
        match self.status {
            Status::Ok => Ok(self),
            _ => Err(self.into_error(command)),
        }
    }

    /// The error this reply stands for: a command error for `-ERR`, a
    /// protocol error for anything that should not have arrived.
    pub fn into_error(self, command: &str) -> Pop3Error {
        match self.status {
            Status::Error => {
                let (code, text) = split_response_code(&self.text);
                Pop3Error::Command {
                    command: command.to_string(),
                    code,
                    text: text.to_string(),
                }
            }
            Status::Continue => {
                Pop3Error::protocol(format!("unexpected continuation in reply to {}", command))
            }
            Status::Ok => Pop3Error::protocol(format!("unexpected +OK to {}", command)),
            Status::ProtocolError => Pop3Error::protocol(format!(
                "bad status line in reply to {}: {:?}",
                command, self.text
            )),
        }
    }

    pub fn lines(self) -> Vec<String> {
        match self.body {
            Body::Lines(lines) => lines,
            _ => Vec::new(),
        }
    }

    pub fn data(self) -> Vec<u8> {
        match self.body {
            Body::Data(data) => data,
            _ => Vec::new(),
        }
    }
}

/// A command before it is queued.
pub(crate) struct Command {
    /// None for the greeting: nothing is written, one line is read.
    text: Option<String>,
    /// Form written to the log when the text carries a secret.
    redacted: Option<String>,
    shape: ReplyShape,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            redacted: None,
            shape: ReplyShape::Line,
        }
    }

    pub fn greeting() -> Self {
        Self {
            text: None,
            redacted: None,
            shape: ReplyShape::Line,
        }
    }

    pub fn sasl(mechanism: Box<dyn SaslClient>) -> Self {
        Self {
            text: Some(format!("AUTH {}", mechanism.mechanism())),
            redacted: None,
            shape: ReplyShape::Sasl(mechanism),
        }
    }

    pub fn lines(mut self) -> Self {
        self.shape = ReplyShape::Lines;
        self
    }

    pub fn data(mut self) -> Self {
        self.shape = ReplyShape::Data;
        self
    }

    pub fn redact(mut self, shown: impl Into<String>) -> Self {
        self.redacted = Some(shown.into());
        self
    }

    fn log_text(&self) -> &str {
        self.redacted
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or("<greeting>")
    }
}

struct Slot<T> {
    status: CommandStatus,
    result: Option<Result<T, Pop3Error>>,
}

fn lock<T>(slot: &Mutex<Slot<T>>) -> MutexGuard<'_, Slot<T>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Caller's view of a queued command.
pub struct CommandHandle<T> {
    id: CommandId,
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> CommandHandle<T> {
    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn status(&self) -> CommandStatus {
        lock(&self.slot).status
    }

    pub fn is_resolved(&self) -> bool {
        lock(&self.slot).result.is_some()
    }

    /// The outcome, once resolved. Can be taken only once.
    pub fn take(&self) -> Option<Result<T, Pop3Error>> {
        lock(&self.slot).result.take()
    }
}

trait Completion: Send {
    fn activate(&self);
    fn complete(self: Box<Self>, ctx: &mut Context<'_>, reply: Result<Reply, Pop3Error>);
}

struct Pending<T, F> {
    slot: Arc<Mutex<Slot<T>>>,
    handler: F,
}

impl<T, F> Completion for Pending<T, F>
where
    T: Send + 'static,
    F: FnOnce(&mut Context<'_>, Reply) -> Result<T, Pop3Error> + Send + 'static,
{
    fn activate(&self) {
        lock(&self.slot).status = CommandStatus::Active;
    }

    fn complete(self: Box<Self>, ctx: &mut Context<'_>, reply: Result<Reply, Pop3Error>) {
        let Pending { slot, handler } = *self;
        let (wire_ok, result) = match reply {
            Ok(reply) => (reply.status == Status::Ok, handler(ctx, reply)),
            Err(e) => (false, Err(e)),
        };
        let status = match &result {
            Err(Pop3Error::Protocol(_)) => CommandStatus::ProtocolError,
            Ok(_) if wire_ok => CommandStatus::Ok,
            _ => CommandStatus::Error,
        };
        let mut guard = lock(&slot);
        guard.status = status;
        guard.result = Some(result);
    }
}

struct PendingCommand {
    id: CommandId,
    command: Command,
    completion: Box<dyn Completion>,
}

/// What a handler sees while its reply is delivered: the session, and the
/// queue, so it can issue follow-up commands (CAPA after STLS, say).
/// Follow-ups join the tail with fresh ids, so ids keep increasing in
/// queue order.
pub(crate) struct Context<'a> {
    pub session: &'a mut Session,
    queue: &'a mut VecDeque<PendingCommand>,
    next_id: &'a mut CommandId,
}

impl Context<'_> {
    /// Append a command to the queue. Nothing is written until a step reaches it.
    pub fn enqueue<T, F>(&mut self, command: Command, handler: F) -> CommandHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Context<'_>, Reply) -> Result<T, Pop3Error> + Send + 'static,
    {
        let id = *self.next_id;
        *self.next_id += 1;
        let slot = Arc::new(Mutex::new(Slot {
            status: CommandStatus::Queued,
            result: None,
        }));
        self.queue.push_back(PendingCommand {
            id,
            command,
            completion: Box::new(Pending {
                slot: Arc::clone(&slot),
                handler,
            }),
        });
        CommandHandle { id, slot }
    }
}

/// Bound on the orderly close of the stream (TLS close_notify) when the
/// peer has stopped reading.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub(crate) struct Engine {
    transport: Option<Transport>,
    queue: VecDeque<PendingCommand>,
    next_id: CommandId,
    last_resolved: CommandId,
    pub(crate) session: Session,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            transport: None,
            queue: VecDeque::new(),
            next_id: 1,
            last_resolved: 0,
            session: Session::default(),
        }
    }

    pub fn attach(&mut self, stream: BoxedStream, secure: bool) {
        self.transport = Some(Transport::new(stream, secure));
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn is_secure(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_secure)
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn context(&mut self) -> Context<'_> {
        Context {
            session: &mut self.session,
            queue: &mut self.queue,
            next_id: &mut self.next_id,
        }
    }

    pub fn enqueue<T, F>(&mut self, command: Command, handler: F) -> CommandHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Context<'_>, Reply) -> Result<T, Pop3Error> + Send + 'static,
    {
        self.context().enqueue(command, handler)
    }

    /// Run one exchange for the head command and resolve it. Returns the id
    /// of the last resolved command. A transport failure or cancellation
    /// fails every pending command, drops the transport and resets the session.
    pub async fn step(&mut self, cancel: &CancellationToken) -> Result<CommandId, Pop3Error> {
        let head = match self.queue.front_mut() {
            Some(head) => head,
            None => return Ok(self.last_resolved),
        };
        let transport = match self.transport.as_mut() {
            Some(t) => t,
            None => {
                self.fail_all(Pop3Error::NotConnected);
                return Err(Pop3Error::NotConnected);
            }
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Pop3Error::Cancelled),
            r = exchange(transport, head) => r,
        };
        match outcome {
            Ok(reply) => {
                if let Some(cmd) = self.queue.pop_front() {
                    let id = cmd.id;
                    cmd.completion.complete(&mut self.context(), reply);
                    self.last_resolved = id;
                }
                Ok(self.last_resolved)
            }
            Err(e) => {
                self.teardown(&e);
                Err(e)
            }
        }
    }

    /// Step until `handle` resolves, then return its outcome.
    pub async fn run<T>(&mut self, handle: CommandHandle<T>, cancel: &CancellationToken) -> Result<T, Pop3Error> {
        while self.last_resolved < handle.id() && !handle.is_resolved() {
            if let Err(e) = self.step(cancel).await {
                return handle.take().unwrap_or(Err(e));
            }
        }
        handle
            .take()
            .unwrap_or_else(|| Err(Pop3Error::protocol("command resolved without a result")))
    }

    /// Swap the transport for `upgrade(stream)`. Steps are whole exchanges,
    /// so between two of them nothing is in flight; commands still queued
    /// are written over the new stream.
    pub async fn upgrade_transport<F, Fut>(&mut self, upgrade: F, cancel: &CancellationToken) -> Result<(), Pop3Error>
    where
        F: FnOnce(BoxedStream) -> Fut,
        Fut: Future<Output = Result<BoxedStream, Pop3Error>>,
    {
        let transport = self.transport.take().ok_or(Pop3Error::NotConnected)?;
        let result = match transport.into_stream() {
            Ok(stream) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Pop3Error::Cancelled),
                r = upgrade(stream) => r,
            },
            Err(e) => Err(e),
        };
        match result {
            Ok(stream) => {
                self.transport = Some(Transport::new(stream, true));
                Ok(())
            }
            Err(e) => {
                self.teardown(&e);
                Err(e)
            }
        }
    }

    /// Close the transport and forget the session. Pending commands fail.
    /// The close itself gives up on cancellation or after [`SHUTDOWN_GRACE`].
    pub async fn shutdown(&mut self, cancel: &CancellationToken) {
        if let Some(mut t) = self.transport.take() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => tracing::debug!("close abandoned: cancelled"),
                r = tokio::time::timeout(SHUTDOWN_GRACE, t.shutdown()) => {
                    if r.is_err() {
                        tracing::debug!("close abandoned: peer not reading");
                    }
                }
            }
        }
        self.fail_all(Pop3Error::NotConnected);
        self.session.reset();
    }

    fn fail_all(&mut self, error: Pop3Error) {
        while let Some(cmd) = self.queue.pop_front() {
            let id = cmd.id;
            cmd.completion.complete(&mut self.context(), Err(error.clone()));
            self.last_resolved = id;
        }
    }

    fn teardown(&mut self, error: &Pop3Error) {
        tracing::warn!(error = %error, pending = self.queue.len(), "POP3 session failed");
        self.transport = None;
        self.fail_all(error.clone());
        self.session.reset();
    }
}

/// One full exchange for `cmd`. The outer error is a transport failure;
/// the inner result is what the handler sees.
async fn exchange(
    t: &mut Transport,
    cmd: &mut PendingCommand,
) -> Result<Result<Reply, Pop3Error>, Pop3Error> {
    cmd.completion.activate();
    if let Some(text) = &cmd.command.text {
        tracing::debug!(id = cmd.id, "C: {}", cmd.command.log_text());
        t.write_line(text.as_bytes()).await?;
    }
    let status = parse_status(&t.read_line().await?);
    match &mut cmd.command.shape {
        ReplyShape::Line => Ok(Ok(Reply::from_status(status, Body::None))),
        ReplyShape::Lines => {
            let body = if status.is_ok() {
                Body::Lines(t.read_lines().await?)
            } else {
                Body::None
            };
            Ok(Ok(Reply::from_status(status, body)))
        }
        ReplyShape::Data => {
            let body = if status.is_ok() {
                t.set_mode(TransportMode::Data);
                let data = t.read_data().await;
                t.set_mode(TransportMode::Line);
                Body::Data(data?)
            } else {
                Body::None
            };
            Ok(Ok(Reply::from_status(status, body)))
        }
        ReplyShape::Sasl(mechanism) => sasl_exchange(t, mechanism.as_mut(), status).await,
    }
}

async fn sasl_exchange(
    t: &mut Transport,
    mechanism: &mut dyn SaslClient,
    mut status: StatusLine,
) -> Result<Result<Reply, Pop3Error>, Pop3Error> {
    while status.status == Status::Continue {
        let challenge = match BASE64.decode(status.text.trim()) {
            Ok(c) => c,
            Err(_) => {
                abort_sasl(t).await?;
                return Ok(Err(Pop3Error::protocol(format!(
                    "undecodable SASL challenge: {:?}",
                    status.text
                ))));
            }
        };
        let response = match mechanism.step(&challenge) {
            Ok(r) => r,
            Err(e) => {
                abort_sasl(t).await?;
                return Ok(Err(e.into()));
            }
        };
        tracing::debug!(mechanism = %mechanism.mechanism(), "C: <SASL response>");
        t.write_line(BASE64.encode(response).as_bytes()).await?;
        status = parse_status(&t.read_line().await?);
    }
    let mut reply = Reply::from_status(status, Body::None);
    reply.sasl_authenticated = mechanism.is_authenticated();
    Ok(Ok(reply))
}

/// Cancel an exchange with `*` and consume the server's final reply.
async fn abort_sasl(t: &mut Transport) -> Result<(), Pop3Error> {
    tracing::debug!("C: *");
    t.write_line(b"*").await?;
    let status = parse_status(&t.read_line().await?);
    if status.status == Status::Continue {
        return Err(Pop3Error::protocol("server continued a cancelled SASL exchange"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::pop3::response::ResponseCode;
    use crate::sasl::{new_client, SaslMechanism};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::task::JoinHandle;

    /// Engine over a peer that sends `replies` up front and records
    /// everything the client writes until the engine is dropped.
    fn scripted(replies: &'static [u8]) -> (Engine, JoinHandle<String>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (mut rd, mut wr) = tokio::io::split(server);
        let peer = tokio::spawn(async move {
            wr.write_all(replies).await.unwrap();
            let mut out = Vec::new();
            let _ = rd.read_to_end(&mut out).await;
            String::from_utf8(out).unwrap()
        });
        let mut engine = Engine::new();
        engine.attach(Box::new(client), false);
        (engine, peer)
    }

    fn ok_text(_: &mut Context<'_>, r: Reply) -> Result<String, Pop3Error> {
        r.into_ok("TEST").map(|r| r.text)
    }

    #[tokio::test]
    async fn handlers_run_in_fifo_order() {
        let (mut engine, peer) = scripted(b"+OK one\r\n+OK two\r\n+OK three\r\n");
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for n in ["A", "B", "C"] {
            let order = Arc::clone(&order);
            handles.push(engine.enqueue(Command::new(format!("NOOP {}", n)), move |_, r| {
                order.lock().unwrap().push(r.text.clone());
                Ok(r.text)
            }));
        }
        assert!(handles.windows(2).all(|w| w[0].id() < w[1].id()));
        assert_eq!(handles[0].status(), CommandStatus::Queued);

        let cancel = CancellationToken::new();
        let last = handles.pop().unwrap();
        assert_eq!(engine.run(last, &cancel).await.unwrap(), "three");
        assert_eq!(*order.lock().unwrap(), vec!["one", "two", "three"]);
        assert_eq!(handles[0].status(), CommandStatus::Ok);
        assert_eq!(handles[1].take().unwrap().unwrap(), "two");

        drop(engine);
        assert_eq!(peer.await.unwrap(), "NOOP A\r\nNOOP B\r\nNOOP C\r\n");
    }

    #[tokio::test]
    async fn nothing_is_written_before_a_step() {
        let (mut engine, peer) = scripted(b"");
        let h = engine.enqueue(Command::new("STAT"), ok_text);
        assert!(!h.is_resolved());
        drop(engine);
        assert_eq!(peer.await.unwrap(), "");
    }

    #[tokio::test]
    async fn command_error_does_not_break_the_stream() {
        let (mut engine, _peer) = scripted(b"-ERR [IN-USE] locked\r\n+OK fine\r\n");
        let cancel = CancellationToken::new();
        let first = engine.enqueue(Command::new("DELE 1"), ok_text);
        let second = engine.enqueue(Command::new("NOOP"), ok_text);
        let err = engine.run(first, &cancel).await.unwrap_err();
        assert!(matches!(err, Pop3Error::Command { ref command, .. } if command == "TEST"));
        assert_eq!(err.response_code(), Some(&ResponseCode::InUse));
        assert_eq!(engine.run(second, &cancel).await.unwrap(), "fine");
        assert!(engine.is_connected());
    }

    #[tokio::test]
    async fn multi_line_body_only_after_ok() {
        let (mut engine, _peer) = scripted(b"-ERR no\r\n+OK\r\na\r\n..b\r\n.\r\n+OK after\r\n");
        let cancel = CancellationToken::new();
        let failed = engine.enqueue(Command::new("CAPA").lines(), |_, r| Ok(r.lines()));
        let listed = engine.enqueue(Command::new("CAPA").lines(), |_, r| Ok(r.lines()));
        let after = engine.enqueue(Command::new("NOOP"), ok_text);
        assert!(engine.run(failed, &cancel).await.unwrap().is_empty());
        assert_eq!(engine.run(listed, &cancel).await.unwrap(), vec!["a", ".b"]);
        assert_eq!(engine.run(after, &cancel).await.unwrap(), "after");
    }

    #[tokio::test]
    async fn cancellation_fails_every_pending_command() {
        let (mut engine, _peer) = scripted(b"+OK one\r\n");
        let cancel = CancellationToken::new();
        let a = engine.enqueue(Command::new("NOOP"), ok_text);
        let b = engine.enqueue(Command::new("NOOP"), ok_text);
        let c = engine.enqueue(Command::new("NOOP"), ok_text);
        assert_eq!(engine.run(a, &cancel).await.unwrap(), "one");
        // Peer has nothing more to say but stays open: cancel the wait.
        cancel.cancel();
        let err = engine.run(b, &cancel).await.unwrap_err();
        assert!(matches!(err, Pop3Error::Cancelled));
        assert!(matches!(c.take(), Some(Err(Pop3Error::Cancelled))));
        assert!(!engine.is_connected());
        assert!(engine.is_idle());
    }

    #[tokio::test]
    async fn eof_mid_body_is_fatal() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut engine = Engine::new();
        engine.attach(Box::new(client), false);
        tokio::spawn(async move {
            server.write_all(b"+OK\r\nFrom: x\r\n").await.unwrap();
            let mut buf = [0u8; 64];
            let _ = server.read(&mut buf).await;
        });
        let cancel = CancellationToken::new();
        let h = engine.enqueue(Command::new("RETR 1").data(), |_, r| Ok(r.data()));
        let err = engine.run(h, &cancel).await.unwrap_err();
        assert!(matches!(err, Pop3Error::Io(_)));
        assert!(!engine.is_connected());
    }

    #[tokio::test]
    async fn sasl_loop_answers_challenges() {
        // CRAM-MD5, RFC 2195 section 2.
        let (mut engine, peer) =
            scripted(b"+ PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n+OK welcome\r\n");
        let cancel = CancellationToken::new();
        let mech = new_client(SaslMechanism::CramMd5, "tim", "tanstaaftanstaaf");
        let h = engine.enqueue(Command::sasl(mech), |_, r| Ok((r.status, r.sasl_authenticated)));
        assert_eq!(engine.run(h, &cancel).await.unwrap(), (Status::Ok, true));
        drop(engine);
        assert_eq!(
            peer.await.unwrap(),
            "AUTH CRAM-MD5\r\ndGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n"
        );
    }

    #[tokio::test]
    async fn sasl_garbage_challenge_is_cancelled() {
        let (mut engine, peer) = scripted(b"+ !!not base64!!\r\n-ERR cancelled\r\n+OK next\r\n");
        let cancel = CancellationToken::new();
        let mech = new_client(SaslMechanism::Plain, "user", "pw");
        let h = engine.enqueue(Command::sasl(mech), |_, r| Ok(r.status));
        let next = engine.enqueue(Command::new("NOOP"), ok_text);
        assert!(matches!(engine.run(h, &cancel).await, Err(Pop3Error::Protocol(_))));
        assert_eq!(engine.run(next, &cancel).await.unwrap(), "next");
        drop(engine);
        assert_eq!(peer.await.unwrap(), "AUTH PLAIN\r\n*\r\nNOOP\r\n");
    }

    #[tokio::test]
    async fn handlers_can_queue_follow_ups() {
        let (mut engine, peer) = scripted(b"+OK first\r\n+OK second\r\n+OK follow-up\r\n");
        let cancel = CancellationToken::new();
        let first = engine.enqueue(Command::new("NOOP A"), |ctx, r| {
            r.into_ok("NOOP")?;
            Ok(ctx.enqueue(Command::new("NOOP F"), ok_text))
        });
        let second = engine.enqueue(Command::new("NOOP B"), ok_text);
        let follow_up = engine.run(first, &cancel).await.unwrap();
        assert!(follow_up.id() > second.id());
        assert_eq!(follow_up.status(), CommandStatus::Queued);
        assert_eq!(engine.run(follow_up, &cancel).await.unwrap(), "follow-up");
        assert_eq!(second.take().unwrap().unwrap(), "second");
        drop(engine);
        assert_eq!(peer.await.unwrap(), "NOOP A\r\nNOOP B\r\nNOOP F\r\n");
    }

    #[tokio::test]
    async fn queued_commands_use_the_upgraded_stream() {
        let (mut engine, plain) = scripted(b"");
        let (upgraded, server) = tokio::io::duplex(1024);
        let (mut rd, mut wr) = tokio::io::split(server);
        let secured = tokio::spawn(async move {
            wr.write_all(b"+OK over tls\r\n").await.unwrap();
            let mut out = Vec::new();
            let _ = rd.read_to_end(&mut out).await;
            String::from_utf8(out).unwrap()
        });
        let cancel = CancellationToken::new();
        let h = engine.enqueue(Command::new("CAPA"), ok_text);
        engine
            .upgrade_transport(move |_| async move { Ok::<BoxedStream, Pop3Error>(Box::new(upgraded)) }, &cancel)
            .await
            .unwrap();
        assert!(engine.is_secure());
        assert_eq!(engine.run(h, &cancel).await.unwrap(), "over tls");
        drop(engine);
        assert_eq!(plain.await.unwrap(), "");
        assert_eq!(secured.await.unwrap(), "CAPA\r\n");
    }

    /// Accepts writes, never reads, never finishes closing.
    struct Stalled;

    impl tokio::io::AsyncRead for Stalled {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
            _: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Pending
        }
    }

    impl tokio::io::AsyncWrite for Stalled {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Pending
        }
    }

    #[tokio::test]
    async fn shutdown_gives_up_on_a_stalled_close() {
        let mut engine = Engine::new();
        engine.attach(Box::new(Stalled), true);
        engine.session.count = 3;
        let pending = engine.enqueue(Command::new("QUIT"), ok_text);
        let cancel = CancellationToken::new();
        cancel.cancel();
        engine.shutdown(&cancel).await;
        assert!(!engine.is_connected());
        assert_eq!(engine.session.count, 0);
        assert!(matches!(pending.take(), Some(Err(Pop3Error::NotConnected))));
    }
}
