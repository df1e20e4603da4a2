//! One participant, from accept to close.
//!
//! A session is two tasks. The reader half runs [`Session::run`]: it negotiates a nickname, then
//! reads lines and dispatches them. The writer half drains a bounded queue of [`Outgoing`] items
//! onto the socket. Anyone who wants to talk to the participant (its own session, or a broadcast
//! from another one) pushes into that queue, so no socket write ever happens under the registry
//! lock.
//!
//! ```text
//!            Connecting -> Negotiating -> Active -> Closed
//!                 |              |   ^  (taken)       ^
//!                 |              +---+                |
//!                 +--------------+--------------------+
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, Instrument};

use crate::broadcast::Broadcaster;
use crate::codec::{LineCodec, DEFAULT_MAX_LINE_LENGTH};
use crate::command::Command;
use crate::message::Notice;
use crate::registry::{DeliveryError, Member, NameTaken, Registry};

/// Process-unique id of a connection. Nicknames can be reused, ids are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An item on a session's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Line(Arc<str>),
    /// Flush what came before, then shut the write half.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Negotiating,
    Active,
    Closed,
}

impl SessionState {
    fn can_become(self, next: SessionState) -> bool {
        use self::SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Connecting, Negotiating) | (Negotiating, Active) => true,
            _ => false,
        }
    }
}

/// Per-connection knobs taken from the server configuration.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub max_line_length: usize,
    pub outbound_buffer: usize,
    /// How long a connection may take to settle on a nickname. `None` waits forever.
    pub nickname_timeout: Option<Duration>,
    /// How long a closing session waits for queued lines to reach the socket.
    pub writer_drain: Duration,
}

impl Default for SessionLimits {
    fn default() -> SessionLimits {
        SessionLimits {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            outbound_buffer: 256,
            nickname_timeout: None,
            writer_drain: Duration::from_secs(5),
        }
    }
}

/// What every session shares.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub registry: Registry,
    pub broadcaster: Broadcaster,
    pub limits: SessionLimits,
}

impl SessionContext {
    pub fn new(registry: Registry, limits: SessionLimits) -> SessionContext {
        SessionContext {
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            limits,
        }
    }
}

/// Runs a session over `stream` until it closes.
///
/// Cancelling `closer` forces the connection shut from the server side.
pub async fn serve<S>(
    stream: S,
    id: SessionId,
    addr: SocketAddr,
    ctx: SessionContext,
    closer: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let codec = LineCodec::new(ctx.limits.max_line_length);
    let mut lines = FramedRead::new(reader, codec.clone());
    let (outbox, queue) = mpsc::channel(ctx.limits.outbound_buffer);
    let drain = ctx.limits.writer_drain;

    let mut writer = tokio::spawn(
        write_loop(FramedWrite::new(writer, codec), queue, closer.clone()).in_current_span(),
    );

    let mut session = Session::new(id, addr, outbox, closer.clone(), ctx);
    session.run(&mut lines).await;
    drop(session);

    if tokio::time::timeout(drain, &mut writer).await.is_err() {
        debug!("writer did not drain in time, forcing close");
        closer.cancel();
        let _ = writer.await;
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, LineCodec>,
    mut queue: Receiver<Outgoing>,
    closer: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = closer.cancelled() => break,
            next = queue.recv() => next,
        };
        let line = match next {
            Some(Outgoing::Line(line)) => line,
            Some(Outgoing::Close) | None => {
                if let Err(err) = SinkExt::<Arc<str>>::close(&mut sink).await {
                    debug!(error = %err, "closing connection failed");
                }
                return;
            }
        };
        let sent = tokio::select! {
            biased;
            _ = closer.cancelled() => break,
            sent = sink.send(line) => sent,
        };
        if let Err(err) = sent {
            debug!(error = %err, "write failed");
            break;
        }
    }
    // Forced or broken: skip whatever is still buffered.
    let _ = sink.get_mut().shutdown().await;
}

pub struct Session {
    id: SessionId,
    addr: SocketAddr,
    state: SessionState,
    name: Option<Arc<str>>,
    outbox: Sender<Outgoing>,
    closer: CancellationToken,
    ctx: SessionContext,
}

impl Session {
    pub fn new(
        id: SessionId,
        addr: SocketAddr,
        outbox: Sender<Outgoing>,
        closer: CancellationToken,
        ctx: SessionContext,
    ) -> Session {
        Session {
            id,
            addr,
            state: SessionState::Connecting,
            name: None,
            outbox,
            closer,
            ctx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The negotiated nickname, once there is one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Drives the session through every state and always ends `Closed`.
    pub async fn run<R>(&mut self, lines: &mut FramedRead<R, LineCodec>)
    where
        R: AsyncRead + Unpin,
    {
        self.transition(SessionState::Negotiating);
        if self.negotiate(lines).await {
            self.converse(lines).await;
        }
        self.close();
    }

    /// Leaves the chat. Only the first call does anything.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let was_active = self.state == SessionState::Active;
        self.transition(SessionState::Closed);

        if let (true, Some(name)) = (was_active, self.name.clone()) {
            if self.ctx.registry.remove(&name, self.id) {
                let notified = self
                    .ctx
                    .broadcaster
                    .broadcast(&Notice::Left(name.clone()).to_string(), None);
                info!(nick = %name, notified, online = self.ctx.registry.len(), "left");
            }
        }

        if self.outbox.try_send(Outgoing::Close).is_err() {
            self.closer.cancel();
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_become(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Returns `true` once a nickname is registered; `false` means close without announcing.
    async fn negotiate<R>(&mut self, lines: &mut FramedRead<R, LineCodec>) -> bool
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if self.reply(Notice::Prompt).await.is_err() {
                return false;
            }
            let candidate = match self.ctx.limits.nickname_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.read_line(lines)).await {
                    Ok(line) => line,
                    Err(_) => {
                        info!(peer = %self.addr, "nickname negotiation timed out");
                        None
                    }
                },
                None => self.read_line(lines).await,
            };
            let candidate = match candidate {
                Some(candidate) => candidate,
                None => return false,
            };
            let nick = candidate.trim();
            if nick.is_empty() {
                debug!(peer = %self.addr, "empty nickname");
                return false;
            }

            let name: Arc<str> = Arc::from(nick);
            let member = Member::new(
                self.id,
                name.clone(),
                self.addr,
                self.outbox.clone(),
                self.closer.clone(),
            );
            // The greeting takes one queue slot, reserved up front and filled while the registry
            // is still locked, so no broadcast can be queued ahead of it.
            let permit = match self.outbox.reserve().await {
                Ok(permit) => permit,
                Err(_) => return false,
            };
            let welcome = Notice::Welcome(name.clone());
            let joined = self.ctx.registry.try_insert_with(member, move |online| {
                let greeting = format!("{}\n{}", welcome, Notice::Online(online));
                permit.send(Outgoing::Line(Arc::from(greeting)));
            });
            match joined {
                Ok(online) => {
                    self.name = Some(name.clone());
                    self.transition(SessionState::Active);
                    info!(nick = %name, peer = %self.addr, online, "joined");
                    let _ = self
                        .ctx
                        .broadcaster
                        .broadcast(&Notice::Joined(name.clone()).to_string(), Some(&*name));
                    return true;
                }
                Err(NameTaken(taken)) => {
                    debug!(nick = %taken, "nickname taken");
                    if self
                        .reply(Notice::NicknameTaken(taken.to_string()))
                        .await
                        .is_err()
                    {
                        return false;
                    }
                }
            }
        }
    }

    async fn converse<R>(&mut self, lines: &mut FramedRead<R, LineCodec>)
    where
        R: AsyncRead + Unpin,
    {
        while let Some(line) = self.read_line(lines).await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match Command::parse(line) {
                Some(command) => {
                    if self.execute(command).await.is_break() {
                        break;
                    }
                }
                None => self.chat(line),
            }
        }
    }

    async fn execute(&mut self, command: Command) -> ControlFlow<()> {
        debug!(?command, "command");
        let notice = match command {
            Command::Help => Notice::Help,
            Command::Users => Notice::Users(self.ctx.registry.names()),
            Command::Time => Notice::now(),
            Command::Quit => {
                let _ = self.reply(Notice::Farewell).await;
                return ControlFlow::Break(());
            }
            Command::Unknown(input) => Notice::UnknownCommand(input),
        };
        match self.reply(notice).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }

    fn chat(&self, text: &str) {
        let name = match &self.name {
            Some(name) => name.clone(),
            None => return,
        };
        info!(nick = %name, text, "chat message");
        let notice = Notice::chat(name.clone(), text);
        let _ = self.ctx.broadcaster.broadcast(&notice.to_string(), Some(&*name));
    }

    /// Sends to this participant only, waiting for room in its queue.
    async fn reply(&self, notice: Notice) -> Result<(), DeliveryError> {
        self.outbox
            .send(Outgoing::Line(Arc::from(notice.to_string())))
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    /// Next line from the peer, or `None` on EOF, a transport error or a forced close.
    async fn read_line<R>(&self, lines: &mut FramedRead<R, LineCodec>) -> Option<String>
    where
        R: AsyncRead + Unpin,
    {
        let item = tokio::select! {
            _ = self.closer.cancelled() => {
                debug!("connection closed by server");
                return None;
            }
            item = lines.next() => item,
        };
        match item {
            Some(Ok(line)) => Some(line),
            Some(Err(err)) => {
                debug!(error = %err, "read failed");
                None
            }
            None => {
                debug!("peer closed the connection");
                None
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("name", &self.name)
            .finish()
    }
}
