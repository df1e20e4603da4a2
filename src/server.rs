//! Accepts connections and owns the shared state every session works against.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ServerConfig;
use crate::error::ChatError;
use crate::registry::Registry;
use crate::session::{self, SessionContext, SessionId};

pub struct Server {
    listener: TcpListener,
    ctx: SessionContext,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    grace: Duration,
    next_id: u64,
}

impl Server {
    /// Binds the listening socket. Failing here is fatal for the process.
    pub async fn bind(config: &ServerConfig) -> Result<Server, ChatError> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ChatError::Bind { addr, source })?;
        Ok(Server {
            listener,
            ctx: SessionContext::new(Registry::new(), config.session_limits()),
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
            grace: config.shutdown_grace(),
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Registry {
        self.ctx.registry.clone()
    }

    /// Cancelling this token stops the server as if [`Server::run_until`]'s signal fired.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serves until `signal` resolves, then shuts down.
    pub async fn run_until<F>(self, signal: F) -> Result<(), ChatError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.shutdown.clone();
        let trigger = tokio::spawn(async move {
            tokio::select! {
                _ = signal => token.cancel(),
                _ = token.cancelled() => {}
            }
        });
        let result = self.run().await;
        trigger.abort();
        result
    }

    /// Accepts until the shutdown token is cancelled or the listener fails for good.
    pub async fn run(mut self) -> Result<(), ChatError> {
        match self.local_addr() {
            Ok(addr) => info!(%addr, "chat server listening"),
            Err(err) => warn!(error = %err, "chat server listening on unknown address"),
        }

        let mut fatal = None;
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => self.spawn_session(stream, addr),
                Err(err) if is_transient(&err) => {
                    warn!(error = %err, "failed to accept connection");
                }
                Err(err) => {
                    error!(error = %err, "listener failed");
                    fatal = Some(err);
                    break;
                }
            }
        }

        self.stop().await;
        match fatal {
            Some(err) => Err(ChatError::Accept(err)),
            None => Ok(()),
        }
    }

    fn spawn_session(&mut self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        info!(session_id = %id, peer = %addr, "connection accepted");

        let span = info_span!("session", session_id = %id, peer = %addr);
        let closer = self.shutdown.child_token();
        let _ = self.sessions.spawn(
            session::serve(stream, id, addr, self.ctx.clone(), closer).instrument(span),
        );
    }

    async fn stop(self) {
        let Server {
            listener,
            ctx,
            shutdown,
            sessions,
            grace,
            ..
        } = self;
        drop(listener);

        let members = ctx.registry.drain();
        info!(online = members.len(), "shutting down, closing connections");
        for member in members.iter() {
            debug!(nick = %member.name, peer = %member.addr, "closing");
            member.close();
        }
        // Sessions still choosing a nickname are not in the registry.
        shutdown.cancel();

        let _ = sessions.close();
        if tokio::time::timeout(grace, sessions.wait()).await.is_err() {
            warn!(remaining = sessions.len(), "sessions still running after shutdown grace period");
        }
        info!("chat server stopped");
    }
}

/// Errors that concern one incoming connection rather than the listener.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_resource_exhaustion(err)
}

/// Out of file descriptors or buffers. Retrying later can succeed.
#[cfg(unix)]
fn is_resource_exhaustion(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::OutOfMemory
        || matches!(
            err.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::OutOfMemory
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_connection_errors_are_transient() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_and_buffer_exhaustion_is_transient() {
        for errno in [libc::EMFILE, libc::ENFILE, libc::ENOBUFS, libc::ENOMEM] {
            assert!(is_transient(&io::Error::from_raw_os_error(errno)), "errno {}", errno);
        }
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EBADF)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EINVAL)));
        // ENOBUFS on macOS, ENOANO on Linux
        #[cfg(target_os = "linux")]
        assert!(!is_transient(&io::Error::from_raw_os_error(55)));
    }

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..ServerConfig::default()
        };
        match Server::bind(&config).await {
            Err(ChatError::Bind { addr, .. }) => assert!(addr.ends_with(&config.port.to_string())),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("bound an address that is in use"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_stops_an_idle_server() {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let server = Server::bind(&config).await.unwrap();
        let token = server.shutdown_token();
        let handle = tokio::spawn(server.run());
        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
