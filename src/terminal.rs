//! The interactive client: a terminal wired to a chat server.
//!
//! Lines typed on stdin go to the server, lines from the server go to stdout. Nickname negotiation
//! needs no special handling here since the server drives it with plain prompts.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use crate::codec::LineCodec;
use crate::config::ClientConfig;
use crate::error::ChatError;

/// Why a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hangup {
    /// The server closed the connection (for example after `/quit`).
    Server,
    /// Local input ran out.
    Input,
}

/// Connects to the configured server and relays until either side hangs up or Ctrl-C.
pub async fn run(config: &ClientConfig) -> Result<(), ChatError> {
    let addr = format!("{}:{}", config.host, config.port);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| ChatError::Connect { addr: addr.clone(), source })?;
    info!(%addr, "connected");

    tokio::select! {
        hangup = relay(stream, tokio::io::stdin(), tokio::io::stdout()) => {
            let hangup = hangup?;
            debug!(?hangup, "relay finished");
        }
        _ = tokio::signal::ctrl_c() => {
            debug!("interrupted");
        }
    }
    Ok(())
}

/// Pumps lines between `server` and the local `input`/`output` pair.
///
/// Blank input lines are not sent.
pub async fn relay<S, I, O>(server: S, input: I, output: O) -> Result<Hangup, ChatError>
where
    S: AsyncRead + AsyncWrite,
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let (server_reader, server_writer) = tokio::io::split(server);
    // The server bounds what it accepts, not what it relays: a chat line at the limit grows by
    // its timestamp and nickname prefix on the way back.
    let mut incoming = FramedRead::new(server_reader, LineCodec::unbounded());
    let mut outgoing = FramedWrite::new(server_writer, LineCodec::default());
    let mut input = FramedRead::new(input, LineCodec::default());
    let mut output = FramedWrite::new(output, LineCodec::default());

    let hangup = loop {
        tokio::select! {
            line = incoming.next() => match line {
                Some(line) => output.send(line?).await?,
                None => break Hangup::Server,
            },
            line = input.next() => match line {
                Some(line) => {
                    let line = line?;
                    let line = line.trim();
                    if !line.is_empty() {
                        outgoing.send(line).await?;
                    }
                }
                None => break Hangup::Input,
            },
        }
    };

    let _ = SinkExt::<&str>::close(&mut outgoing).await;
    SinkExt::<String>::flush(&mut output).await?;
    Ok(hangup)
}
