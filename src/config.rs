//! Command line and environment configuration.
//!
//! Every flag can also come from a `CHATROOM_*` environment variable; an explicit flag wins.

use std::time::Duration;

use clap::builder::TypedValueParser;
use clap::{Args, Parser, Subcommand};

use crate::codec::DEFAULT_MAX_LINE_LENGTH;
use crate::session::SessionLimits;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 12347;

#[derive(Parser, Debug)]
#[command(name = "chatroom", version, about = "A line-oriented multi-client TCP chat.")]
pub struct Cli {
    /// Emit logs as JSON lines instead of human readable text.
    #[arg(long, global = true, env = "CHATROOM_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Run the chat server.
    Serve(ServerConfig),
    /// Join a chat server from this terminal.
    Connect(ClientConfig),
}

#[derive(Args, Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, env = "CHATROOM_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, env = "CHATROOM_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Longest accepted line in bytes. Longer lines drop the connection.
    #[arg(
        long,
        env = "CHATROOM_MAX_LINE_LENGTH",
        default_value_t = DEFAULT_MAX_LINE_LENGTH,
        value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize)
    )]
    pub max_line_length: usize,

    /// Lines queued per client before broadcasts to it are dropped.
    #[arg(
        long,
        env = "CHATROOM_OUTBOUND_BUFFER",
        default_value_t = 256,
        value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize)
    )]
    pub outbound_buffer: usize,

    /// Disconnect clients that have not chosen a nickname after this many seconds.
    /// Without it a silent client may wait at the prompt forever.
    #[arg(long, env = "CHATROOM_NICKNAME_TIMEOUT_SECS")]
    pub nickname_timeout_secs: Option<u64>,

    /// How long shutdown waits for sessions to finish closing, in milliseconds.
    #[arg(long, env = "CHATROOM_SHUTDOWN_GRACE_MS", default_value_t = 2000)]
    pub shutdown_grace_ms: u64,
}

impl ServerConfig {
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_line_length: self.max_line_length,
            outbound_buffer: self.outbound_buffer,
            nickname_timeout: self.nickname_timeout_secs.map(Duration::from_secs),
            ..SessionLimits::default()
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            outbound_buffer: 256,
            nickname_timeout_secs: None,
            shutdown_grace_ms: 2000,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientConfig {
    /// Server to connect to.
    #[arg(long, env = "CHATROOM_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, env = "CHATROOM_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
}
