//! # A line-oriented multi-client TCP chat.
//!
//! A server accepts any number of connections. Each one picks a unique nickname, then every line it
//! sends is either a chat message, relayed with a timestamp to everyone else online, or a `/command`
//! answered privately:
//!
//! 1. `/help` lists the commands,
//! 2. `/users` lists who is online,
//! 3. `/time` shows the server's clock,
//! 4. `/quit` leaves the chat.
//!
//! Joins and departures are announced to the rest of the room. A taken nickname is refused and the
//! client is asked again on the same connection.
//!
//! The same binary also carries a terminal client (`chatroom connect`).
//!
//! Architecture:
//!
//! ```text
//!  TcpListener
//!     v
//! +-----------+              +---------------+               +-----------------+
//! | TcpStream |<-LineCodec-->| Session read  |--try_insert-->|                 |
//! |           |              |               |<--names-------|    Registry     |
//! |           |              +---------------+               |  (one mutex)    |
//! |           |                     |                        |                 |
//! |           |                     v                        +-----------------+
//! |           |              +---------------+                        ^
//! |           |<-LineCodec---| Session write |<--bounded mpsc--+  snapshot
//! +-----------+              +---------------+                 |      |
//! | ...       |                  ...                           +-Broadcaster
//! +-----------+
//! ```

pub mod broadcast;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod terminal;

pub use crate::broadcast::Broadcaster;
pub use crate::codec::LineCodec;
pub use crate::command::Command;
pub use crate::config::{ClientConfig, ServerConfig};
pub use crate::error::{ChatError, CodecError};
pub use crate::message::Notice;
pub use crate::registry::Registry;
pub use crate::server::Server;
pub use crate::session::{SessionId, SessionState};
