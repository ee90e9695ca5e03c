//! # xterm-bridge
//!
//! Attaches interactive shells running in a container to a remote terminal
//! relay. Each request opens a session: a shell in a PTY on one side, a
//! WebSocket connection to the relay on the other.
//!
//! ## Architecture
//!
//! ```text
//!        relay (ws://<host>:10411/container/<task_manager_id>/<session_id>)
//!            │ inbound frames                   ▲ text frames, one per tick
//!            ▼                                  │
//!    ┌────────────────┐                 ┌──────────────┐
//!    │ Input Forwarder│                 │   Flusher    │◀── 100ms timer
//!    └───────┬────────┘                 └──────▲───────┘
//!            │ write                           │ drain
//!            ▼                          ┌──────┴───────┐
//!    ┌────────────────┐   read chunks   │ Output Buffer│
//!    │   PTY shell    │────────────────▶│  (bounded)   │
//!    └────────────────┘  Output Batcher └──────────────┘
//! ```
//!
//! Any of the three tasks reaching a terminal condition cancels the session;
//! teardown then stops intake, flushes or discards what is buffered, closes
//! the relay connection and terminates the shell.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, validation and defaults
//! - [`host`]: Container host address discovery
//! - [`server`]: Inbound HTTP endpoint
//! - [`session`]: Session lifecycle, output batching, PTY processes
//! - [`transport`]: Relay connection over WebSocket

pub mod config;
pub mod host;
pub mod server;
pub mod session;
pub mod transport;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{
    ExitReason, OutputBuffer, OverflowPolicy, PtySpawner, Session, SessionError, SessionHandle,
    SessionKey, SessionOutcome, SessionRegistry, SessionSettings, SessionState, ShellConfig,
};

// Re-export transport types for convenience
pub use transport::{Connection, Dialer, RelayEndpoint, TransportError, WebSocketDialer};
