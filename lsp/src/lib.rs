//! Language-agnostic LSP client runtime.
//!
//! A [`Connection`] launches a language server described by a
//! [`LanguageAdapter`], performs the `initialize` handshake, and answers
//! semantic queries (definitions, references, symbols) while draining
//! server-pushed traffic in the background.

pub mod codec;
pub mod message;
pub mod protocol;
pub mod types;

mod adapter;
mod connection;
mod correlator;
mod dispatch;
mod documents;
mod error;
mod probe;
mod process;
mod query;
mod state;

pub use adapter::LanguageAdapter;
pub use connection::Connection;
pub use dispatch::{HandlerTable, NotificationHandler, RequestHandler};
pub use error::{ClientError, HandshakeError, QueryError, RequestError, TerminationReason};
pub use message::{RemoteError, RequestId};
pub use probe::{ProbeOutcome, probe_binary};
pub use process::{ExitReason, ProcessPipes, STDERR_TARGET, ServerProcess, StartupError};
pub use state::ConnectionState;
pub use types::{CapabilityPolicy, ClientOptions};
