//! Chat platform adapter for the fleet.
//!
//! - `transport` - wire client port with reconnect policy and a noop client
//! - `session` - `ConnectionSession` implementation with an inbound event pump
//! - `factory` - credential-checked session construction
//! - `artifacts` - on-disk session material per tenant
//! - `handlers` - `/d_`, `/x_`, `/r_` commands and throttled search
//! - `hooks` - attaches handlers after start and detaches them before stop

pub mod artifacts;
pub mod factory;
pub mod handlers;
pub mod hooks;
pub mod session;
pub mod transport;

pub use artifacts::FsSessionArtifacts;
pub use factory::ChatSessionFactory;
pub use handlers::{parse_command, CommandHandler, InboundCommand};
pub use hooks::CommandHooks;
pub use session::ChatSession;
pub use transport::{
    ChatTransport, InboundMessage, NoopChatTransport, NoopTransportFactory, ReconnectPolicy,
    TransportError, TransportFactory, Uploaded,
};
