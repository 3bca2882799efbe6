//! # hubbub-core
//!
//! Connection registry, connection actor and event dispatch for the hubbub
//! realtime hub.
//!
//! - **Registry** - live connections, rooms and post subscriptions
//! - **Actor** - one inbound and one outbound loop per connection
//! - **Router** - discriminator dispatch to typed handlers
//! - **Handlers** - validate, persist, then broadcast
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌─────────┐   ┌──────────┐   ┌────────────┐
//! │  Actor  │──▶│ Router  │──▶│ Handler  │──▶│ Repository │
//! └─────────┘   └─────────┘   └──────────┘   └────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────┐     queue       ┌──────────┐
//! │ Writer  │◀────────────────│ Registry │
//! └─────────┘                 └──────────┘
//! ```

pub mod actor;
pub mod connection;
pub mod dispatch;
mod group;
pub mod handlers;
pub mod hub;
pub mod message;
pub mod repository;
pub mod traits;

pub use actor::{run_connection, CloseReason, ConnectionConfig, ConnectionContext, ConnectionSummary};
pub use connection::{ConnectionHandle, ConnectionState, EnqueueError};
pub use dispatch::EventRouter;
pub use handlers::HandlerError;
pub use hub::{HubError, Registry, RegistryConfig, RegistryStats};
pub use repository::{
    CommentRepository, InMemoryStore, MessageRepository, RepositoryError, StoredComment,
    StoredMessage, DEFAULT_RETENTION,
};
pub use traits::{Fanout, Peer};
