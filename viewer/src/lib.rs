//! Viewer side of the civic relay.
//!
//! A viewer holds one [`Channel`] to the relay and one reconciler per
//! concern it displays: [`CommentThread`], [`VoteToggle`] and
//! [`StatusBoard`]. Reconcilers read and write the report store through
//! [`StoreApi`], broadcast confirmed changes through an [`EventSink`], and
//! fold peer broadcasts in via [`Reconciler::apply`] (usually driven by
//! [`follow`]).

pub mod action;
pub mod channel;
pub mod comments;
pub mod config;
pub mod error;
pub mod status;
pub mod store;
pub mod votes;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use action::{ActionState, Reconciler, follow};
pub use channel::{Channel, ChannelStatus, ConnectionState, EventSink, RoomView};
pub use comments::CommentThread;
pub use config::{ChannelConfig, ReconcileConfig};
pub use error::{ClientError, ReconcileError};
pub use status::StatusBoard;
pub use store::{HttpStore, StoreApi};
pub use votes::VoteToggle;
