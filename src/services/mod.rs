//! Domain services used by the websocket, long-poll, and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! `room` and `dispatch` own the broadcast layer, `relay` and `poll` are the
//! transport-neutral halves of the two channel transports, and `policy` and
//! `report` guard the store. Route handlers stay focused on protocol
//! translation and identity plumbing.

pub mod dispatch;
pub mod poll;
pub mod policy;
pub mod relay;
pub mod report;
pub mod room;
