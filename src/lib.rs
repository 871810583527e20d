//! Session-scoped file relay
//!
//! A client uploads one file and receives an invite code. A second client
//! redeems the code once to download the same bytes, after which the
//! session and its stored blob are removed.

pub mod common;
pub mod registry;
pub mod server;
pub mod store;
pub mod sweeper;
pub mod utils;
