//! Upload coordination: chunked sessions, streamed relays and signed grants.

pub mod block_id;
pub mod checksum;
pub mod content_type;
pub mod grant;
pub mod naming;
pub mod session;
pub mod splitter;
