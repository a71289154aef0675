//! The rendez router core.
//!
//! Accepts transports on a single public endpoint, classifies each one by
//! its first frame (Listen, Dial, or Bridge), and splices dialer/listener
//! transport pairs into end-to-end byte streams. Neither side ever learns
//! the other's address; listeners dial out to the router, so both roles
//! work from behind NAT.

pub mod auth;
pub mod conn;
mod registry;
pub mod router;

pub use auth::{credential_digest, credential_fingerprint, AllowAll, Authority};
pub use conn::{ConnError, RelayConn};
pub use router::{Router, RouterError, RouterOptions};
