//! Multi-hop routing for hoprelay.
//!
//! A [`Chain`] is an ordered list of [`Hop`]s; each hop is a named group of
//! candidate [`Node`]s and a selector. The [`Router`] turns a chain into a
//! connected stream: it picks one node per hop, dials the first node,
//! tunnels to each following node through the previous node's
//! [`Connector`], and finally asks the last node to connect to the
//! destination.
//!
//! ```text
//! client ─▶ node(hop 0) ─▶ node(hop 1) ─▶ … ─▶ destination
//!           Dialer::dial   Connector::connect + Dialer::handshake
//! ```
//!
//! An empty chain dials the destination directly.

pub mod context;
pub mod error;
pub mod node;
pub mod router;
pub mod transport;

pub use context::DialContext;
pub use error::{DialError, RouteError};
pub use node::{BypassTarget, Chain, Hop, Node};
pub use router::{Router, RouterOptions};
pub use transport::{Connector, Dialer, Network};
