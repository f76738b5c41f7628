//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! EndpointSettings (address, options, bind policy)
//!     → endpoint.rs (lifecycle state machine, owns the listen handle)
//!     → backend/ (create_listen_socket, accept, close per backend)
//!     → acceptor.rs (accept loops, one group per running endpoint)
//!     → worker.rs (connection limit, hand-off to the protocol handler)
//!     → connection.rs (accepted stream + peer, active-connection tracking)
//! ```
//!
//! # Design Decisions
//! - Bound state is `Option<handle>`; the handle is never observable after release
//! - Accept loops end on an explicit `Closed` result, not on errors
//! - Backends are chosen once per endpoint and never share state

pub(crate) mod acceptor;
pub mod address;
pub mod backend;
pub mod bind_policy;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod worker;

pub use address::{AddressFamily, BindAddress, LocalAddr, PeerAddr};
pub use backend::{BackendKind, SocketBackend, SocketOptions};
pub use bind_policy::BindPolicy;
pub use connection::{Connection, ConnectionId, Stream};
pub use endpoint::{AnyEndpoint, Endpoint, EndpointSettings};
pub use error::EndpointError;
pub use worker::{ConnectionHandler, Dispatcher};
