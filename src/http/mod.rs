//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Connection (TCP or Unix domain)
//!     → server.rs (hyper HTTP/1.1 connection driver)
//!     → respond (OPTIONS/GET/HEAD answered, everything else 405)
//!     → Send to client
//! ```

pub mod server;

pub use server::HttpHandler;
