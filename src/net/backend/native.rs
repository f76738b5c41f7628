//! Native backend: raw sockets tracked in an explicit handle pool.
//!
//! # Ownership
//! ```text
//! NativeBackend ──owns──▶ Arc<NativePool>
//!                              ▲
//! NativeSocket ──PoolSlot──────┘   (each handle keeps the pool alive)
//! ```
//! The pool can only be destroyed once every slot drawn from it has been
//! returned. A handle returns its slot when it is dropped, after its
//! descriptor has been closed.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use socket2::{SockAddr, SockRef, Socket};
use tokio::net::TcpStream;

use super::{
    listen_tcp, shutdown_listener, AcceptGate, Accepted, BackendKind, ListenHandle,
    SocketBackend, SocketOptions,
};
use crate::net::address::{AddressFamily, BindAddress, LocalAddr, PeerAddr};
use crate::net::connection::{Connection, Stream};
use crate::net::error::EndpointError;

#[derive(Debug)]
struct PoolState {
    slots: Vec<bool>,
    live: usize,
    destroyed: bool,
}

/// Fixed-size handle table for native sockets.
#[derive(Debug)]
pub struct NativePool {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl NativePool {
    /// Create a pool able to hold `capacity` live sockets.
    pub fn create(capacity: usize) -> Result<Arc<Self>, EndpointError> {
        if capacity == 0 {
            return Err(EndpointError::Resource(
                "native pool capacity must be at least 1".to_string(),
            ));
        }
        Ok(Arc::new(Self {
            capacity,
            state: Mutex::new(PoolState {
                slots: vec![false; capacity],
                live: 0,
                destroyed: false,
            }),
        }))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently handed out.
    pub fn live(&self) -> usize {
        self.lock().live
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// Draw a slot. Fails when the pool is full or already destroyed.
    pub fn acquire(self: &Arc<Self>) -> Result<PoolSlot, EndpointError> {
        let mut state = self.lock();
        if state.destroyed {
            return Err(EndpointError::Resource("native pool already destroyed".to_string()));
        }
        let index = state
            .slots
            .iter()
            .position(|used| !used)
            .ok_or_else(|| {
                EndpointError::Resource(format!(
                    "native pool exhausted ({} sockets live)",
                    self.capacity
                ))
            })?;
        state.slots[index] = true;
        state.live += 1;
        Ok(PoolSlot {
            pool: Arc::clone(self),
            index,
        })
    }

    /// Destroy the pool. Refuses while slots are still live, since their
    /// sockets would outlive the pool.
    pub fn destroy(&self) -> Result<(), EndpointError> {
        let mut state = self.lock();
        if state.destroyed {
            return Ok(());
        }
        if state.live > 0 {
            return Err(EndpointError::Resource(format!(
                "native pool destroyed with {} sockets still allocated",
                state.live
            )));
        }
        state.destroyed = true;
        Ok(())
    }

    fn release(&self, index: usize) {
        let mut state = self.lock();
        if let Some(used) = state.slots.get_mut(index) {
            if *used {
                *used = false;
                state.live -= 1;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // The state stays consistent across a panic: every update is a
        // single assignment pair.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A slot drawn from a [`NativePool`]; returned to the pool on drop.
#[derive(Debug)]
pub struct PoolSlot {
    pool: Arc<NativePool>,
    index: usize,
}

impl PoolSlot {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

/// Listen handle of the native backend.
#[derive(Debug)]
pub struct NativeSocket {
    socket: Socket,
    local: LocalAddr,
    gate: AcceptGate,
    // Dropped after `socket`: the descriptor is closed before the slot is
    // returned.
    slot: PoolSlot,
}

impl NativeSocket {
    pub fn slot(&self) -> usize {
        self.slot.index()
    }

    fn accept_blocking(&self) -> io::Result<Option<(Socket, SockAddr)>> {
        self.gate.run(|| self.socket.accept())
    }
}

impl ListenHandle for NativeSocket {
    fn local_addr(&self) -> &LocalAddr {
        &self.local
    }

    fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }
}

/// Backend that manages raw descriptors itself.
///
/// Only TCP is available; Unix domain sockets are rejected.
#[derive(Debug)]
pub struct NativeBackend {
    pool: Arc<NativePool>,
}

impl NativeBackend {
    pub fn new(pool_capacity: usize) -> Result<Self, EndpointError> {
        Ok(Self {
            pool: NativePool::create(pool_capacity)?,
        })
    }

    pub fn pool(&self) -> &Arc<NativePool> {
        &self.pool
    }
}

impl SocketBackend for NativeBackend {
    type Handle = NativeSocket;

    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn supports(&self, family: AddressFamily) -> bool {
        family == AddressFamily::Inet
    }

    fn create_listen_socket(
        &self,
        address: &BindAddress,
        options: &SocketOptions,
    ) -> Result<NativeSocket, EndpointError> {
        if address.family() != AddressFamily::Inet {
            return Err(EndpointError::Unsupported {
                backend: BackendKind::Native,
                feature: "unix domain sockets",
            });
        }
        // Slot first: a full pool fails before any descriptor exists, and a
        // failed bind returns the slot when `slot` goes out of scope.
        let slot = self.pool.acquire()?;
        let resolved = address.resolve()?;
        let socket = listen_tcp(address, resolved, options)?;
        let local = socket
            .local_addr()
            .map_err(|e| EndpointError::bind(address, e))?
            .as_socket()
            .ok_or_else(|| {
                EndpointError::bind(
                    address,
                    io::Error::new(io::ErrorKind::InvalidData, "bound address is not inet"),
                )
            })?;
        Ok(NativeSocket {
            socket,
            local: LocalAddr::Inet(local),
            gate: AcceptGate::default(),
            slot,
        })
    }

    fn close_listen_socket(&self, handle: &NativeSocket) {
        if handle.gate.close(&handle.local) {
            shutdown_listener(SockRef::from(&handle.socket));
        }
    }

    async fn accept(&self, handle: &Arc<NativeSocket>) -> io::Result<Accepted> {
        let socket = Arc::clone(handle);
        let accepted = tokio::task::spawn_blocking(move || socket.accept_blocking())
            .await
            .map_err(io::Error::other)??;

        let Some((socket, peer)) = accepted else {
            return Ok(Accepted::Closed);
        };
        let peer: SocketAddr = peer
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "peer is not inet"))?;
        socket.set_nonblocking(true)?;
        let stream = TcpStream::from_std(std::net::TcpStream::from(socket))?;
        Ok(Accepted::Connection(Connection::new(
            Stream::Tcp(stream),
            PeerAddr::Inet(peer),
        )))
    }

    fn destroy(&self) -> Result<(), EndpointError> {
        self.pool.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> BindAddress {
        BindAddress::tcp("127.0.0.1", 0)
    }

    #[test]
    fn zero_capacity_pool_is_a_resource_error() {
        assert!(matches!(
            NativePool::create(0),
            Err(EndpointError::Resource(_))
        ));
    }

    #[test]
    fn exhausted_pool_refuses_new_sockets() {
        let backend = NativeBackend::new(1).unwrap();
        let first = backend
            .create_listen_socket(&loopback(), &SocketOptions::default())
            .unwrap();
        assert_eq!(backend.pool().live(), 1);

        let err = backend
            .create_listen_socket(&loopback(), &SocketOptions::default())
            .unwrap_err();
        assert!(matches!(err, EndpointError::Resource(_)));

        drop(first);
        assert_eq!(backend.pool().live(), 0);
        backend
            .create_listen_socket(&loopback(), &SocketOptions::default())
            .unwrap();
    }

    #[test]
    fn failed_bind_returns_its_slot() {
        let backend = NativeBackend::new(2).unwrap();
        let held = backend
            .create_listen_socket(&loopback(), &SocketOptions::default())
            .unwrap();
        let port = held.local_addr().port().unwrap();

        let err = backend
            .create_listen_socket(&BindAddress::tcp("127.0.0.1", port), &SocketOptions::default())
            .unwrap_err();
        assert!(err.is_address_in_use());
        assert_eq!(backend.pool().live(), 1);
    }

    #[test]
    fn pool_outlives_its_sockets() {
        let backend = NativeBackend::new(4).unwrap();
        let handle = backend
            .create_listen_socket(&loopback(), &SocketOptions::default())
            .unwrap();

        assert!(matches!(backend.destroy(), Err(EndpointError::Resource(_))));
        assert!(!backend.pool().is_destroyed());

        drop(handle);
        backend.destroy().unwrap();
        assert!(backend.pool().is_destroyed());
        assert!(matches!(
            backend.create_listen_socket(&loopback(), &SocketOptions::default()),
            Err(EndpointError::Resource(_))
        ));
    }

    #[test]
    fn rejects_unix_domain_addresses() {
        let backend = NativeBackend::new(1).unwrap();
        assert!(!backend.supports(AddressFamily::Unix));
        let err = backend
            .create_listen_socket(&BindAddress::unix("/tmp/native.sock"), &SocketOptions::default())
            .unwrap_err();
        assert!(matches!(err, EndpointError::Unsupported { .. }));
        assert_eq!(backend.pool().live(), 0);
    }

    #[tokio::test]
    async fn close_unblocks_pending_accept() {
        let backend = Arc::new(NativeBackend::new(1).unwrap());
        let handle = Arc::new(
            backend
                .create_listen_socket(&loopback(), &SocketOptions::default())
                .unwrap(),
        );
        let pending = {
            let backend = Arc::clone(&backend);
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { backend.accept(&handle).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        backend.close_listen_socket(&handle);
        assert!(matches!(pending.await.unwrap().unwrap(), Accepted::Closed));

        drop(handle);
        backend.destroy().unwrap();
    }
}
