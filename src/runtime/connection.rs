//! Connection table shared by every readiness backend.
//!
//! Slots are `Option`s: an empty slot is `None`, never a sentinel
//! descriptor id. The table owns each client socket from `insert` until
//! `remove`; dropping the value `remove` hands back is the one and only
//! close of that descriptor.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

/// A single accepted client.
#[derive(Debug)]
pub struct Connection {
    /// Socket for the client, closed on drop.
    pub stream: TcpStream,
    /// Remote address, for logging.
    pub peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Returned by [`ConnectionTable::insert`] when every slot is taken.
///
/// Carries the rejected connection back so the caller decides when it is
/// closed.
#[derive(Debug)]
pub struct CapacityExceeded(pub Connection);

/// Registry of live client connections.
///
/// A slot index is stable for the lifetime of the connection. New
/// connections always take the lowest free slot, which is what lets the
/// poll backend map slots directly onto its `pollfd` array.
pub struct ConnectionTable {
    slots: Vec<Option<Connection>>,
    by_fd: HashMap<RawFd, usize>,
    capacity: Option<usize>,
}

impl ConnectionTable {
    /// Create a table. `None` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            slots: Vec::with_capacity(capacity.unwrap_or(0)),
            by_fd: HashMap::new(),
            capacity,
        }
    }

    /// Place a connection in the first free slot.
    pub fn insert(&mut self, conn: Connection) -> Result<usize, CapacityExceeded> {
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                if self.capacity.is_some_and(|cap| self.slots.len() >= cap) {
                    return Err(CapacityExceeded(conn));
                }
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        let previous = self.by_fd.insert(conn.fd(), slot);
        debug_assert!(previous.is_none(), "descriptor already in table");
        self.slots[slot] = Some(conn);
        Ok(slot)
    }

    /// Remove the connection owning `fd`.
    ///
    /// Returns the freed slot and the connection; `None` if `fd` is not a
    /// member, so a second removal is a no-op.
    pub fn remove(&mut self, fd: RawFd) -> Option<(usize, Connection)> {
        let slot = self.by_fd.remove(&fd)?;
        let conn = self.slots[slot].take()?;
        Some((slot, conn))
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Connection> {
        let slot = *self.by_fd.get(&fd)?;
        self.slots[slot].as_mut()
    }

    #[cfg(test)]
    pub fn contains(&self, fd: RawFd) -> bool {
        self.by_fd.contains_key(&fd)
    }

    /// Iterate over live connections in slot order.
    #[cfg(test)]
    pub fn members(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, conn)| conn.as_ref().map(|c| (slot, c)))
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.by_fd.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.by_fd.is_empty()
    }

    /// Maximum number of connections, `None` if unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::TcpListener;

    /// Build an accepted connection over loopback.
    ///
    /// The client half is returned too so the socket stays open.
    pub(crate) fn loopback_connection() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        (Connection::new(stream, peer), client)
    }

    #[test]
    fn test_insert_takes_first_free_slot() {
        let mut table = ConnectionTable::new(None);
        let (c1, _k1) = loopback_connection();
        let (c2, _k2) = loopback_connection();
        let (c3, _k3) = loopback_connection();
        let fd1 = c1.fd();

        assert_eq!(table.insert(c1).unwrap(), 0);
        assert_eq!(table.insert(c2).unwrap(), 1);

        table.remove(fd1).unwrap();
        assert_eq!(table.insert(c3).unwrap(), 0);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut table = ConnectionTable::new(Some(2));
        let (c1, _k1) = loopback_connection();
        let (c2, _k2) = loopback_connection();
        let (c3, _k3) = loopback_connection();
        let fd1 = c1.fd();
        let fd3 = c3.fd();

        table.insert(c1).unwrap();
        table.insert(c2).unwrap();

        let rejected = table.insert(c3).unwrap_err();
        assert_eq!(rejected.0.fd(), fd3);
        assert_eq!(table.len(), 2);

        // Freeing a slot makes room again.
        table.remove(fd1).unwrap();
        assert_eq!(table.insert(rejected.0).unwrap(), 0);
        assert_eq!(table.capacity(), Some(2));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut table = ConnectionTable::new(None);
        let (c1, _k1) = loopback_connection();
        let fd = c1.fd();

        table.insert(c1).unwrap();
        let (slot, conn) = table.remove(fd).unwrap();
        assert_eq!(slot, 0);
        drop(conn);

        assert!(table.remove(fd).is_none());
        assert!(!table.contains(fd));
        assert!(table.is_empty());
    }

    #[test]
    fn test_members_in_slot_order() {
        let mut table = ConnectionTable::new(None);
        let (c1, _k1) = loopback_connection();
        let (c2, _k2) = loopback_connection();
        let (c3, _k3) = loopback_connection();
        let fds = [c1.fd(), c2.fd(), c3.fd()];

        table.insert(c1).unwrap();
        table.insert(c2).unwrap();
        table.insert(c3).unwrap();
        table.remove(fds[1]).unwrap();

        let members: Vec<(usize, RawFd)> = table.members().map(|(s, c)| (s, c.fd())).collect();
        assert_eq!(members, vec![(0, fds[0]), (2, fds[2])]);
        assert!(table.contains(fds[2]));
        assert!(table.get_mut(fds[1]).is_none());
    }
}
