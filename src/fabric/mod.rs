//! Rendezvous and the connection fabric: rank 0 listens and multiplexes, every other
//! rank blocks on a single connection to rank 0.
//!
//! `Communicator` never touches a socket directly; it drives whichever of [`root::RootFabric`]
//! or [`client::ClientFabric`] matches its rank through the shared [`Fabric`] interface below.

pub mod client;
pub mod root;

use std::time::Duration;

use crate::error::Result;
use crate::frame::Frame;

/// Rank-selection for an outbound `send`, matching §4.D: a single rank, or a set of
/// ranks all waiting on the same payload (used by `bcast`).
#[derive(Debug, Clone)]
pub enum Dest {
    /// A single destination rank.
    One(usize),
    /// Every rank in the set, in no particular order.
    Many(Vec<usize>),
}

/// Rank-selection for an inbound `recv`, matching §4.D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Exactly one rank.
    One(usize),
    /// Whichever rank has a frame ready first.
    Any,
}

/// The connection fabric owned by a communicator: either the root's multiplexed hub or
/// a non-root's single blocking link to root.
pub enum Fabric {
    Root(root::RootFabric),
    Client(client::ClientFabric),
}

impl Fabric {
    /// Send `payload` under `tag` to `dest`. Blocks until delivered to every recipient.
    pub fn send(&mut self, dest: Dest, tag: i32, payload: &[u8]) -> Result<()> {
        match self {
            Fabric::Root(root) => root.send(dest, tag, payload),
            Fabric::Client(client) => {
                debug_assert!(matches!(dest, Dest::One(0)), "non-root can only send to rank 0");
                client.send(tag, payload)
            }
        }
    }

    /// Receive one frame matching `source`. Blocks until one arrives, or until
    /// `timeout` elapses (`SOCKMPI_DEBUG` bounded-wait mode), whichever comes first.
    pub fn recv(&mut self, source: Source, timeout: Option<Duration>) -> Result<(usize, Frame)> {
        match self {
            Fabric::Root(root) => root.recv(source, timeout),
            Fabric::Client(client) => {
                debug_assert!(matches!(source, Source::One(0) | Source::Any));
                Ok((0, client.recv(timeout)?))
            }
        }
    }
}
