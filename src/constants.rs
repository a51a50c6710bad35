//! Reserved sentinel values shared by the whole crate.
//!
//! These mirror the original implementation's module-level integers, kept as an `i32`
//! namespace rather than a Rust `enum` because they share the wire's tag space with
//! arbitrary non-negative user tags.

/// Matches any source rank in a [`crate::communicator::Communicator::recv`] call.
/// Never sent on the wire, only interpreted by the receiver.
pub const ANY_SOURCE: i32 = -2;

/// Matches any tag in a [`crate::communicator::Communicator::recv`] call.
/// Never sent on the wire, only interpreted by the receiver.
pub const ANY_TAG: i32 = -1;

/// Tag used internally by [`crate::communicator::Communicator::bcast`].
pub const BCAST_TAG: i32 = -3;

/// Tag used internally by [`crate::communicator::Communicator::gather`].
pub const GATHER_TAG: i32 = -4;

/// Tag used internally by [`crate::communicator::Communicator::barrier`].
/// Frames with this tag carry a zero-length payload; see [`crate::frame`].
pub const BARRIER_TAG: i32 = -5;

/// Length in bytes of the shared authentication secret.
pub const AUTHKEY_LEN: usize = 64;

/// The rank that hosts the listening socket and the hub of the P2P topology.
pub const ROOT: usize = 0;
