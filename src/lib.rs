#![deny(missing_docs)]
#![warn(missing_copy_implementations)]
#![warn(trivial_casts)]
#![warn(trivial_numeric_casts)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_qualifications)]

//! A socket-backed, MPI-shaped communication layer.
//!
//! This crate implements point-to-point and collective communication
//! (`send`/`recv`/`bcast`/`gather`/`barrier`), a launcher-agnostic bootstrap that
//! discovers rank, size, and a rendezvous address from the process environment, and a
//! pull-based managed dispatcher for distributing an indexable or iterable sequence
//! over a worker pool — all over plain TCP sockets, with no MPI runtime or native
//! library dependency.
//!
//! # Usage
//!
//! ```no_run
//! use sockmpi::Communicator;
//!
//! fn main() -> sockmpi::Result<()> {
//!     let mut comm = Communicator::init()?;
//!     let rank = comm.rank();
//!     let size = comm.size();
//!
//!     if rank == 0 {
//!         comm.send(&"hello from root", 1, 0)?;
//!     } else if rank == 1 {
//!         let msg: String = comm.recv(0, 0, None)?;
//!         println!("rank {rank} of {size} got: {msg}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Bootstrap**: discovers rank/size/rendezvous/authkey from the environment in
//!   priority order across a custom launcher, PMI, OpenMPI's orte, Slurm, and a
//!   size-1 fallback. See [`bootstrap`].
//! - **Connection fabric**: rank 0 multiplexes every other rank's connection over a
//!   single selector; every other rank holds one blocking connection to rank 0. See
//!   [`fabric`].
//! - **Authentication**: a mutual challenge-response handshake over a shared authkey,
//!   run once per connection before any application traffic. See [`auth`].
//! - **Communicator**: the public `send`/`recv`/`bcast`/`gather`/`barrier`/`clone`
//!   surface. See [`communicator`].
//! - **Splitting and dispatch**: round-robin splitting with no communication, and a
//!   managed pull-based dispatcher (`map_unordered`/`split_managed`) for uneven work.
//!   See [`split`] and [`dispatch`].
//! - **Nested result collection**: write-once per-rank maps merged into a tree at
//!   gather time. See [`collection`].
//!
//! Not supported, by design:
//!
//! - Inter-communicators, process topologies, one-sided communication
//! - Non-blocking request objects
//! - Custom reduction operators
//! - Wire compatibility with any particular MPI implementation

pub mod auth;
pub mod bootstrap;
pub mod codec;
pub mod collection;
pub mod communicator;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod fabric;
pub mod frame;
pub mod split;

#[doc(inline)]
pub use communicator::{Communicator, Status};
#[doc(inline)]
pub use constants::{ANY_SOURCE, ANY_TAG, BARRIER_TAG, BCAST_TAG, GATHER_TAG, ROOT};
#[doc(inline)]
pub use error::{Error, Result};
