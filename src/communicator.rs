//! The public `send`/`recv`/`bcast`/`gather`/`barrier`/`clone` surface.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bootstrap::{self, common, Bootstrap};
use crate::codec::{CborCodec, Codec};
use crate::constants::{ANY_SOURCE, ANY_TAG, AUTHKEY_LEN, BARRIER_TAG, BCAST_TAG, GATHER_TAG, ROOT};
use crate::error::{Error, Result};
use crate::fabric::client::ClientFabric;
use crate::fabric::root::RootFabric;
use crate::fabric::{Dest, Fabric, Source};

/// Per-receive metadata populated by [`Communicator::recv`] when the caller asks for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Status {
    /// The rank the returned frame actually came from.
    pub source: usize,
    /// The tag the returned frame actually carried.
    pub tag: i32,
}

/// A scoped communication handle: a rank, a world size, and — for `size > 1` — a
/// connection to every other rank, reachable directly only from rank 0 (all
/// non-root-to-non-root traffic flows through rank 0; see the module-level contract
/// in [`crate::fabric`]).
pub struct Communicator {
    rank: usize,
    size: usize,
    fabric: Option<Fabric>,
    depth: u32,
    host: String,
    port: i32,
    authkey: [u8; AUTHKEY_LEN],
    debug: bool,
}

impl Communicator {
    /// Run the bootstrap resolver against the process environment and stand up the
    /// fabric for this process's rank. This is the crate's explicit entry point in
    /// place of the implicit process-wide communicator the original built at import
    /// time — callers thread the returned handle through their own code instead of
    /// reaching for ambient global state.
    pub fn init() -> Result<Communicator> {
        let bootstrap = bootstrap::resolve()?;
        tracing::info!(rank = bootstrap.rank, size = bootstrap.size, "bootstrap resolved");
        Communicator::from_bootstrap(bootstrap, 0)
    }

    /// Build a communicator directly from already-known bootstrap parameters, skipping
    /// environment discovery entirely. Useful for embedding (a host process that
    /// already knows its own rendezvous address) and for tests that stand up several
    /// ranks of one world in a single process.
    pub fn connect(bootstrap: Bootstrap) -> Result<Communicator> {
        Communicator::from_bootstrap(bootstrap, 0)
    }

    fn from_bootstrap(bootstrap: Bootstrap, depth: u32) -> Result<Communicator> {
        let Bootstrap {
            host,
            port,
            rank,
            size,
            authkey,
        } = bootstrap;

        let fabric = if size == 1 {
            None
        } else if rank == ROOT {
            Some(Fabric::Root(RootFabric::listen(&host, port, size, &authkey)?))
        } else {
            Some(Fabric::Client(ClientFabric::connect(&host, port, rank, size, &authkey)?))
        };

        let debug = std::env::var_os("SOCKMPI_DEBUG").is_some();
        if debug {
            tracing::debug!(rank, size, depth, "SOCKMPI_DEBUG enabled: recv calls are now bounded");
        }

        Ok(Communicator {
            rank,
            size,
            fabric,
            depth,
            host,
            port,
            authkey,
            debug,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Bounded-wait budget for debug mode: scales with how many ranks are still ahead
    /// of us in rank order, so root (which waits on everyone) gets the longest budget.
    fn debug_budget(&self) -> Option<Duration> {
        if !self.debug {
            return None;
        }
        let distance = (self.size - self.rank).max(1) as u64;
        Some(Duration::from_secs(5 * distance))
    }

    /// Send `obj` to `dest` under `tag`. `tag` must be non-negative; the reserved
    /// negative tags are for internal collective use only.
    pub fn send<T: Serialize>(&mut self, obj: &T, dest: usize, tag: i32) -> Result<()> {
        debug_assert!(tag >= 0, "user tags must be non-negative");
        let payload = CborCodec.encode(obj)?;
        match self.fabric.as_mut() {
            Some(fabric) => fabric.send(Dest::One(dest), tag, &payload),
            None => Ok(()),
        }
    }

    /// Block until a frame matching `source` (a rank, or [`ANY_SOURCE`]) and `tag` (a
    /// tag, or [`ANY_TAG`]) arrives, then decode and return its payload.
    pub fn recv<T: DeserializeOwned>(&mut self, source: i32, tag: i32, status: Option<&mut Status>) -> Result<T> {
        let src = if source == ANY_SOURCE {
            Source::Any
        } else {
            Source::One(source as usize)
        };
        let budget = self.debug_budget();
        let fabric = self.fabric.as_mut().ok_or(Error::SocketClosed { rank: None })?;
        let (from_rank, frame) = fabric.recv(src, budget)?;
        if tag != ANY_TAG && frame.tag != tag {
            return Err(Error::TagMismatch {
                expected: tag,
                actual: frame.tag,
            });
        }
        if let Some(status) = status {
            status.source = from_rank;
            status.tag = frame.tag;
        }
        CborCodec.decode(&frame.payload)
    }

    /// Receive the next frame matching `source` without decoding its payload, returning
    /// it alongside a [`Status`]. Used by callers (the managed dispatcher) whose
    /// decode target depends on which tag actually arrived, which rules out the
    /// single-type-per-call [`Communicator::recv`].
    pub fn recv_raw(&mut self, source: i32) -> Result<(Status, Vec<u8>)> {
        let src = if source == ANY_SOURCE {
            Source::Any
        } else {
            Source::One(source as usize)
        };
        let budget = self.debug_budget();
        let fabric = self.fabric.as_mut().ok_or(Error::SocketClosed { rank: None })?;
        let (from_rank, frame) = fabric.recv(src, budget)?;
        Ok((
            Status {
                source: from_rank,
                tag: frame.tag,
            },
            frame.payload,
        ))
    }

    /// Broadcast `obj` from `root` to every rank. On root, returns `obj` unchanged; on
    /// every other rank, `obj` is a placeholder (conventionally a default/empty value
    /// of the same type) that is discarded in favour of whatever root sent.
    pub fn bcast<T: Serialize + DeserializeOwned>(&mut self, obj: T, root: usize) -> Result<T> {
        debug_assert_eq!(root, ROOT, "bcast root must be 0");
        if self.size == 1 {
            return Ok(obj);
        }
        if self.rank == ROOT {
            let payload = CborCodec.encode(&obj)?;
            let others: Vec<usize> = (0..self.size).filter(|&r| r != ROOT).collect();
            self.fabric_mut()?.send(Dest::Many(others), BCAST_TAG, &payload)?;
            Ok(obj)
        } else {
            let budget = self.debug_budget();
            let (_, frame) = self.fabric_mut()?.recv(Source::One(ROOT), budget)?;
            if frame.tag != BCAST_TAG {
                return Err(Error::TagMismatch {
                    expected: BCAST_TAG,
                    actual: frame.tag,
                });
            }
            CborCodec.decode(&frame.payload)
        }
    }

    /// Gather one value per rank at root, in strict rank order. Returns `Some(values)`
    /// on root (length `size`, `values[0]` is root's own `obj`) and `None` elsewhere.
    pub fn gather<T: Serialize + DeserializeOwned>(&mut self, obj: T, root: usize) -> Result<Option<Vec<T>>> {
        debug_assert_eq!(root, ROOT, "gather root must be 0");
        if self.size == 1 {
            return Ok(Some(vec![obj]));
        }
        if self.rank == ROOT {
            let mut results: Vec<Option<T>> = (0..self.size).map(|_| None).collect();
            results[ROOT] = Some(obj);
            for peer in 1..self.size {
                let budget = self.debug_budget();
                let (from_rank, frame) = self.fabric_mut()?.recv(Source::One(peer), budget)?;
                if frame.tag != GATHER_TAG {
                    return Err(Error::TagMismatch {
                        expected: GATHER_TAG,
                        actual: frame.tag,
                    });
                }
                results[from_rank] = Some(CborCodec.decode(&frame.payload)?);
            }
            Ok(Some(
                results
                    .into_iter()
                    .map(|r| r.expect("every rank's slot was filled above"))
                    .collect(),
            ))
        } else {
            let payload = CborCodec.encode(&obj)?;
            self.fabric_mut()?.send(Dest::One(ROOT), GATHER_TAG, &payload)?;
            Ok(None)
        }
    }

    /// `bcast(_, tag=BARRIER_TAG)` followed by `gather(_, tag=BARRIER_TAG)`: `2*(size-1)`
    /// header-only frames, none carrying a payload.
    pub fn barrier(&mut self) -> Result<()> {
        if self.size == 1 {
            return Ok(());
        }
        self.tagged_bcast_unit(BARRIER_TAG)?;
        self.tagged_gather_unit(BARRIER_TAG)
    }

    fn tagged_bcast_unit(&mut self, tag: i32) -> Result<()> {
        if self.rank == ROOT {
            let others: Vec<usize> = (0..self.size).filter(|&r| r != ROOT).collect();
            self.fabric_mut()?.send(Dest::Many(others), tag, &[])
        } else {
            let budget = self.debug_budget();
            let (_, frame) = self.fabric_mut()?.recv(Source::One(ROOT), budget)?;
            if frame.tag != tag {
                return Err(Error::TagMismatch {
                    expected: tag,
                    actual: frame.tag,
                });
            }
            Ok(())
        }
    }

    fn tagged_gather_unit(&mut self, tag: i32) -> Result<()> {
        if self.rank == ROOT {
            for peer in 1..self.size {
                let budget = self.debug_budget();
                let (_, frame) = self.fabric_mut()?.recv(Source::One(peer), budget)?;
                if frame.tag != tag {
                    return Err(Error::TagMismatch {
                        expected: tag,
                        actual: frame.tag,
                    });
                }
            }
            Ok(())
        } else {
            self.fabric_mut()?.send(Dest::One(ROOT), tag, &[])
        }
    }

    /// Produce a new, independent communicator at `depth + 1`, reachable on a fresh
    /// port with a fresh authkey. Root picks both and broadcasts them; every rank then
    /// runs a full fabric setup against the new address, and the trailing
    /// `gather(BARRIER_TAG)` makes `clone` itself act as a barrier, so the parent
    /// communicator's traffic can never be mistaken for the child's.
    ///
    /// Named `clone` to match the operation this crate is modeling; it intentionally
    /// does not implement `std::clone::Clone`, since producing a copy here means
    /// standing up a brand new TCP fabric, not duplicating a value.
    #[allow(clippy::should_implement_trait)]
    pub fn clone(&mut self) -> Result<Communicator> {
        if self.size == 1 {
            return Communicator::from_bootstrap(
                Bootstrap {
                    host: self.host.clone(),
                    port: self.port,
                    rank: self.rank,
                    size: self.size,
                    authkey: self.authkey,
                },
                self.depth + 1,
            );
        }

        let (new_port, new_authkey) = if self.rank == ROOT {
            (common::find_free_port()? as i32, common::random_authkey())
        } else {
            (0, [0u8; AUTHKEY_LEN])
        };

        let port = self.bcast(new_port, ROOT)?;
        let authkey_vec = self.bcast(new_authkey.to_vec(), ROOT)?;
        let mut authkey = [0u8; AUTHKEY_LEN];
        authkey.copy_from_slice(&authkey_vec);

        let bootstrap = Bootstrap {
            host: self.host.clone(),
            port,
            rank: self.rank,
            size: self.size,
            authkey,
        };
        let child = Communicator::from_bootstrap(bootstrap, self.depth + 1)?;
        self.tagged_gather_unit(BARRIER_TAG)?;
        Ok(child)
    }

    fn fabric_mut(&mut self) -> Result<&mut Fabric> {
        self.fabric.as_mut().ok_or(Error::SocketClosed { rank: None })
    }
}
