//! Resolving this process's rank, world size, rendezvous address, and shared authkey
//! from whichever launcher started it.
//!
//! Exactly one of five methods applies, checked in order: a custom launcher
//! ([`ame`], identified by `AME_RANK`), MPICH's PMI ([`pmi`], identified by `PMI_RANK`),
//! OpenMPI's orte ([`ompi`], identified by `OMPI_COMM_WORLD_RANK`), Slurm's `srun`
//! ([`slurm`], identified by `SLURM_SRUN_COMM_HOST`), and finally a single-process
//! fallback when none of the above are present.

pub mod ame;
pub mod common;
pub mod ompi;
pub mod pmi;
pub mod slurm;

use std::env;

use crate::constants::AUTHKEY_LEN;
use crate::error::Result;

/// Everything a [`crate::communicator::Communicator`] needs to start talking to its
/// peers, resolved from the environment a launcher set up for this process.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    /// Hostname or address the root listens on.
    pub host: String,
    /// Port the root listens on. `-1` in the degenerate single-process fallback, where
    /// no listener ever opens.
    pub port: i32,
    /// This process's rank.
    pub rank: usize,
    /// Total number of ranks in the world.
    pub size: usize,
    /// Shared secret used by [`crate::auth`] to authenticate new connections.
    pub authkey: [u8; AUTHKEY_LEN],
}

/// Resolve bootstrap parameters from the environment, trying each known launcher in
/// turn. Falls back to a size-1 world when no launcher environment is detected, so a
/// plain `cargo run` of a workload still works.
pub fn resolve() -> Result<Bootstrap> {
    if env::var_os("AME_RANK").is_some() {
        return ame::resolve().map_err(|e| e.into_bootstrap("AME"));
    }
    if env::var_os("PMI_RANK").is_some() {
        return pmi::resolve().map_err(|e| e.into_bootstrap("PMI"));
    }
    if env::var_os("OMPI_COMM_WORLD_RANK").is_some() {
        return ompi::resolve().map_err(|e| e.into_bootstrap("OpenMPI"));
    }
    if env::var_os("SLURM_SRUN_COMM_HOST").is_some() {
        return slurm::resolve().map_err(|e| e.into_bootstrap("Slurm"));
    }

    Ok(fallback())
}

/// The degenerate single-process world: rank 0 of size 1, with no listener and a
/// deterministic authkey derived the same way the original implementation did (it is
/// never used to authenticate anything, since there is no peer to connect to).
fn fallback() -> Bootstrap {
    let host = "localhost".to_string();
    let port = -1;
    let authkey = common::str_to_authkey(&format!("{host}:{port}"));
    Bootstrap {
        host,
        port,
        rank: 0,
        size: 1,
        authkey,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_rank_zero_of_size_one() {
        let bootstrap = fallback();
        assert_eq!(bootstrap.rank, 0);
        assert_eq!(bootstrap.size, 1);
        assert_eq!(bootstrap.port, -1);
    }

    #[test]
    fn fallback_authkey_is_deterministic() {
        assert_eq!(fallback().authkey, fallback().authkey);
    }
}
