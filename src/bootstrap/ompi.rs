//! OpenMPI launcher resolution: `OMPI_COMM_WORLD_RANK` present in the environment.
//!
//! Rank 0 picks a host/port/authkey, writes them to a temp file inside orte's session
//! directory, then renames it into place — `rename(2)` is atomic on the same filesystem,
//! so other ranks never observe a partially written file. Non-root ranks poll for the
//! file to appear, bounded at 6 minutes to match the original's retry budget.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::bootstrap::common::{find_free_port, local_hostname, random_authkey};
use crate::bootstrap::Bootstrap;
use crate::constants::AUTHKEY_LEN;
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_POLLS: u32 = 3600;

fn env_var(name: &'static str) -> Result<String> {
    std::env::var(name).map_err(|_| Error::InvalidEnv {
        name,
        reason: "not set".to_string(),
    })
}

fn env_int(name: &'static str) -> Result<i64> {
    let raw = env_var(name)?;
    raw.parse().map_err(|_| Error::InvalidEnv {
        name,
        reason: format!("not an integer: {raw:?}"),
    })
}

fn rendezvous_paths() -> Result<(PathBuf, PathBuf)> {
    let dir = env_var("OMPI_MCA_orte_top_session_dir")?;
    let dir = PathBuf::from(dir);
    Ok((dir.join("host_and_port.txt_"), dir.join("host_and_port.txt")))
}

/// Resolve bootstrap parameters from OpenMPI's environment, rendezvousing through a
/// shared file in the job's orte session directory.
pub fn resolve() -> Result<Bootstrap> {
    let rank = env_int("OMPI_COMM_WORLD_RANK")? as usize;
    let size = env_int("OMPI_COMM_WORLD_SIZE")? as usize;
    let (tmp_file, file) = rendezvous_paths()?;

    let (host, port, authkey) = if rank == 0 {
        let host = local_hostname()?;
        let port = find_free_port()? as i32;
        let authkey = random_authkey();

        let mut f = File::create(&tmp_file)?;
        write!(f, "{host}:{port}")?;
        f.write_all(b"\n")?;
        f.write_all(&authkey)?;
        drop(f);
        fs::rename(&tmp_file, &file)?;

        (host, port, authkey)
    } else {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match fs::read(&file) {
                Ok(bytes) => {
                    let split = bytes
                        .iter()
                        .position(|&b| b == b'\n')
                        .ok_or_else(|| Error::InvalidEnv {
                            name: "OMPI_MCA_orte_top_session_dir",
                            reason: "rendezvous file missing newline separator".to_string(),
                        })?;
                    let host_port = std::str::from_utf8(&bytes[..split]).map_err(|_| {
                        Error::InvalidEnv {
                            name: "OMPI_MCA_orte_top_session_dir",
                            reason: "rendezvous file host:port is not valid UTF-8".to_string(),
                        }
                    })?;
                    let (host, port) = host_port.split_once(':').ok_or_else(|| Error::InvalidEnv {
                        name: "OMPI_MCA_orte_top_session_dir",
                        reason: format!("malformed host:port {host_port:?}"),
                    })?;
                    let port: i32 = port.parse().map_err(|_| Error::InvalidEnv {
                        name: "OMPI_MCA_orte_top_session_dir",
                        reason: format!("malformed port {port:?}"),
                    })?;
                    let authkey_bytes = &bytes[split + 1..];
                    if authkey_bytes.len() != AUTHKEY_LEN {
                        return Err(Error::InvalidEnv {
                            name: "OMPI_MCA_orte_top_session_dir",
                            reason: format!(
                                "rendezvous authkey is {} bytes, expected {}",
                                authkey_bytes.len(),
                                AUTHKEY_LEN
                            ),
                        });
                    }
                    let mut authkey = [0u8; AUTHKEY_LEN];
                    authkey.copy_from_slice(authkey_bytes);
                    break (host.to_string(), port, authkey);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if attempt > MAX_POLLS {
                        return Err(Error::InvalidEnv {
                            name: "OMPI_MCA_orte_top_session_dir",
                            reason: format!(
                                "rendezvous file {} not found after {} tries",
                                file.display(),
                                attempt
                            ),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    Ok(Bootstrap {
        host,
        port,
        rank,
        size,
        authkey,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn root_writes_and_worker_reads_same_authkey() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("OMPI_MCA_orte_top_session_dir", dir.path());
        std::env::set_var("OMPI_COMM_WORLD_SIZE", "2");

        std::env::set_var("OMPI_COMM_WORLD_RANK", "0");
        let root = resolve().unwrap();

        std::env::set_var("OMPI_COMM_WORLD_RANK", "1");
        let worker = resolve().unwrap();

        assert_eq!(root.host, worker.host);
        assert_eq!(root.port, worker.port);
        assert_eq!(root.authkey, worker.authkey);
        assert_eq!(worker.rank, 1);
        assert_eq!(worker.size, 2);

        std::env::remove_var("OMPI_MCA_orte_top_session_dir");
        std::env::remove_var("OMPI_COMM_WORLD_SIZE");
        std::env::remove_var("OMPI_COMM_WORLD_RANK");
    }
}
