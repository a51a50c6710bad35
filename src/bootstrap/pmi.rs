//! PMI (MPICH Process Management Interface) launcher resolution: `PMI_RANK` present in
//! the environment.
//!
//! PMI talks a tiny line-oriented protocol over a UNIX socket handed to us as an
//! inherited file descriptor in `PMI_FD`. Rank 0 publishes `host:port` and the authkey
//! into the shared KVS, then every rank passes through two barriers so no one reads the
//! key before it is written. The original reads a fixed 1024-byte buffer per response;
//! we read up to the newline terminator instead, since nothing in the protocol bounds a
//! KVS value to fit in 1024 bytes.

use std::io::{BufRead, BufReader, Write};
use std::os::fd::FromRawFd;
use std::os::unix::net::UnixStream;

use crate::bootstrap::common::{authkey_decode, authkey_encode, find_free_port, local_hostname, random_authkey};
use crate::bootstrap::Bootstrap;
use crate::error::{Error, Result};

const KVS_NAME: &str = "mykvs";

struct Pmi {
    reader: BufReader<UnixStream>,
}

impl Pmi {
    fn connect() -> Result<Pmi> {
        let fd: i32 = std::env::var("PMI_FD")
            .map_err(|_| Error::InvalidEnv {
                name: "PMI_FD",
                reason: "not set".to_string(),
            })?
            .parse()
            .map_err(|_| Error::InvalidEnv {
                name: "PMI_FD",
                reason: "not an integer file descriptor".to_string(),
            })?;
        // SAFETY: `PMI_FD` is handed to us by the launcher as an already-open, already
        // connected UNIX socket; we take ownership of it for the lifetime of this
        // process, as the original implementation does via `socket.fromfd`.
        let stream = unsafe { UnixStream::from_raw_fd(fd) };
        Ok(Pmi {
            reader: BufReader::new(stream),
        })
    }

    fn exec(&mut self, msg: &str, check_rc: bool) -> Result<(String, Option<i32>)> {
        let mut line = msg.trim_end().to_string();
        line.push('\n');
        self.reader.get_mut().write_all(line.as_bytes())?;

        let mut response = String::new();
        self.reader.read_line(&mut response)?;

        if check_rc {
            let rc = response
                .split("rc=")
                .nth(1)
                .and_then(|tail| tail.split_whitespace().next())
                .and_then(|digits| digits.parse::<i32>().ok())
                .ok_or_else(|| Error::InvalidEnv {
                    name: "PMI_FD",
                    reason: format!("could not parse return code from {response:?}"),
                })?;
            if rc != 0 {
                return Err(Error::InvalidEnv {
                    name: "PMI_FD",
                    reason: format!("PMI command {msg:?} failed with rc={rc}: {response:?}"),
                });
            }
            Ok((response, Some(rc)))
        } else {
            Ok((response, None))
        }
    }

    fn init(&mut self) -> Result<()> {
        let (response, _) = self.exec("cmd=init pmi_version=1 pmi_subversion=1\n", false)?;
        if response != "cmd=response_to_init pmi_version=1 pmi_subversion=1 rc=0\n" {
            return Err(Error::InvalidEnv {
                name: "PMI_FD",
                reason: format!("unexpected init response: {response:?}"),
            });
        }
        Ok(())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        let (response, _) = self.exec(
            &format!("cmd=put kvsname={KVS_NAME} key={key} value={value}"),
            false,
        )?;
        if response != "cmd=put_result rc=0 msg=success\n" {
            return Err(Error::InvalidEnv {
                name: "PMI_FD",
                reason: format!("put {key:?} failed: {response:?}"),
            });
        }
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<String> {
        let (response, _) = self.exec(&format!("cmd=get kvsname={KVS_NAME} key={key}"), false)?;
        response
            .strip_prefix("cmd=get_result rc=0 msg=success value=")
            .map(|v| v.trim_end().to_string())
            .ok_or_else(|| Error::InvalidEnv {
                name: "PMI_FD",
                reason: format!("get {key:?} failed: {response:?}"),
            })
    }

    fn barrier(&mut self) -> Result<()> {
        let (response, _) = self.exec("cmd=barrier_in", false)?;
        if response != "cmd=barrier_out\n" {
            return Err(Error::InvalidEnv {
                name: "PMI_FD",
                reason: format!("barrier failed: {response:?}"),
            });
        }
        Ok(())
    }
}

fn env_int(name: &'static str) -> Result<i64> {
    let raw = std::env::var(name).map_err(|_| Error::InvalidEnv {
        name,
        reason: "not set".to_string(),
    })?;
    raw.parse().map_err(|_| Error::InvalidEnv {
        name,
        reason: format!("not an integer: {raw:?}"),
    })
}

/// Resolve bootstrap parameters by rendezvousing through the PMI key-value store.
pub fn resolve() -> Result<Bootstrap> {
    let rank = env_int("PMI_RANK")? as usize;
    let size = env_int("PMI_SIZE")? as usize;

    let mut pmi = Pmi::connect()?;

    let (host, port, authkey) = if rank == 0 {
        let host = local_hostname()?;
        let port = find_free_port()? as i32;
        let authkey = random_authkey();

        pmi.init()?;
        pmi.put("mykey", &format!("{host}:{port}"))?;
        pmi.put("authkey", &authkey_encode(&authkey))?;
        pmi.barrier()?;
        pmi.barrier()?;

        (host, port, authkey)
    } else {
        pmi.barrier()?;
        let host_port = pmi.get("mykey")?;
        let (host, port) = host_port.split_once(':').ok_or_else(|| Error::InvalidEnv {
            name: "PMI_FD",
            reason: format!("malformed mykey value {host_port:?}"),
        })?;
        let port: i32 = port.parse().map_err(|_| Error::InvalidEnv {
            name: "PMI_FD",
            reason: format!("malformed port {port:?}"),
        })?;
        let authkey = authkey_decode(&pmi.get("authkey")?)?;
        pmi.barrier()?;

        (host.to_string(), port, authkey)
    };

    Ok(Bootstrap {
        host,
        port,
        rank,
        size,
        authkey,
    })
}
