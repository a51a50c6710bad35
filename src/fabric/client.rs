//! Non-root connection to the root: a single blocking `TcpStream`, retried with
//! escalating backoff while root's listener is still coming up.

use std::io::{ErrorKind, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::auth::authenticate_client_side;
use crate::constants::AUTHKEY_LEN;
use crate::error::{Error, Result};
use crate::frame::Frame;

/// `(attempts, delay)` pairs, tried in order, matching §4.D's client retry budget:
/// ten attempts at 10 ms, ten at 100 ms, thirty at 1 s, fifty at 10 s, then give up.
const BACKOFF_SCHEDULE: &[(u32, Duration)] = &[
    (10, Duration::from_millis(10)),
    (10, Duration::from_millis(100)),
    (30, Duration::from_secs(1)),
    (50, Duration::from_secs(10)),
];

/// A non-root's single channel to rank 0.
pub struct ClientFabric {
    stream: TcpStream,
}

impl ClientFabric {
    /// Connect to `host:port`, retrying `ConnectionRefused` on the backoff schedule,
    /// advertise `own_rank`, and run the client half of the auth handshake.
    pub fn connect(
        host: &str,
        port: i32,
        own_rank: usize,
        world_size: usize,
        authkey: &[u8; AUTHKEY_LEN],
    ) -> Result<ClientFabric> {
        let addr = format!("{host}:{port}");
        let mut stream = connect_with_backoff(&addr)?;

        if world_size < 200 {
            stream.write_all(&[own_rank as u8])?;
        } else {
            stream.write_all(&(own_rank as u16).to_le_bytes())?;
        }

        authenticate_client_side(&mut stream, authkey, &addr)?;

        Ok(ClientFabric { stream })
    }

    /// Send a frame to root.
    pub fn send(&mut self, tag: i32, payload: &[u8]) -> Result<()> {
        Frame::send(&mut self.stream, tag, payload)
    }

    /// Receive the next frame from root, optionally bounded by `timeout`
    /// (`SOCKMPI_DEBUG` mode); a timeout expiring mid-read is reported as
    /// [`Error::RecvTimeout`] rather than the underlying `WouldBlock`/`TimedOut` I/O
    /// error.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        self.stream.set_read_timeout(timeout)?;
        let result = Frame::recv(&mut self.stream);
        self.stream.set_read_timeout(None)?;
        match result {
            Err(Error::Io(e))
                if timeout.is_some()
                    && matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Err(Error::RecvTimeout {
                    after: timeout.unwrap(),
                })
            }
            other => other,
        }
    }
}

fn connect_with_backoff(addr: &str) -> Result<TcpStream> {
    for &(attempts, delay) in BACKOFF_SCHEDULE {
        for _ in 0..attempts {
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    let (host, port) = addr.rsplit_once(':').unwrap_or((addr, "0"));
    Err(Error::ConnectRetriesExhausted {
        host: host.to_string(),
        port: port.parse().unwrap_or(-1),
    })
}
