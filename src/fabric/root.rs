//! Rank 0's side of the fabric: bind, authenticate every other rank during setup, then
//! multiplex reads across all of them with a single [`mio::Poll`] for the lifetime of
//! the communicator.
//!
//! Setup uses blocking `std::net::TcpStream`s (accepting and authenticating one
//! connection at a time is simplest done synchronously); once every peer is
//! authenticated, each stream is switched to non-blocking and registered with the
//! selector for the operating phase.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpListener as StdTcpListener;
use std::time::{Duration, Instant};

use mio::net::TcpStream as MioTcpStream;
use mio::{Events, Interest, Poll, Token};

use crate::auth::authenticate_server_side;
use crate::constants::{AUTHKEY_LEN, BARRIER_TAG};
use crate::error::{Error, Result};
use crate::fabric::{Dest, Source};
use crate::frame::{Frame, HEADER_SIZE};

/// Incremental parser for one peer's inbound byte stream, carried across poll wakeups
/// since a non-blocking read may return with only part of a frame's header or payload.
enum FrameState {
    Header { buf: [u8; HEADER_SIZE], filled: usize },
    Payload { tag: i32, buf: Vec<u8>, filled: usize },
}

struct PartialFrame {
    state: FrameState,
}

impl PartialFrame {
    fn new() -> PartialFrame {
        PartialFrame {
            state: FrameState::Header {
                buf: [0u8; HEADER_SIZE],
                filled: 0,
            },
        }
    }

    /// Advance as far as currently-available bytes allow. Returns `Ok(Some(frame))`
    /// once a full frame has accumulated, `Ok(None)` if the socket has no more data
    /// ready right now, or `Err` on a genuine I/O failure or peer closure.
    fn poll_read<S: Read>(&mut self, stream: &mut S) -> Result<Option<Frame>> {
        loop {
            match &mut self.state {
                FrameState::Header { buf, filled } => {
                    if *filled == buf.len() {
                        let length = u64::from_le_bytes(buf[0..8].try_into().unwrap());
                        let tag = i32::from_le_bytes(buf[8..12].try_into().unwrap());
                        if tag == BARRIER_TAG {
                            self.state = FrameState::Header {
                                buf: [0u8; HEADER_SIZE],
                                filled: 0,
                            };
                            return Ok(Some(Frame {
                                tag,
                                payload: Vec::new(),
                            }));
                        }
                        self.state = FrameState::Payload {
                            tag,
                            buf: vec![0u8; length as usize],
                            filled: 0,
                        };
                        continue;
                    }
                    match stream.read(&mut buf[*filled..]) {
                        Ok(0) => return Err(Error::SocketClosed { rank: None }),
                        Ok(n) => *filled += n,
                        Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                FrameState::Payload { tag, buf, filled } => {
                    if buf.is_empty() || *filled == buf.len() {
                        let tag = *tag;
                        let payload = std::mem::take(buf);
                        self.state = FrameState::Header {
                            buf: [0u8; HEADER_SIZE],
                            filled: 0,
                        };
                        return Ok(Some(Frame { tag, payload }));
                    }
                    match stream.read(&mut buf[*filled..]) {
                        Ok(0) => return Err(Error::SocketClosed { rank: None }),
                        Ok(n) => *filled += n,
                        Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }
}

struct PeerConn {
    stream: MioTcpStream,
    token: Token,
    inbox: PartialFrame,
}

/// Root's listening hub: one authenticated, registered connection per non-root rank.
pub struct RootFabric {
    poll: Poll,
    events: Events,
    peers: HashMap<usize, PeerConn>,
    tokens: HashMap<Token, usize>,
}

impl RootFabric {
    /// Bind `host:port`, accept and authenticate exactly `world_size - 1` connections,
    /// then hand the socket map over to the selector for the communicator's lifetime.
    pub fn listen(host: &str, port: i32, world_size: usize, authkey: &[u8; AUTHKEY_LEN]) -> Result<RootFabric> {
        let listener = StdTcpListener::bind((host, port as u16))?;
        let rank_is_u16 = world_size >= 200;
        let mut accepted = HashMap::new();

        while accepted.len() < world_size - 1 {
            let (mut stream, addr) = listener.accept()?;
            let rank = if rank_is_u16 {
                let mut buf = [0u8; 2];
                stream.read_exact(&mut buf)?;
                u16::from_le_bytes(buf) as usize
            } else {
                let mut buf = [0u8; 1];
                stream.read_exact(&mut buf)?;
                buf[0] as usize
            };

            match authenticate_server_side(&mut stream, authkey, &addr.to_string()) {
                Ok(()) => {
                    accepted.insert(rank, stream);
                }
                Err(e) => {
                    tracing::warn!(%addr, claimed_rank = rank, error = %e, "rejecting connection");
                }
            }
        }

        let poll = Poll::new()?;
        let mut peers = HashMap::new();
        let mut tokens = HashMap::new();
        for (i, (rank, stream)) in accepted.into_iter().enumerate() {
            stream.set_nonblocking(true)?;
            let mut mio_stream = MioTcpStream::from_std(stream);
            let token = Token(i);
            poll.registry()
                .register(&mut mio_stream, token, Interest::READABLE)?;
            tokens.insert(token, rank);
            peers.insert(
                rank,
                PeerConn {
                    stream: mio_stream,
                    token,
                    inbox: PartialFrame::new(),
                },
            );
        }

        let capacity = (world_size - 1).max(1);
        Ok(RootFabric {
            poll,
            events: Events::with_capacity(capacity),
            peers,
            tokens,
        })
    }

    pub fn send(&mut self, dest: Dest, tag: i32, payload: &[u8]) -> Result<()> {
        let ranks = match dest {
            Dest::One(r) => vec![r],
            Dest::Many(rs) => rs,
        };

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        if tag == BARRIER_TAG {
            frame.extend_from_slice(&0u64.to_le_bytes());
            frame.extend_from_slice(&tag.to_le_bytes());
        } else {
            frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            frame.extend_from_slice(&tag.to_le_bytes());
            frame.extend_from_slice(payload);
        }

        for rank in ranks {
            let peer = self
                .peers
                .get_mut(&rank)
                .ok_or(Error::SocketClosed { rank: Some(rank) })?;
            write_all_nonblocking(&mut self.poll, &mut self.events, &mut peer.stream, peer.token, &frame)?;
        }
        Ok(())
    }

    pub fn recv(&mut self, source: Source, timeout: Option<Duration>) -> Result<(usize, Frame)> {
        let deadline = timeout.map(|budget| Instant::now() + budget);

        match source {
            Source::One(rank) => loop {
                let peer = self
                    .peers
                    .get_mut(&rank)
                    .ok_or(Error::SocketClosed { rank: Some(rank) })?;
                match peer.inbox.poll_read(&mut peer.stream) {
                    Ok(Some(frame)) => return Ok((rank, frame)),
                    Ok(None) => {}
                    Err(e) => {
                        self.peers.remove(&rank);
                        return Err(e);
                    }
                }
                let remaining = remaining_budget(deadline, timeout)?;
                self.poll.poll(&mut self.events, remaining)?;
            },
            Source::Any => loop {
                let remaining = remaining_budget(deadline, timeout)?;
                self.poll.poll(&mut self.events, remaining)?;
                if self.events.is_empty() && deadline.is_some() {
                    return Err(Error::RecvTimeout {
                        after: timeout.unwrap(),
                    });
                }
                let ready: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
                for token in ready {
                    let Some(&rank) = self.tokens.get(&token) else {
                        continue;
                    };
                    let Some(peer) = self.peers.get_mut(&rank) else {
                        continue;
                    };
                    match peer.inbox.poll_read(&mut peer.stream) {
                        Ok(Some(frame)) => return Ok((rank, frame)),
                        Ok(None) => continue,
                        Err(Error::SocketClosed { .. }) => {
                            tracing::debug!(rank, "peer closed, removing from live set");
                            self.peers.remove(&rank);
                            self.tokens.remove(&token);
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            },
        }
    }
}

/// Time left until `deadline`, or `Err(RecvTimeout)` if it has already passed.
/// `original_budget` is carried through only to populate the error.
fn remaining_budget(deadline: Option<Instant>, original_budget: Option<Duration>) -> Result<Option<Duration>> {
    match deadline {
        None => Ok(None),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                Err(Error::RecvTimeout {
                    after: original_budget.unwrap_or_default(),
                })
            } else {
                Ok(Some(deadline - now))
            }
        }
    }
}

fn write_all_nonblocking(
    poll: &mut Poll,
    events: &mut Events,
    stream: &mut MioTcpStream,
    token: Token,
    mut buf: &[u8],
) -> Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(Error::SocketClosed { rank: None }),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                poll.registry()
                    .reregister(stream, token, Interest::READABLE | Interest::WRITABLE)?;
                poll.poll(events, None)?;
                poll.registry().reregister(stream, token, Interest::READABLE)?;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
