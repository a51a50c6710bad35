//! Mutual challenge-response authentication (protocol version 3).
//!
//! Immediately after TCP connect, both sides generate a 16-byte random challenge, send
//! it to the peer, and receive the peer's challenge. Each side computes
//! `SHA-256(peer_challenge || authkey)`, sends that response, and verifies the peer's
//! response against its own expected digest using a constant-time comparison. Earlier
//! handshake versions (plaintext authkey, one-way challenge) are not implemented: this
//! crate has no legacy peer to interoperate with, so there is no reason to carry their
//! weaker guarantees forward.

use std::io::{Read, Write};

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

const CHALLENGE_LEN: usize = 16;
const RESPONSE_LEN: usize = 32;

fn random_challenge() -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

fn response_for(challenge: &[u8], authkey: &[u8]) -> [u8; RESPONSE_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(authkey);
    hasher.finalize().into()
}

fn read_exact_bytes<R: Read, const N: usize>(stream: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}

/// Run one half of the mutual handshake: send our challenge and respond to the peer's,
/// then verify the peer's response against ours. `peer_label` is used only for the
/// error message and log line on failure.
fn handshake_half<S: Read + Write>(stream: &mut S, authkey: &[u8], peer_label: &str) -> Result<()> {
    let my_challenge = random_challenge();
    stream.write_all(&my_challenge)?;

    let peer_challenge: [u8; CHALLENGE_LEN] = read_exact_bytes(stream)?;
    let my_response = response_for(&peer_challenge, authkey);
    stream.write_all(&my_response)?;

    let peer_response: [u8; RESPONSE_LEN] = read_exact_bytes(stream)?;
    let expected = response_for(&my_challenge, authkey);

    if peer_response.ct_eq(&expected).unwrap_u8() == 1 {
        Ok(())
    } else {
        tracing::warn!(peer = peer_label, "authentication response mismatch");
        Err(Error::AuthFailure {
            peer: peer_label.to_string(),
        })
    }
}

/// Server-side (rank 0) half of the handshake, run against a freshly accepted,
/// not-yet-trusted connection.
pub fn authenticate_server_side<S: Read + Write>(
    stream: &mut S,
    authkey: &[u8],
    peer_label: &str,
) -> Result<()> {
    handshake_half(stream, authkey, peer_label)
}

/// Client-side (non-root) half of the handshake, run immediately after connecting.
pub fn authenticate_client_side<S: Read + Write>(
    stream: &mut S,
    authkey: &[u8],
    peer_label: &str,
) -> Result<()> {
    handshake_half(stream, authkey, peer_label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::thread;

    #[test]
    fn matching_keys_accept() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let key = vec![7u8; 64];
        let key_b = key.clone();
        let t = thread::spawn(move || authenticate_server_side(&mut b, &key_b, "peer-b"));
        authenticate_client_side(&mut a, &key, "peer-a").unwrap();
        t.join().unwrap().unwrap();
    }

    #[test]
    fn mismatched_keys_reject() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let key_a = vec![1u8; 64];
        let key_b = vec![2u8; 64];
        let t = thread::spawn(move || authenticate_server_side(&mut b, &key_b, "peer-b"));
        let client_result = authenticate_client_side(&mut a, &key_a, "peer-a");
        let server_result = t.join().unwrap();
        assert!(client_result.is_err() || server_result.is_err());
    }

    #[test]
    fn one_byte_altered_key_rejects() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let mut key_a = vec![9u8; 64];
        let key_b = key_a.clone();
        key_a[0] ^= 0x01;
        let t = thread::spawn(move || authenticate_server_side(&mut b, &key_b, "peer-b"));
        let client_result = authenticate_client_side(&mut a, &key_a, "peer-a");
        let server_result = t.join().unwrap();
        assert!(client_result.is_err() || server_result.is_err());
    }
}
