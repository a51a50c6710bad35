//! Helpers shared by every bootstrap method: free-port discovery and authkey
//! derivation/encoding.

use std::net::{TcpListener, UdpSocket};

use rand::RngCore;
use sha2::{Digest, Sha512};

use crate::constants::AUTHKEY_LEN;
use crate::error::{Error, Result};

/// Ask the OS for a free TCP port by binding to port 0 and reading it back.
///
/// Uses a throwaway [`TcpListener`] purely to reserve the port number; the listener is
/// dropped immediately afterwards (the caller rebinds when it actually listens). There is
/// an unavoidable race between this dropping and the real bind, which is the same race
/// every "find a free port" helper in this pack accepts (see `get_host_and_port` in the
/// original implementation).
pub fn find_free_port() -> Result<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0))?;
    Ok(listener.local_addr()?.port())
}

/// The local hostname, as used by the root to advertise where it listens.
pub fn local_hostname() -> Result<String> {
    // `gethostname(2)` has no portable stdlib wrapper; resolving a UDP socket to an
    // outward-facing address and reading back the local IP is the common
    // dependency-free substitute and matches what `find_free_port` already does for
    // ports.
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    match socket.local_addr() {
        Ok(addr) if !addr.ip().is_unspecified() => Ok(addr.ip().to_string()),
        _ => Ok("127.0.0.1".to_string()),
    }
}

/// Generate a fresh, cryptographically random 64-byte authkey.
pub fn random_authkey() -> [u8; AUTHKEY_LEN] {
    let mut key = [0u8; AUTHKEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Deterministically derive a 64-byte authkey from an arbitrary string, by taking its
/// SHA-512 digest (which is exactly 64 bytes).
pub fn str_to_authkey(s: &str) -> [u8; AUTHKEY_LEN] {
    let mut hasher = Sha512::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; AUTHKEY_LEN];
    key.copy_from_slice(&digest);
    key
}

/// Decode a base64-encoded authkey (as found in `AME_AUTHKEY`).
pub fn authkey_decode(encoded: &str) -> Result<[u8; AUTHKEY_LEN]> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::InvalidEnv {
            name: "AME_AUTHKEY",
            reason: format!("not valid base64: {e}"),
        })?;
    if bytes.len() != AUTHKEY_LEN {
        return Err(Error::InvalidEnv {
            name: "AME_AUTHKEY",
            reason: format!("decoded to {} bytes, expected {}", bytes.len(), AUTHKEY_LEN),
        });
    }
    let mut key = [0u8; AUTHKEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Base64-encode a 64-byte authkey, for transport through an environment variable or a
/// PMI KVS value.
pub fn authkey_encode(key: &[u8; AUTHKEY_LEN]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    STANDARD.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authkey_round_trip() {
        let key = random_authkey();
        let encoded = authkey_encode(&key);
        let decoded = authkey_decode(&encoded).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn deterministic_authkey_is_stable() {
        let a = str_to_authkey("localhost:-1");
        let b = str_to_authkey("localhost:-1");
        assert_eq!(a, b);
        assert_eq!(a.len(), AUTHKEY_LEN);
    }

    #[test]
    fn free_port_is_reusable() {
        let port = find_free_port().unwrap();
        assert!(port > 0);
    }
}
