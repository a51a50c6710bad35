//! Custom launcher resolution: `AME_RANK` present in the environment.
//!
//! This is the simplest of the four methods: every parameter comes straight from an
//! environment variable, with defaults for everything but the rank itself.

use std::env;

use crate::bootstrap::common::{authkey_decode, str_to_authkey};
use crate::bootstrap::Bootstrap;
use crate::error::{Error, Result};

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable as `T`, falling back to `default` only when the
/// variable is absent. A variable that is set but fails to parse is a misconfiguration,
/// not a default case, and reports `Error::InvalidEnv` naming this resolver.
fn env_parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| Error::InvalidEnv {
            name,
            reason: format!("not a valid value: {raw:?}"),
        }),
    }
}

/// Resolve bootstrap parameters from the `AME_*` family of environment variables.
pub fn resolve() -> Result<Bootstrap> {
    let host = env_or("AME_HOST", "127.0.0.1");
    let port: i32 = env_parsed("AME_PORT", 12345)?;
    let rank: usize = env_parsed("AME_RANK", 0)?;
    let size: usize = env_parsed("AME_SIZE", 1)?;

    let authkey = match env::var("AME_AUTHKEY") {
        Ok(encoded) => authkey_decode(&encoded)?,
        Err(_) => str_to_authkey(&format!("{host}:{port}")),
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
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in ["AME_HOST", "AME_PORT", "AME_RANK", "AME_SIZE", "AME_AUTHKEY"] {
            env::remove_var(var);
        }
        let bootstrap = resolve().unwrap();
        assert_eq!(bootstrap.host, "127.0.0.1");
        assert_eq!(bootstrap.port, 12345);
        assert_eq!(bootstrap.rank, 0);
        assert_eq!(bootstrap.size, 1);
    }

    #[test]
    fn derives_authkey_deterministically_from_host_port() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in ["AME_HOST", "AME_PORT", "AME_RANK", "AME_SIZE", "AME_AUTHKEY"] {
            env::remove_var(var);
        }
        env::set_var("AME_HOST", "node7");
        env::set_var("AME_PORT", "9000");
        let first = resolve().unwrap();
        let second = resolve().unwrap();
        assert_eq!(first.authkey, second.authkey);
        env::remove_var("AME_HOST");
        env::remove_var("AME_PORT");
    }

    #[test]
    fn malformed_value_is_an_error_not_a_silent_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in ["AME_HOST", "AME_PORT", "AME_RANK", "AME_SIZE", "AME_AUTHKEY"] {
            env::remove_var(var);
        }
        env::set_var("AME_RANK", "not-a-number");
        let err = resolve().unwrap_err();
        assert!(matches!(err, Error::InvalidEnv { name: "AME_RANK", .. }));
        env::remove_var("AME_RANK");
    }
}
