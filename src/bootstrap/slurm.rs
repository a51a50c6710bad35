//! Slurm launcher resolution: `SLURM_SRUN_COMM_HOST` present in the environment.

use std::env;

use crate::bootstrap::common::{authkey_decode, str_to_authkey};
use crate::bootstrap::Bootstrap;
use crate::constants::AUTHKEY_LEN;
use crate::error::{Error, Result};

/// Expand Slurm's node-list syntax `base[r1,r2,...]` into individual hostnames, where
/// each `rX` is either a single number or an `M-N` range, both left-padded to the width
/// of the number as written in the range expression.
///
/// ```
/// # use sockmpi::bootstrap::slurm::expand_node_list;
/// assert_eq!(expand_node_list("node[01-03,05]"), vec!["node01", "node02", "node03", "node05"]);
/// assert_eq!(expand_node_list("node01"), vec!["node01"]);
/// ```
pub fn expand_node_list(node_list: &str) -> Vec<String> {
    if let Some(bracket) = node_list.find('[') {
        let base = &node_list[..bracket];
        let inner = &node_list[bracket + 1..];
        let inner = inner.strip_suffix(']').unwrap_or(inner);
        let mut nodes = Vec::new();
        for part in inner.split(',') {
            if let Some((start, end)) = part.split_once('-') {
                let prefix_len = start.len();
                let start: u64 = start.parse().unwrap_or(0);
                let end: u64 = end.parse().unwrap_or(start);
                for i in start..=end {
                    nodes.push(format!("{base}{i:0prefix_len$}"));
                }
            } else {
                nodes.push(format!("{base}{part}"));
            }
        }
        nodes
    } else if node_list.contains(',') {
        node_list.split(',').map(|s| s.to_string()).collect()
    } else {
        vec![node_list.to_string()]
    }
}

fn env_var(name: &'static str) -> Result<String> {
    env::var(name).map_err(|_| Error::InvalidEnv {
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

/// Resolve bootstrap parameters from Slurm's environment.
pub fn resolve() -> Result<Bootstrap> {
    let node_list = env_var("SLURM_STEP_NODELIST")?;
    let host = expand_node_list(&node_list)
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidEnv {
            name: "SLURM_STEP_NODELIST",
            reason: "expanded to zero nodes".to_string(),
        })?;

    let port = if let Ok(resv) = env_var("SLURM_STEP_RESV_PORTS") {
        let first = resv.split('-').next().unwrap_or(&resv);
        first.parse().map_err(|_| Error::InvalidEnv {
            name: "SLURM_STEP_RESV_PORTS",
            reason: format!("could not parse a port from {resv:?}"),
        })?
    } else if let Ok(port) = env_int("SLURM_SRUN_COMM_PORT") {
        port as i32
    } else {
        let job_id = env_int("SLURM_JOB_ID")?;
        60001 + (job_id.rem_euclid(3000)) as i32
    };

    let rank = env_int("SLURM_PROCID")? as usize;
    let size = env_int("SLURM_NTASKS")? as usize;

    let authkey = if let Ok(encoded) = env_var("AME_AUTHKEY") {
        authkey_decode(&encoded)?
    } else {
        let start_time = env_var("SLURM_JOB_START_TIME")?;
        let exe = env::current_exe()
            .ok()
            .and_then(|p| p.to_str().map(|s| s.to_string()))
            .unwrap_or_default();
        let seed = format!("{start_time}{exe}");
        let key = str_to_authkey(&seed);
        debug_assert_eq!(key.len(), AUTHKEY_LEN);
        key
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

    #[test]
    fn expands_range_with_padding() {
        assert_eq!(
            expand_node_list("node[01-03,05]"),
            vec!["node01", "node02", "node03", "node05"]
        );
    }

    #[test]
    fn single_node_passes_through() {
        assert_eq!(expand_node_list("node01"), vec!["node01"]);
    }

    #[test]
    fn comma_list_without_brackets() {
        assert_eq!(expand_node_list("nodeA,nodeB"), vec!["nodeA", "nodeB"]);
    }

    #[test]
    fn mixed_single_and_range() {
        assert_eq!(
            expand_node_list("cn-[0501,0509-0511]"),
            vec!["cn-0501", "cn-0509", "cn-0510", "cn-0511"]
        );
    }
}
