//! `sockmpi-launch`: spawn N copies of a workload, each with the `AME_*` environment
//! variables set so [`sockmpi::Communicator::init`] bootstraps against a freshly
//! generated rendezvous address and authkey.

use std::process::{Command, Stdio};

use clap::Parser;
use sockmpi::bootstrap::common::{authkey_encode, find_free_port, local_hostname, random_authkey};

/// Launch `N` copies of a workload under the custom (`AME_*`) bootstrap.
#[derive(Parser, Debug)]
#[command(name = "sockmpi-launch")]
struct Args {
    /// Number of ranks to launch.
    #[arg(short = 'n', long = "np", default_value_t = 1)]
    size: usize,

    /// Connect the given rank's stdin to the terminal. Every other rank's stdin is
    /// closed, matching the original launcher's `--pty` flag.
    #[arg(long, value_name = "RANK")]
    pty: Option<usize>,

    /// Capture and print each worker's stdout/stderr once it exits, instead of
    /// inheriting the launcher's own.
    #[arg(long)]
    debug: bool,

    /// The workload command and its arguments.
    #[arg(required = true, trailing_var_arg = true)]
    workload: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!(error = %e, "sockmpi-launch failed");
        std::process::exit(1);
    }
}

fn run(args: Args) -> sockmpi::Result<()> {
    let host = local_hostname()?;
    let port = find_free_port()?;
    let authkey = authkey_encode(&random_authkey());

    let (program, rest) = args.workload.split_first().expect("clap enforces non-empty workload");

    let mut children = Vec::with_capacity(args.size);
    for rank in 0..args.size {
        let mut command = Command::new(program);
        command
            .args(rest)
            .env("AME_SIZE", args.size.to_string())
            .env("AME_HOST", &host)
            .env("AME_PORT", port.to_string())
            .env("AME_AUTHKEY", &authkey)
            .env("AME_RANK", rank.to_string());

        if args.debug {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        if args.pty != Some(rank) {
            command.stdin(Stdio::null());
        }

        let child = command.spawn()?;
        children.push(child);
    }

    let mut first_failure: Option<std::process::ExitStatus> = None;
    for (rank, mut child) in children.into_iter().enumerate() {
        let status = if args.debug {
            let output = child.wait_with_output()?;
            tracing::info!(rank, status = ?output.status, "worker finished");
            if !output.stdout.is_empty() {
                tracing::info!(rank, stdout = %String::from_utf8_lossy(&output.stdout));
            }
            if !output.stderr.is_empty() {
                tracing::info!(rank, stderr = %String::from_utf8_lossy(&output.stderr));
            }
            output.status
        } else {
            child.wait()?
        };
        if !status.success() && first_failure.is_none() {
            first_failure = Some(status);
        }
    }

    if let Some(status) = first_failure {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
