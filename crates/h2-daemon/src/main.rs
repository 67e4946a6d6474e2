use std::collections::HashMap;

use h2_daemon::supervisor::{LaunchSpec, run_agent_daemon};
use h2_paths::H2Paths;
use tracing_subscriber::EnvFilter;

/// Entry point for one agent daemon process. The CLI surface that launches
/// this binary (role/profile resolution, git worktree setup, bridges) lives
/// outside this crate; this binary only expects the already-resolved
/// launch parameters below.
///
/// Usage: `h2-daemon <agent-name> <command> [-- <command-args>...]`
/// Env: `H2_DIR`, `H2_CWD`, `H2_HARNESS`, `H2_ROLE`.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(agent_name) = args.next() else {
        eprintln!("usage: h2-daemon <agent-name> <command> [-- <command-args>...]");
        std::process::exit(64);
    };
    let Some(command) = args.next() else {
        eprintln!("usage: h2-daemon <agent-name> <command> [-- <command-args>...]");
        std::process::exit(64);
    };
    let command_args: Vec<String> = args.skip_while(|a| a != "--").skip(1).collect();

    let paths = match H2Paths::from_env() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(event = "daemon.startup.paths_failed", error = %e);
            std::process::exit(64);
        }
    };

    let cwd = std::env::var("H2_CWD").unwrap_or_else(|_| ".".to_string());
    let harness = std::env::var("H2_HARNESS").unwrap_or_else(|_| "generic".to_string());
    let role = std::env::var("H2_ROLE").ok();

    let spec = LaunchSpec {
        agent_name,
        command,
        args: command_args,
        cwd,
        harness,
        role,
        extra_env: HashMap::new(),
    };

    let exit_code = run_agent_daemon(paths, spec).await;
    std::process::exit(exit_code);
}
