use std::fs;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hvac_core::mover::{redirect_hook, MoverQueue, RedirectMap};
use hvac_core::HvacServer;

const PID_FILE_PATH: &str = "/tmp/hvac_server.pid";

#[derive(Parser)]
#[command(name = "hvac-server")]
#[command(version, about = "HVAC remote read server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default).
    Start {
        /// Address to bind, e.g. 0.0.0.0:0 for an ephemeral port.
        #[arg(long, default_value = "0.0.0.0:0")]
        bind: String,
    },
    /// Trigger the stats RPC against a running server rank and print the result.
    Stats {
        /// Rank to query.
        #[arg(long, default_value_t = 0)]
        rank: u32,
    },
}

fn main() -> anyhow::Result<()> {
    hvac_config::logging::init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Start {
        bind: "0.0.0.0:0".to_string(),
    }) {
        Commands::Start { bind } => start(&bind),
        Commands::Stats { rank } => print_stats(rank),
    }
}

fn start(bind: &str) -> anyhow::Result<()> {
    let config = hvac_config::Config::from_env()?;
    let rank = config.proc_id.unwrap_or(0);

    write_pid_file()?;

    let redirect_map = RedirectMap::new();
    let hook = redirect_hook(redirect_map.clone());
    // No real data mover is wired up here (it is an out-of-scope
    // collaborator); this just demonstrates the drain contract it
    // publishes into.
    let (mover_queue, _mover_thread) = MoverQueue::spawn(hook, |_path| None);

    let server = Arc::new(HvacServer::bind(bind, redirect_map, mover_queue)?);
    let addr = server.local_addr()?.to_string();
    hvac_config::rendezvous::append_line(&config.job_id, rank, &addr)?;
    tracing::info!(%rank, %addr, "hvac-server listening");

    install_signal_handlers();

    server.serve()?;
    Ok(())
}

fn print_stats(rank: u32) -> anyhow::Result<()> {
    let config = hvac_config::Config::from_env()?;
    let client = hvac_core::HvacClient::new(config);
    let stats = client.request_stats(rank)?;
    println!("rank={rank} status={}; counters printed server-side", stats.status);
    Ok(())
}

fn write_pid_file() -> anyhow::Result<()> {
    let pid = std::process::id();
    fs::write(PID_FILE_PATH, format!("{pid}\n"))?;
    Ok(())
}

extern "C" fn handle_shutdown_signal(_signum: libc::c_int) {
    std::process::exit(0);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_shutdown_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_shutdown_signal as libc::sighandler_t);
    }
}
