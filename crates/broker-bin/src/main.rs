//! cellbroker daemon binary.
//!
//! Runs as a background process and manages:
//! - per-notebook interpreter kernel subprocesses
//! - the durable execution journal and asset leases
//! - IPC communication with editor clients

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cellbroker::Config;

/// cellbroker daemon command line arguments.
#[derive(Parser, Debug)]
#[command(name = "cellbroker")]
#[command(about = "Durable execution broker for notebook kernels")]
struct Args {
	/// Unix socket path for IPC.
	#[arg(short, long, value_name = "PATH")]
	socket: Option<PathBuf>,

	/// Directory for the journal and offloaded assets.
	#[arg(short, long, value_name = "PATH")]
	data_dir: Option<PathBuf>,

	/// Verbose logging.
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	info!("starting cellbroker");

	let mut cfg = Config::from_env();
	if let Some(data_dir) = args.data_dir {
		cfg.data_dir = data_dir;
	}

	let socket_path = args.socket.unwrap_or_else(cellbroker_proto::paths::default_socket_path);
	if let Some(parent) = socket_path.parent()
		&& !parent.exists()
	{
		std::fs::create_dir_all(parent)?;
	}

	info!(socket = %socket_path.display(), data_dir = %cfg.data_dir.display(), "resolved configuration");

	let broker = cellbroker::Broker::new(cfg)?;
	broker.restore().await;

	let shutdown = CancellationToken::new();
	tokio::spawn(wait_for_shutdown_signal(shutdown.clone()));

	info!("starting IPC server");
	let result = cellbroker::transport::serve(&socket_path, broker.clone(), shutdown).await;

	info!("tearing down");
	broker.shutdown().await;

	Ok(result?)
}

async fn wait_for_shutdown_signal(shutdown: CancellationToken) {
	let ctrl_c = tokio::signal::ctrl_c();

	#[cfg(unix)]
	{
		let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler");
		tokio::select! {
			_ = ctrl_c => {}
			_ = terminate.recv() => {}
		}
	}
	#[cfg(not(unix))]
	{
		let _ = ctrl_c.await;
	}

	info!("shutdown signal received");
	shutdown.cancel();
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::prelude::*;

	if let Some(log_dir) = std::env::var("CELLBROKER_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let pid = std::process::id();
		let log_path = log_dir.join(format!("cellbroker.{pid}.log"));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("cellbroker=trace,debug")
				} else {
					EnvFilter::new("cellbroker=debug,info")
				}
			});

			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);

			tracing_subscriber::registry().with(filter).with(file_layer).init();

			tracing::info!(path = ?log_path, "cellbroker tracing initialized");
			return;
		}
	}

	tracing_subscriber::fmt()
		.with_max_level(if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
		.init();
}
