// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dockbridge_host::config::parse_dns;
use dockbridge_host::{BridgeConfig, HostDeps, HostPlatform, Supervisor};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
	Text,
	Json,
}

/// Routes host traffic to container networks through a WireGuard tunnel into
/// the container engine's VM.
///
/// Every option can also be set with its `DOCKBRIDGE_*` environment variable.
#[derive(Parser, Debug)]
#[command(name = "dockbridge", version)]
struct Args {
	/// Log output format
	#[arg(long, env = "DOCKBRIDGE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
	log_format: LogFormat,

	/// Tunnel interface name
	#[arg(long)]
	interface: Option<String>,

	/// Host end of the tunnel
	#[arg(long)]
	host_address: Option<Ipv4Addr>,

	/// VM end of the tunnel
	#[arg(long)]
	vm_address: Option<Ipv4Addr>,

	/// WireGuard listen port
	#[arg(long)]
	listen_port: Option<u16>,

	/// Image that configures the VM peer
	#[arg(long)]
	setup_image: Option<String>,

	/// Comma-separated DNS servers for the tunnel, or `none`
	#[arg(long)]
	dns: Option<String>,

	/// Directory for bundled binaries and the tunnel config
	#[arg(long)]
	work_dir: Option<PathBuf>,

	/// Command set to use (windows or linux)
	#[arg(long)]
	platform: Option<String>,
}

impl Args {
	/// Applies command line values over the environment-derived config.
	fn apply(&self, mut config: BridgeConfig) -> Result<BridgeConfig> {
		if let Some(interface) = &self.interface {
			config.interface_name = interface.clone();
		}
		if let Some(host) = self.host_address {
			config.host_address = host;
		}
		if let Some(vm) = self.vm_address {
			config.vm_address = vm;
		}
		if let Some(port) = self.listen_port {
			config.listen_port = port;
		}
		if let Some(image) = &self.setup_image {
			config.setup_image = image.clone();
		}
		if let Some(dns) = &self.dns {
			config.dns = parse_dns(dns).map_err(|e| anyhow::anyhow!("invalid --dns: {e}"))?;
		}
		if let Some(dir) = &self.work_dir {
			config.work_dir = dir.clone();
		}
		if let Some(platform) = &self.platform {
			config.platform = HostPlatform::parse(platform)
				.with_context(|| format!("invalid --platform {platform}: expected windows or linux"))?;
		}
		config.validate()?;
		Ok(config)
	}
}

fn init_tracing(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			warn!(error = %e, "failed to listen for ctrl-c");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut sigterm) => {
				sigterm.recv().await;
			}
			Err(e) => {
				warn!(error = %e, "failed to listen for SIGTERM");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {}
		_ = terminate => {}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	init_tracing(args.log_format);

	let config = args.apply(BridgeConfig::from_env()?)?;
	info!(
		platform = ?config.platform,
		interface = %config.interface_name,
		host_address = %config.host_address,
		vm_address = %config.vm_address,
		listen_port = config.listen_port,
		work_dir = %config.work_dir.display(),
		"loaded configuration"
	);

	let deps = HostDeps::system().context("failed to create container engine client")?;
	let cancel = CancellationToken::new();
	let mut supervisor = Supervisor::new(&config, deps, cancel.clone());

	let signal_cancel = cancel.clone();
	tokio::spawn(async move {
		shutdown_signal().await;
		info!("received shutdown signal");
		signal_cancel.cancel();
	});

	supervisor.run().await;
	info!("dockbridge stopped");
	Ok(())
}
