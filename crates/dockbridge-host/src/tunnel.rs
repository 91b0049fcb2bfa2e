// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tunnel interface lifecycle: install, address, route cleanup and removal.

use dockbridge_wgtunnel_common::{NetworkRecord, TunnelConfig, TunnelConfigOptions, TunnelIdentity};
use ipnet::IpNet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::assets::{ensure_binaries, AssetSource};
use crate::command::CommandRunner;
use crate::engine::EngineClient;
use crate::error::{CommandError, EngineError, SetupError, TeardownError};
use crate::interface::{InterfaceBinding, InterfaceResolver};
use crate::platform::HostPlatform;
use crate::readiness::ReadinessMonitor;

#[derive(Debug, Clone)]
pub struct TunnelSettings {
	pub interface_name: String,
	/// Holds `bin/` and the rendered `<interface>.conf`.
	pub work_dir: PathBuf,
	pub setup_image: String,
	pub config_options: TunnelConfigOptions,
	/// Pause between installing the tunnel and addressing its interface.
	pub settle_delay: Duration,
}

impl TunnelSettings {
	pub fn bin_dir(&self) -> PathBuf {
		self.work_dir.join("bin")
	}

	pub fn config_path(&self) -> PathBuf {
		self.work_dir.join(format!("{}.conf", self.interface_name))
	}
}

/// Result of a successful [`TunnelManager::setup`].
#[derive(Debug, Clone)]
pub struct TunnelSetup {
	pub binding: InterfaceBinding,
	/// Networks whose subnets went into the tunnel config.
	pub networks: Vec<NetworkRecord>,
}

pub struct TunnelManager {
	platform: HostPlatform,
	settings: TunnelSettings,
	identity: Arc<TunnelIdentity>,
	runner: Arc<dyn CommandRunner>,
	engine: Arc<dyn EngineClient>,
	resolver: Arc<dyn InterfaceResolver>,
	assets: Arc<dyn AssetSource>,
	readiness: Arc<ReadinessMonitor>,
	installed: bool,
}

impl TunnelManager {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		platform: HostPlatform,
		settings: TunnelSettings,
		identity: Arc<TunnelIdentity>,
		runner: Arc<dyn CommandRunner>,
		engine: Arc<dyn EngineClient>,
		resolver: Arc<dyn InterfaceResolver>,
		assets: Arc<dyn AssetSource>,
		readiness: Arc<ReadinessMonitor>,
	) -> Self {
		Self {
			platform,
			settings,
			identity,
			runner,
			engine,
			resolver,
			assets,
			readiness,
			installed: false,
		}
	}

	pub fn is_installed(&self) -> bool {
		self.installed
	}

	pub fn settings(&self) -> &TunnelSettings {
		&self.settings
	}

	#[instrument(skip(self), fields(interface = %self.settings.interface_name))]
	pub async fn setup(&mut self) -> Result<TunnelSetup, SetupError> {
		let bin_dir = self.settings.bin_dir();
		ensure_binaries(&bin_dir, self.platform.bundled_binaries(), self.assets.as_ref())
			.await
			.map_err(SetupError::ExtractBinaries)?;

		self
			.readiness
			.wait_until_ready()
			.await
			.map_err(SetupError::WaitForEngine)?;

		self.ensure_setup_image().await?;

		let networks = self
			.engine
			.list_networks()
			.await
			.map_err(SetupError::ListNetworks)?;
		let (networks, subnets) = config_subnets(networks);
		let config = TunnelConfig::new(&self.identity, subnets, &self.settings.config_options);
		let conf_path = self.settings.config_path();
		write_config(&conf_path, &config).await?;
		debug!(
			path = %conf_path.display(),
			allowed_ips = config.allowed_ips().len(),
			"wrote tunnel config"
		);

		self.install(&bin_dir, &conf_path).await?;
		self.installed = true;

		tokio::time::sleep(self.settings.settle_delay).await;

		let name = self.settings.interface_name.clone();
		let host = self.identity.host_address();
		let peer = self.identity.vm_address();
		self
			.runner
			.run(&self.platform.set_interface_address(&name, host, peer))
			.await
			.map_err(SetupError::ConfigureAddress)?;

		let index = self
			.resolver
			.resolve_index(&name)
			.map_err(SetupError::ResolveInterface)?;
		let binding = InterfaceBinding {
			name,
			index,
			host_address: host,
			peer_address: peer,
		};

		match self
			.runner
			.run(&self.platform.delete_default_route(&binding))
			.await
		{
			Ok(_) => debug!("removed tunnel default route"),
			Err(e) if e.mentions_any(self.platform.route_absent_markers()) => {
				debug!("tunnel default route already absent");
			}
			Err(e) => return Err(SetupError::RemoveDefaultRoute(e)),
		}

		info!(index = binding.index, networks = networks.len(), "tunnel is up");
		Ok(TunnelSetup { binding, networks })
	}

	/// Uninstalls the tunnel. Failures are reported, never retried.
	#[instrument(skip(self), fields(interface = %self.settings.interface_name))]
	pub async fn teardown(&mut self) -> Result<(), TeardownError> {
		self.installed = false;
		let command = self.uninstall_command();
		self
			.runner
			.run(&command)
			.await
			.map_err(|source| TeardownError::Uninstall {
				name: self.settings.interface_name.clone(),
				source,
			})?;
		info!("tunnel removed");
		Ok(())
	}

	pub async fn restart(&mut self) -> Result<TunnelSetup, SetupError> {
		if let Err(e) = self.teardown().await {
			warn!(error = %e, "teardown before restart failed");
		}
		self.setup().await
	}

	async fn ensure_setup_image(&self) -> Result<(), SetupError> {
		let image = &self.settings.setup_image;
		let to_setup_error = |source: EngineError| SetupError::EnsureImage {
			image: image.clone(),
			source,
		};

		if self.engine.image_exists(image).await.map_err(to_setup_error)? {
			debug!(image = %image, "setup image present");
			return Ok(());
		}
		self.engine.pull_image(image).await.map_err(to_setup_error)
	}

	/// Installs the tunnel. A conflict with an existing tunnel of the same
	/// name is resolved by uninstalling it and installing exactly once more.
	async fn install(&self, bin_dir: &Path, conf_path: &Path) -> Result<(), SetupError> {
		let install = self.platform.install_tunnel(bin_dir, conf_path);
		let err = match self.runner.run(&install).await {
			Ok(_) => return Ok(()),
			Err(e) => e,
		};

		if !self.is_install_conflict(&err) {
			return Err(SetupError::InstallTunnel(err));
		}

		warn!(error = %err, "tunnel already installed, reinstalling");
		if let Err(e) = self.runner.run(&self.uninstall_command()).await {
			warn!(error = %e, "uninstall of stale tunnel failed");
		}
		self
			.runner
			.run(&install)
			.await
			.map(|_| ())
			.map_err(SetupError::InstallTunnel)
	}

	fn is_install_conflict(&self, err: &CommandError) -> bool {
		matches!(err, CommandError::Failed { .. }) && err.mentions_any(self.platform.tunnel_conflict_markers())
	}

	fn uninstall_command(&self) -> crate::command::CommandLine {
		self.platform.uninstall_tunnel(
			&self.settings.bin_dir(),
			&self.settings.interface_name,
			&self.settings.config_path(),
		)
	}
}

/// Splits the engine's networks into those usable for the tunnel config and
/// the subnets of the local-scope ones. Networks with malformed subnets are
/// left out.
fn config_subnets(networks: Vec<NetworkRecord>) -> (Vec<NetworkRecord>, Vec<IpNet>) {
	let mut kept = Vec::with_capacity(networks.len());
	let mut subnets = Vec::new();
	for record in networks {
		match record.parsed_subnets() {
			Ok(parsed) => {
				if record.is_routable() {
					subnets.extend(parsed);
				}
				kept.push(record);
			}
			Err(e) => warn!(network_id = %record.id, error = %e, "skipping network with invalid subnet"),
		}
	}
	(kept, subnets)
}

async fn write_config(path: &Path, config: &TunnelConfig) -> Result<(), SetupError> {
	let to_setup_error = |source: std::io::Error| SetupError::WriteConfig {
		path: path.to_path_buf(),
		source,
	};

	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent)
			.await
			.map_err(to_setup_error)?;
	}

	let mut options = tokio::fs::OpenOptions::new();
	options.write(true).create(true).truncate(true);
	#[cfg(unix)]
	options.mode(0o600);

	let mut file = options.open(path).await.map_err(to_setup_error)?;
	file
		.write_all(config.render().expose().as_bytes())
		.await
		.map_err(to_setup_error)?;
	file.flush().await.map_err(to_setup_error)?;

	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
			.await
			.map_err(to_setup_error)?;
	}

	Ok(())
}
