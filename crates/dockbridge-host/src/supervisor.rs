// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Top-level reconciliation loop.
//!
//! Brings the tunnel up, configures the VM peer, then follows network events
//! until the event stream fails (full redo after a short delay) or the
//! cancellation token fires.

use dockbridge_wgtunnel_common::{NetworkRecord, TunnelIdentity};
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::assets::{AssetSource, EmbeddedAssets};
use crate::bootstrap::VmBootstrapLauncher;
use crate::command::{CommandRunner, SystemCommandRunner};
use crate::config::BridgeConfig;
use crate::engine::{DockerEngine, EngineClient, NetworkEvent};
use crate::error::{EngineError, ReadinessError};
use crate::interface::{InterfaceResolver, SystemInterfaceResolver};
use crate::readiness::ReadinessMonitor;
use crate::routes::RouteManager;
use crate::tunnel::TunnelManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
	Idle,
	WaitingReady,
	SettingUp,
	BootstrappingVm,
	Watching,
	Restarting,
	Stopped,
}

impl fmt::Display for SupervisorState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Idle => "idle",
			Self::WaitingReady => "waiting_ready",
			Self::SettingUp => "setting_up",
			Self::BootstrappingVm => "bootstrapping_vm",
			Self::Watching => "watching",
			Self::Restarting => "restarting",
			Self::Stopped => "stopped",
		})
	}
}

/// Why a watch session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
	Stopped,
	StreamFailed,
}

enum Attempt {
	Stop,
	Retry,
}

/// External collaborators, replaceable in tests.
#[derive(Clone)]
pub struct HostDeps {
	pub engine: Arc<dyn EngineClient>,
	pub runner: Arc<dyn CommandRunner>,
	pub resolver: Arc<dyn InterfaceResolver>,
	pub assets: Arc<dyn AssetSource>,
}

impl HostDeps {
	/// The real engine, command runner, interface table and embedded binaries.
	pub fn system() -> Result<Self, EngineError> {
		Ok(Self {
			engine: Arc::new(DockerEngine::connect()?),
			runner: Arc::new(SystemCommandRunner::new()),
			resolver: Arc::new(SystemInterfaceResolver),
			assets: Arc::new(EmbeddedAssets),
		})
	}
}

pub struct Supervisor {
	engine: Arc<dyn EngineClient>,
	readiness: Arc<ReadinessMonitor>,
	tunnel: TunnelManager,
	routes: RouteManager,
	launcher: VmBootstrapLauncher,
	retry_delay: Duration,
	cancel: CancellationToken,
	state_tx: watch::Sender<SupervisorState>,
}

impl Supervisor {
	/// Wires every component for one run. Generates the tunnel identity.
	pub fn new(config: &BridgeConfig, deps: HostDeps, cancel: CancellationToken) -> Self {
		let identity = Arc::new(TunnelIdentity::generate(config.addresses()));
		info!(
			host_public_key = %identity.host_keys().public_key(),
			vm_public_key = %identity.vm_public_key(),
			"generated tunnel identity"
		);

		let readiness = Arc::new(ReadinessMonitor::new(
			deps.engine.clone(),
			config.backoff(),
			cancel.clone(),
		));
		let tunnel = TunnelManager::new(
			config.platform,
			config.tunnel_settings(),
			identity.clone(),
			deps.runner.clone(),
			deps.engine.clone(),
			deps.resolver,
			deps.assets,
			readiness.clone(),
		);
		let routes = RouteManager::new(config.platform, deps.runner);
		let launcher = VmBootstrapLauncher::new(
			deps.engine.clone(),
			readiness.clone(),
			identity,
			config.setup_image.clone(),
		);
		let (state_tx, _) = watch::channel(SupervisorState::Idle);

		Self {
			engine: deps.engine,
			readiness,
			tunnel,
			routes,
			launcher,
			retry_delay: config.retry_delay,
			cancel,
			state_tx,
		}
	}

	pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
		self.state_tx.subscribe()
	}

	pub fn routes(&self) -> &RouteManager {
		&self.routes
	}

	fn set_state(&self, state: SupervisorState) {
		let previous = self.state_tx.send_replace(state);
		if previous != state {
			debug!(from = %previous, to = %state, "supervisor state changed");
		}
	}

	/// Runs until cancelled, then removes the tunnel if it was installed.
	///
	/// Cancellation abandons whichever step is in flight, including an image
	/// pull or a helper container that never exits.
	#[instrument(skip(self))]
	pub async fn run(&mut self) {
		info!("supervisor starting");
		let cancel = self.cancel.clone();

		loop {
			if cancel.is_cancelled() {
				break;
			}

			let attempt = tokio::select! {
				biased;

				_ = cancel.cancelled() => Attempt::Stop,

				attempt = self.attempt() => attempt,
			};

			match attempt {
				Attempt::Stop => break,
				Attempt::Retry => {
					self.set_state(SupervisorState::Restarting);
					info!(delay_ms = self.retry_delay.as_millis() as u64, "retrying tunnel setup");
					tokio::select! {
						biased;

						_ = cancel.cancelled() => break,

						_ = tokio::time::sleep(self.retry_delay) => {}
					}
				}
			}
		}

		self.shutdown().await;
		self.set_state(SupervisorState::Stopped);
		info!("supervisor stopped");
	}

	async fn attempt(&mut self) -> Attempt {
		self.set_state(SupervisorState::WaitingReady);
		match self.readiness.wait_until_ready().await {
			Ok(_) => {}
			Err(ReadinessError::Cancelled) => return Attempt::Stop,
			Err(e) => {
				error!(error = %e, "container engine unavailable");
				return Attempt::Retry;
			}
		}

		self.set_state(SupervisorState::SettingUp);
		let setup = match self.tunnel.setup().await {
			Ok(setup) => setup,
			Err(e) if e.is_cancelled() => return Attempt::Stop,
			Err(e) => {
				error!(step = %e.step(), error = %e, "tunnel setup failed");
				return Attempt::Retry;
			}
		};
		self.routes.bind(setup.binding);

		self.set_state(SupervisorState::BootstrappingVm);
		match self.launcher.setup_vm().await {
			Ok(()) => {}
			Err(e) if e.is_cancelled() => return Attempt::Stop,
			Err(e) => {
				error!(error = %e, "VM bootstrap failed");
				return Attempt::Retry;
			}
		}

		self.set_state(SupervisorState::Watching);
		match self.watch(setup.networks).await {
			WatchOutcome::Stopped => Attempt::Stop,
			WatchOutcome::StreamFailed => Attempt::Retry,
		}
	}

	/// Applies network events to the route table.
	///
	/// `initial` is the snapshot taken during setup. Once the event stream is
	/// open the networks are listed again, so changes made while the VM was
	/// being configured are caught up before events take over.
	pub async fn watch(&mut self, initial: Vec<NetworkRecord>) -> WatchOutcome {
		let engine = Arc::clone(&self.engine);
		let cancel = self.cancel.clone();
		let mut events = engine.network_events();
		self.catch_up(initial).await;
		info!(networks = self.routes.networks().count(), "watching network events");

		loop {
			tokio::select! {
				biased;

				_ = cancel.cancelled() => {
					debug!("network watch cancelled");
					return WatchOutcome::Stopped;
				}

				event = events.next() => match event {
					Some(Ok(NetworkEvent::Created { id, name })) => {
						self.on_network_created(&id, &name).await;
					}
					Some(Ok(NetworkEvent::Destroyed { id, name })) => {
						if self.routes.remove_network(&id).await.is_none() {
							debug!(network_id = %id, network = %name, "ignoring destroy of untracked network");
						}
					}
					Some(Err(e)) => {
						warn!(error = %e, "network event stream failed");
						return WatchOutcome::StreamFailed;
					}
					None => {
						warn!("network event stream ended");
						return WatchOutcome::StreamFailed;
					}
				}
			}
		}
	}

	/// Adopts snapshot networks that still exist and routes networks created
	/// since the snapshot. Networks gone since then are not tracked.
	async fn catch_up(&mut self, initial: Vec<NetworkRecord>) {
		let current = match self.engine.list_networks().await {
			Ok(current) => current,
			Err(e) => {
				warn!(error = %e, "relisting networks failed, adopting setup snapshot");
				self.routes.adopt(initial);
				return;
			}
		};

		let mut snapshot: HashMap<String, NetworkRecord> =
			initial.into_iter().map(|r| (r.id.clone(), r)).collect();
		let mut created = Vec::new();
		for record in current {
			match snapshot.remove(&record.id) {
				Some(known) => self.routes.adopt([known]),
				None => created.push(record),
			}
		}
		for gone in snapshot.values() {
			debug!(network_id = %gone.id, network = %gone.name, "network removed before watch");
		}
		for record in created {
			let (id, name) = (record.id.clone(), record.name.clone());
			if let Err(e) = self.routes.add_network(record).await {
				warn!(network_id = %id, network = %name, error = %e, "routing new network failed");
			}
		}
	}

	async fn on_network_created(&mut self, id: &str, name: &str) {
		let record = match self.engine.inspect_network(id).await {
			Ok(record) => record,
			Err(e) => {
				warn!(network_id = %id, network = %name, error = %e, "inspect of new network failed");
				return;
			}
		};
		if let Err(e) = self.routes.add_network(record).await {
			warn!(network_id = %id, network = %name, error = %e, "routing new network failed");
		}
	}

	async fn shutdown(&mut self) {
		self.routes.unbind();
		if self.tunnel.is_installed() {
			if let Err(e) = self.tunnel.teardown().await {
				error!(error = %e, "tunnel teardown failed");
			}
		}
	}
}
