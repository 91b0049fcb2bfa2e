// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configures the VM end of the tunnel through a privileged helper container.

use dockbridge_wgtunnel_common::{TunnelIdentity, VmPeerMaterial};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument};

use crate::engine::{EngineClient, HelperContainerSpec};
use crate::error::BootstrapError;
use crate::readiness::ReadinessMonitor;

pub const CONTAINER_NAME_PREFIX: &str = "dockbridge-setup";

/// Environment contract of the setup image.
pub fn helper_env(material: &VmPeerMaterial) -> Vec<(String, String)> {
	vec![
		("SERVER_PORT".to_string(), material.listen_port.to_string()),
		("HOST_PEER_IP".to_string(), material.host_address.to_string()),
		("VM_PEER_IP".to_string(), material.vm_address.to_string()),
		(
			"HOST_PUBLIC_KEY".to_string(),
			material.host_public_key.to_base64(),
		),
		(
			"VM_PRIVATE_KEY".to_string(),
			material.vm_private_key.expose().clone(),
		),
	]
}

pub fn helper_container_name(now: SystemTime) -> String {
	let secs = now
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or_default();
	format!("{CONTAINER_NAME_PREFIX}-{secs}")
}

pub struct VmBootstrapLauncher {
	engine: Arc<dyn EngineClient>,
	readiness: Arc<ReadinessMonitor>,
	identity: Arc<TunnelIdentity>,
	image: String,
}

impl VmBootstrapLauncher {
	pub fn new(
		engine: Arc<dyn EngineClient>,
		readiness: Arc<ReadinessMonitor>,
		identity: Arc<TunnelIdentity>,
		image: impl Into<String>,
	) -> Self {
		Self {
			engine,
			readiness,
			identity,
			image: image.into(),
		}
	}

	pub fn container_spec(&self, now: SystemTime) -> HelperContainerSpec {
		HelperContainerSpec {
			name: helper_container_name(now),
			image: self.image.clone(),
			env: helper_env(&self.identity.bootstrap_material()),
			network_mode: "host".to_string(),
			cap_add: vec!["NET_ADMIN".to_string()],
			auto_remove: true,
		}
	}

	/// Runs the helper container to completion, relaying its output.
	#[instrument(skip(self), fields(image = %self.image))]
	pub async fn setup_vm(&self) -> Result<(), BootstrapError> {
		self
			.readiness
			.wait_until_ready()
			.await
			.map_err(BootstrapError::NotReady)?;

		let spec = self.container_spec(SystemTime::now());
		let id = self
			.engine
			.create_container(&spec)
			.await
			.map_err(BootstrapError::Create)?;
		debug!(container = %spec.name, id = %id, "created setup container");

		self
			.engine
			.start_container(&id)
			.await
			.map_err(|source| BootstrapError::Start {
				id: id.clone(),
				source,
			})?;

		let mut logs = self.engine.container_logs(&id);
		while let Some(line) = logs.next().await {
			match line {
				Ok(line) => debug!(container = %spec.name, "{line}"),
				Err(source) => {
					return Err(BootstrapError::Logs {
						id: id.clone(),
						source,
					});
				}
			}
		}

		info!(container = %spec.name, "VM peer configured");
		Ok(())
	}
}
