// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Thin adapter over the container engine's control API.

use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, EventMessage, EventMessageTypeEnum, HostConfig, Network};
use bollard::query_parameters::{
	CreateContainerOptionsBuilder, CreateImageOptionsBuilder, EventsOptionsBuilder,
	InspectNetworkOptions, ListNetworksOptions, LogsOptionsBuilder, StartContainerOptions,
};
use bollard::Docker;
use dockbridge_wgtunnel_common::{NetworkRecord, NetworkScope};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, instrument};

use crate::error::EngineError;

/// Network lifecycle event from the engine's filtered event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
	Created { id: String, name: String },
	Destroyed { id: String, name: String },
}

impl NetworkEvent {
	pub fn id(&self) -> &str {
		match self {
			Self::Created { id, .. } | Self::Destroyed { id, .. } => id,
		}
	}
}

/// Privileged, self-removing helper container.
#[derive(Clone)]
pub struct HelperContainerSpec {
	pub name: String,
	pub image: String,
	pub env: Vec<(String, String)>,
	pub network_mode: String,
	pub cap_add: Vec<String>,
	pub auto_remove: bool,
}

impl HelperContainerSpec {
	pub fn env_value(&self, key: &str) -> Option<&str> {
		self
			.env
			.iter()
			.find(|(k, _)| k == key)
			.map(|(_, v)| v.as_str())
	}
}

impl fmt::Debug for HelperContainerSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
		f.debug_struct("HelperContainerSpec")
			.field("name", &self.name)
			.field("image", &self.image)
			.field("env_keys", &env_keys)
			.field("network_mode", &self.network_mode)
			.field("cap_add", &self.cap_add)
			.field("auto_remove", &self.auto_remove)
			.finish()
	}
}

#[async_trait]
pub trait EngineClient: Send + Sync {
	/// Lightweight liveness probe.
	async fn ping(&self) -> Result<(), EngineError>;

	async fn list_networks(&self) -> Result<Vec<NetworkRecord>, EngineError>;

	async fn inspect_network(&self, id: &str) -> Result<NetworkRecord, EngineError>;

	async fn image_exists(&self, image: &str) -> Result<bool, EngineError>;

	async fn pull_image(&self, image: &str) -> Result<(), EngineError>;

	/// Creates the container and returns its id.
	async fn create_container(&self, spec: &HelperContainerSpec) -> Result<String, EngineError>;

	async fn start_container(&self, id: &str) -> Result<(), EngineError>;

	/// Follows the combined stdout/stderr of a container until it exits.
	fn container_logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<String, EngineError>>;

	/// Network `create` and `destroy` events, in engine order.
	fn network_events(&self) -> BoxStream<'_, Result<NetworkEvent, EngineError>>;
}

/// [`EngineClient`] over the Docker API.
#[derive(Clone)]
pub struct DockerEngine {
	docker: Docker,
}

impl DockerEngine {
	/// Connects with the platform defaults (unix socket or named pipe, or `DOCKER_HOST`).
	pub fn connect() -> Result<Self, EngineError> {
		let docker =
			Docker::connect_with_local_defaults().map_err(|e| EngineError::Connect(e.to_string()))?;
		Ok(Self { docker })
	}
}

impl fmt::Debug for DockerEngine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DockerEngine").finish_non_exhaustive()
	}
}

#[async_trait]
impl EngineClient for DockerEngine {
	async fn ping(&self) -> Result<(), EngineError> {
		self
			.docker
			.info()
			.await
			.map(|_| ())
			.map_err(|e| EngineError::request("info", e))
	}

	async fn list_networks(&self) -> Result<Vec<NetworkRecord>, EngineError> {
		let networks = self
			.docker
			.list_networks(None::<ListNetworksOptions>)
			.await
			.map_err(|e| EngineError::request("list_networks", e))?;

		networks
			.into_iter()
			.map(|n| record_from_network("list_networks", n))
			.collect()
	}

	async fn inspect_network(&self, id: &str) -> Result<NetworkRecord, EngineError> {
		let network = self
			.docker
			.inspect_network(id, None::<InspectNetworkOptions>)
			.await
			.map_err(|e| EngineError::request("inspect_network", e))?;
		record_from_network("inspect_network", network)
	}

	async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
		match self.docker.inspect_image(image).await {
			Ok(_) => Ok(true),
			Err(BollardError::DockerResponseServerError {
				status_code: 404, ..
			}) => Ok(false),
			Err(e) => Err(EngineError::request("inspect_image", e)),
		}
	}

	#[instrument(skip(self))]
	async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
		let (from_image, tag) = split_image_tag(image);
		info!("pulling setup image");
		self
			.docker
			.create_image(
				Some(
					CreateImageOptionsBuilder::new()
						.from_image(from_image)
						.tag(tag)
						.build(),
				),
				None,
				None,
			)
			.try_collect::<Vec<_>>()
			.await
			.map_err(|e| EngineError::request("pull_image", e))?;
		debug!("pulled setup image");
		Ok(())
	}

	async fn create_container(&self, spec: &HelperContainerSpec) -> Result<String, EngineError> {
		let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
		let body = ContainerCreateBody {
			image: Some(spec.image.clone()),
			env: Some(env),
			host_config: Some(HostConfig {
				auto_remove: Some(spec.auto_remove),
				network_mode: Some(spec.network_mode.clone()),
				cap_add: Some(spec.cap_add.clone()),
				..HostConfig::default()
			}),
			..ContainerCreateBody::default()
		};

		let response = self
			.docker
			.create_container(
				Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
				body,
			)
			.await
			.map_err(|e| EngineError::request("create_container", e))?;
		Ok(response.id)
	}

	async fn start_container(&self, id: &str) -> Result<(), EngineError> {
		self
			.docker
			.start_container(id, None::<StartContainerOptions>)
			.await
			.map_err(|e| EngineError::request("start_container", e))
	}

	fn container_logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<String, EngineError>> {
		let options = LogsOptionsBuilder::new()
			.follow(true)
			.stdout(true)
			.stderr(true)
			.build();
		self
			.docker
			.logs(id, Some(options))
			.map(|item| {
				item
					.map(|output| String::from_utf8_lossy(&output.into_bytes()).trim_end().to_string())
					.map_err(|e| EngineError::request("container_logs", e))
			})
			.boxed()
	}

	fn network_events(&self) -> BoxStream<'_, Result<NetworkEvent, EngineError>> {
		let filters: HashMap<&str, Vec<&str>> = HashMap::from([
			("type", vec!["network"]),
			("event", vec!["create", "destroy"]),
		]);
		let options = EventsOptionsBuilder::new().filters(&filters).build();
		self
			.docker
			.events(Some(options))
			.map_err(|e| EngineError::request("events", e))
			.try_filter_map(|message| async move { Ok(network_event(message)) })
			.boxed()
	}
}

fn split_image_tag(image: &str) -> (&str, &str) {
	match image.rsplit_once(':') {
		Some((name, tag)) if !tag.contains('/') => (name, tag),
		_ => (image, "latest"),
	}
}

fn record_from_network(operation: &'static str, network: Network) -> Result<NetworkRecord, EngineError> {
	let id = network
		.id
		.filter(|id| !id.is_empty())
		.ok_or(EngineError::MissingField {
			operation,
			field: "Id",
		})?;

	let subnets = network
		.ipam
		.and_then(|ipam| ipam.config)
		.unwrap_or_default()
		.into_iter()
		.filter_map(|config| config.subnet)
		.filter(|subnet| !subnet.is_empty())
		.collect();

	Ok(NetworkRecord {
		id,
		name: network.name.unwrap_or_default(),
		scope: NetworkScope::parse(network.scope.as_deref().unwrap_or("local")),
		subnets,
	})
}

fn network_event(message: EventMessage) -> Option<NetworkEvent> {
	if message.typ != Some(EventMessageTypeEnum::NETWORK) {
		return None;
	}
	let actor = message.actor?;
	let id = actor.id.filter(|id| !id.is_empty())?;
	let name = actor
		.attributes
		.and_then(|mut attrs| attrs.remove("name"))
		.unwrap_or_default();

	match message.action.as_deref() {
		Some("create") => Some(NetworkEvent::Created { id, name }),
		Some("destroy") => Some(NetworkEvent::Destroyed { id, name }),
		_ => None,
	}
}
