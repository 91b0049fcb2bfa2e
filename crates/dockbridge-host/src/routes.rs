// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OS routes for container networks, kept in step with engine events.

use dockbridge_wgtunnel_common::{NetworkRecord, RouteTarget};
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::command::CommandRunner;
use crate::error::RouteError;
use crate::interface::InterfaceBinding;
use crate::platform::HostPlatform;

#[derive(Debug, Clone)]
struct TrackedNetwork {
	record: NetworkRecord,
	routes: Vec<RouteTarget>,
}

/// Route table for one tunnel interface.
///
/// Owned by the supervisor task. Every route that exists on the host for a
/// tracked network is listed under that network's id, and nothing else.
pub struct RouteManager {
	platform: HostPlatform,
	runner: Arc<dyn CommandRunner>,
	binding: Option<InterfaceBinding>,
	networks: BTreeMap<String, TrackedNetwork>,
}

impl RouteManager {
	pub fn new(platform: HostPlatform, runner: Arc<dyn CommandRunner>) -> Self {
		Self {
			platform,
			runner,
			binding: None,
			networks: BTreeMap::new(),
		}
	}

	/// Targets a freshly installed interface. Routes tracked for a previous
	/// interface went away with it.
	pub fn bind(&mut self, binding: InterfaceBinding) {
		info!(interface = %binding.name, index = binding.index, "route manager bound");
		self.networks.clear();
		self.binding = Some(binding);
	}

	pub fn unbind(&mut self) {
		self.networks.clear();
		self.binding = None;
	}

	pub fn binding(&self) -> Option<&InterfaceBinding> {
		self.binding.as_ref()
	}

	/// Tracks networks whose routes the tunnel already carries, without
	/// issuing commands, so that destroying them later removes their routes.
	pub fn adopt(&mut self, records: impl IntoIterator<Item = NetworkRecord>) {
		for record in records {
			if self.networks.contains_key(&record.id) {
				continue;
			}
			let routes = if record.is_routable() {
				match record.parsed_subnets() {
					Ok(subnets) => ipv4_targets(&subnets),
					Err(e) => {
						warn!(network_id = %record.id, error = %e, "not adopting network with invalid subnet");
						continue;
					}
				}
			} else {
				Vec::new()
			};
			debug!(network_id = %record.id, routes = routes.len(), "adopted network");
			self.networks
				.insert(record.id.clone(), TrackedNetwork { record, routes });
		}
	}

	/// Adds routes for a local-scope network.
	///
	/// Either every IPv4 subnet of the network gets a route and the network is
	/// tracked, or the routes added by this call are removed again and it is
	/// not. Known ids are ignored.
	#[instrument(skip(self, record), fields(network_id = %record.id, network = %record.name))]
	pub async fn add_network(&mut self, record: NetworkRecord) -> Result<(), RouteError> {
		let binding = self.binding.clone().ok_or(RouteError::NotBound)?;

		if self.networks.contains_key(&record.id) {
			debug!("network already tracked");
			return Ok(());
		}

		if !record.is_routable() {
			debug!(scope = %record.scope, "tracking non-local network without routes");
			self.networks.insert(
				record.id.clone(),
				TrackedNetwork {
					record,
					routes: Vec::new(),
				},
			);
			return Ok(());
		}

		let subnets = record.parsed_subnets()?;
		let targets = ipv4_targets(&subnets);

		let mut added: Vec<RouteTarget> = Vec::with_capacity(targets.len());
		for target in targets {
			let command = self.platform.add_route(&binding, &target);
			if let Err(source) = self.runner.run(&command).await {
				warn!(route = %target, error = %source, "route add failed, rolling back");
				self.delete_routes(&binding, &added).await;
				return Err(RouteError::Command {
					target: target.to_string(),
					source,
				});
			}
			added.push(target);
		}

		info!(routes = added.len(), "network routed");
		self.networks.insert(
			record.id.clone(),
			TrackedNetwork {
				record,
				routes: added,
			},
		);
		Ok(())
	}

	/// Drops a network and deletes its routes. Unknown ids are a no-op.
	#[instrument(skip(self))]
	pub async fn remove_network(&mut self, id: &str) -> Option<NetworkRecord> {
		let tracked = self.networks.remove(id)?;
		if let Some(binding) = self.binding.clone() {
			self.delete_routes(&binding, &tracked.routes).await;
		}
		info!(network = %tracked.record.name, routes = tracked.routes.len(), "network removed");
		Some(tracked.record)
	}

	pub fn routed_subnets(&self) -> Vec<RouteTarget> {
		let mut targets: Vec<RouteTarget> = self
			.networks
			.values()
			.flat_map(|n| n.routes.iter().copied())
			.collect();
		targets.sort();
		targets
	}

	pub fn networks(&self) -> impl Iterator<Item = &NetworkRecord> {
		self.networks.values().map(|n| &n.record)
	}

	pub fn contains(&self, id: &str) -> bool {
		self.networks.contains_key(id)
	}

	async fn delete_routes(&self, binding: &InterfaceBinding, targets: &[RouteTarget]) {
		for target in targets {
			let command = self.platform.delete_route(binding, target);
			match self.runner.run(&command).await {
				Ok(_) => debug!(route = %target, "route deleted"),
				Err(e) if e.mentions_any(self.platform.route_absent_markers()) => {
					debug!(route = %target, "route already absent");
				}
				Err(e) => warn!(route = %target, error = %e, "route delete failed"),
			}
		}
	}
}

/// The tunnel is IPv4 point-to-point, so only IPv4 subnets get OS routes.
fn ipv4_targets(subnets: &[IpNet]) -> Vec<RouteTarget> {
	let mut targets = Vec::new();
	for subnet in subnets {
		if let IpNet::V4(net) = subnet {
			let target = RouteTarget::from(*net);
			if !targets.contains(&target) {
				targets.push(target);
			}
		}
	}
	targets
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{binding, local_network, RecordingRunner};
	use dockbridge_wgtunnel_common::NetworkScope;
	use proptest::prelude::*;

	fn manager(runner: &Arc<RecordingRunner>) -> RouteManager {
		let mut routes = RouteManager::new(HostPlatform::Windows, runner.clone());
		routes.bind(binding());
		routes
	}

	fn target(cidr: &str) -> RouteTarget {
		RouteTarget::from(cidr.parse::<ipnet::Ipv4Net>().unwrap())
	}

	#[tokio::test]
	async fn adds_and_removes_routes_for_local_network() {
		let runner = Arc::new(RecordingRunner::new());
		let mut routes = manager(&runner);

		routes
			.add_network(local_network("a", &["172.18.0.0/16"]))
			.await
			.unwrap();
		assert_eq!(routes.routed_subnets(), vec![target("172.18.0.0/16")]);
		assert_eq!(
			runner.commands(),
			vec!["route ADD 172.18.0.0 MASK 255.255.0.0 0.0.0.0 IF 42"]
		);

		let removed = routes.remove_network("a").await.unwrap();
		assert_eq!(removed.id, "a");
		assert!(routes.routed_subnets().is_empty());
		assert_eq!(runner.commands().last().unwrap(), "route DELETE 172.18.0.0 IF 42");
	}

	#[tokio::test]
	async fn create_a_b_then_destroy_a_keeps_b() {
		let runner = Arc::new(RecordingRunner::new());
		let mut routes = manager(&runner);

		routes.add_network(local_network("a", &["10.1.0.0/24"])).await.unwrap();
		routes.add_network(local_network("b", &["10.2.0.0/24"])).await.unwrap();
		routes.remove_network("a").await;

		assert_eq!(routes.routed_subnets(), vec![target("10.2.0.0/24")]);
		assert_eq!(
			runner.commands(),
			vec![
				"route ADD 10.1.0.0 MASK 255.255.255.0 0.0.0.0 IF 42",
				"route ADD 10.2.0.0 MASK 255.255.255.0 0.0.0.0 IF 42",
				"route DELETE 10.1.0.0 IF 42",
			]
		);
	}

	#[tokio::test]
	async fn removing_unknown_network_issues_no_commands() {
		let runner = Arc::new(RecordingRunner::new());
		let mut routes = manager(&runner);

		assert!(routes.remove_network("missing").await.is_none());
		assert!(runner.commands().is_empty());
	}

	#[tokio::test]
	async fn non_local_networks_are_tracked_without_routes() {
		let runner = Arc::new(RecordingRunner::new());
		let mut routes = manager(&runner);
		let mut overlay = local_network("o", &["10.0.9.0/24"]);
		overlay.scope = NetworkScope::Swarm;

		routes.add_network(overlay).await.unwrap();
		assert!(routes.contains("o"));
		assert!(routes.routed_subnets().is_empty());

		routes.remove_network("o").await;
		assert!(runner.commands().is_empty());
	}

	#[tokio::test]
	async fn known_network_is_not_added_twice() {
		let runner = Arc::new(RecordingRunner::new());
		let mut routes = manager(&runner);

		routes.add_network(local_network("a", &["10.1.0.0/24"])).await.unwrap();
		routes.add_network(local_network("a", &["10.1.0.0/24"])).await.unwrap();
		assert_eq!(runner.commands().len(), 1);
	}

	#[tokio::test]
	async fn invalid_subnet_aborts_before_any_command() {
		let runner = Arc::new(RecordingRunner::new());
		let mut routes = manager(&runner);

		let err = routes
			.add_network(local_network("a", &["10.1.0.0/24", "not-a-cidr"]))
			.await
			.unwrap_err();
		assert!(matches!(err, RouteError::Subnet(_)));
		assert!(runner.commands().is_empty());
		assert!(!routes.contains("a"));
	}

	#[tokio::test]
	async fn failed_route_add_rolls_back_earlier_routes() {
		let runner = Arc::new(RecordingRunner::new());
		runner.fail_when("ADD 10.2.0.0", 1, "The route addition failed: access is denied.");
		let mut routes = manager(&runner);

		let err = routes
			.add_network(local_network("a", &["10.1.0.0/24", "10.2.0.0/24", "10.3.0.0/24"]))
			.await
			.unwrap_err();
		assert!(matches!(err, RouteError::Command { ref target, .. } if target == "10.2.0.0/24"));
		assert!(!routes.contains("a"));
		assert!(routes.routed_subnets().is_empty());
		assert_eq!(
			runner.commands(),
			vec![
				"route ADD 10.1.0.0 MASK 255.255.255.0 0.0.0.0 IF 42",
				"route ADD 10.2.0.0 MASK 255.255.255.0 0.0.0.0 IF 42",
				"route DELETE 10.1.0.0 IF 42",
			]
		);
	}

	#[tokio::test]
	async fn ipv6_subnets_are_tracked_but_not_routed() {
		let runner = Arc::new(RecordingRunner::new());
		let mut routes = manager(&runner);

		routes
			.add_network(local_network("a", &["10.1.0.0/24", "fd00:1::/64"]))
			.await
			.unwrap();
		assert_eq!(runner.commands().len(), 1);
		assert_eq!(routes.networks().next().unwrap().subnets.len(), 2);
	}

	#[tokio::test]
	async fn adopted_networks_issue_no_commands_until_destroyed() {
		let runner = Arc::new(RecordingRunner::new());
		let mut routes = manager(&runner);

		routes.adopt([local_network("pre", &["172.17.0.0/16"])]);
		assert!(runner.commands().is_empty());
		assert_eq!(routes.routed_subnets(), vec![target("172.17.0.0/16")]);

		routes.remove_network("pre").await;
		assert_eq!(runner.commands(), vec!["route DELETE 172.17.0.0 IF 42"]);
	}

	#[tokio::test]
	async fn delete_failures_still_drop_the_record() {
		let runner = Arc::new(RecordingRunner::new());
		runner.fail_when("DELETE 10.1.0.0", 1, "The route deletion failed: access is denied.");
		let mut routes = manager(&runner);

		routes.add_network(local_network("a", &["10.1.0.0/24"])).await.unwrap();
		assert!(routes.remove_network("a").await.is_some());
		assert!(!routes.contains("a"));
	}

	#[tokio::test]
	async fn unbound_manager_refuses_to_add() {
		let runner = Arc::new(RecordingRunner::new());
		let mut routes = RouteManager::new(HostPlatform::Windows, runner.clone());

		let err = routes
			.add_network(local_network("a", &["10.1.0.0/24"]))
			.await
			.unwrap_err();
		assert!(matches!(err, RouteError::NotBound));
		assert!(runner.commands().is_empty());
	}

	#[tokio::test]
	async fn rebinding_resets_the_table() {
		let runner = Arc::new(RecordingRunner::new());
		let mut routes = manager(&runner);

		routes.add_network(local_network("a", &["10.1.0.0/24"])).await.unwrap();
		routes.bind(binding());
		assert!(routes.routed_subnets().is_empty());
		assert!(!routes.contains("a"));
	}

	proptest! {
		#[test]
		fn route_table_matches_live_local_subnets(
			ops in proptest::collection::vec((0u8..6, any::<bool>()), 1..40),
		) {
			let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
			rt.block_on(async {
				let runner = Arc::new(RecordingRunner::new());
				let mut routes = manager(&runner);
				let mut live: BTreeMap<u8, ()> = BTreeMap::new();

				for (n, create) in ops {
					let id = format!("net-{n}");
					if create {
						routes
							.add_network(local_network(&id, &[&format!("10.{n}.0.0/24")]))
							.await
							.unwrap();
						live.insert(n, ());
					} else {
						routes.remove_network(&id).await;
						live.remove(&n);
					}
				}

				let expected: Vec<RouteTarget> = live
					.keys()
					.map(|n| target(&format!("10.{n}.0.0/24")))
					.collect();
				assert_eq!(routes.routed_subnets(), expected);
			});
		}
	}
}
