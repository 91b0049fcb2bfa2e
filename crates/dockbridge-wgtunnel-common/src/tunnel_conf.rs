// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host-side WireGuard configuration file.
//!
//! The tunnel engine consumes the canonical `[Interface]` / `[Peer]` layout. The
//! allowed-address list is every known container subnet followed by the VM peer's
//! own `/32`; duplicates are dropped and input order is kept, so rendering is a pure
//! function of its inputs.

use crate::identity::TunnelIdentity;
use crate::keys::WgPublicKey;
use crate::secret::SecretString;
use ipnet::{IpNet, Ipv4Net};
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfigOptions {
	pub dns: Vec<IpAddr>,
	pub persistent_keepalive: Option<u16>,
}

impl Default for TunnelConfigOptions {
	fn default() -> Self {
		Self {
			dns: vec![
				IpAddr::from([1, 1, 1, 1]),
				IpAddr::from([8, 8, 8, 8]),
			],
			persistent_keepalive: Some(25),
		}
	}
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
	private_key: SecretString,
	address: Ipv4Net,
	listen_port: u16,
	dns: Vec<IpAddr>,
	peer_public_key: WgPublicKey,
	allowed_ips: Vec<IpNet>,
	persistent_keepalive: Option<u16>,
}

impl TunnelConfig {
	pub fn new(
		identity: &TunnelIdentity,
		subnets: impl IntoIterator<Item = IpNet>,
		options: &TunnelConfigOptions,
	) -> Self {
		let mut allowed_ips: Vec<IpNet> = Vec::new();
		let vm_net = IpNet::V4(identity.vm_peer_net());
		for subnet in subnets.into_iter().map(|s| s.trunc()) {
			if subnet != vm_net && !allowed_ips.contains(&subnet) {
				allowed_ips.push(subnet);
			}
		}
		allowed_ips.push(vm_net);

		Self {
			private_key: identity.host_keys().private_key().to_base64(),
			address: Ipv4Net::from(identity.host_address()),
			listen_port: identity.listen_port(),
			dns: options.dns.clone(),
			peer_public_key: *identity.vm_public_key(),
			allowed_ips,
			persistent_keepalive: options.persistent_keepalive,
		}
	}

	pub fn allowed_ips(&self) -> &[IpNet] {
		&self.allowed_ips
	}

	pub fn render(&self) -> SecretString {
		let mut lines = vec![
			"[Interface]".to_string(),
			format!("PrivateKey = {}", self.private_key.expose()),
			format!("Address = {}", self.address),
			format!("ListenPort = {}", self.listen_port),
		];
		if !self.dns.is_empty() {
			lines.push(format!("DNS = {}", join(&self.dns)));
		}
		lines.push(String::new());
		lines.push("[Peer]".to_string());
		lines.push(format!("PublicKey = {}", self.peer_public_key));
		lines.push(format!("AllowedIPs = {}", join(&self.allowed_ips)));
		if let Some(keepalive) = self.persistent_keepalive {
			lines.push(format!("PersistentKeepalive = {keepalive}"));
		}

		let mut out = lines.join("\n");
		out.push('\n');
		SecretString::new(out)
	}
}

fn join<T: ToString>(items: &[T]) -> String {
	items
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join(", ")
}
