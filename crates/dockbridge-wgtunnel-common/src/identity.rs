// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::keys::{WgKeyPair, WgPublicKey};
use crate::secret::SecretString;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Point-to-point addressing shared by both tunnel ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelAddresses {
	pub host: Ipv4Addr,
	pub vm: Ipv4Addr,
	pub listen_port: u16,
}

/// Key material and addressing for one daemon run.
///
/// Both key pairs are generated together and never persisted, so every restart
/// re-keys the host and the VM peer.
#[derive(Debug, Clone)]
pub struct TunnelIdentity {
	host: WgKeyPair,
	vm: WgKeyPair,
	addresses: TunnelAddresses,
}

/// The subset of [`TunnelIdentity`] the VM peer is allowed to see.
#[derive(Debug, Clone)]
pub struct VmPeerMaterial {
	pub listen_port: u16,
	pub host_address: Ipv4Addr,
	pub vm_address: Ipv4Addr,
	pub host_public_key: WgPublicKey,
	pub vm_private_key: SecretString,
}

impl TunnelIdentity {
	pub fn generate(addresses: TunnelAddresses) -> Self {
		Self {
			host: WgKeyPair::generate(),
			vm: WgKeyPair::generate(),
			addresses,
		}
	}

	pub fn host_keys(&self) -> &WgKeyPair {
		&self.host
	}

	pub fn vm_public_key(&self) -> &WgPublicKey {
		self.vm.public_key()
	}

	pub fn addresses(&self) -> TunnelAddresses {
		self.addresses
	}

	pub fn host_address(&self) -> Ipv4Addr {
		self.addresses.host
	}

	pub fn vm_address(&self) -> Ipv4Addr {
		self.addresses.vm
	}

	pub fn listen_port(&self) -> u16 {
		self.addresses.listen_port
	}

	pub fn vm_peer_net(&self) -> Ipv4Net {
		Ipv4Net::from(self.addresses.vm)
	}

	pub fn bootstrap_material(&self) -> VmPeerMaterial {
		VmPeerMaterial {
			listen_port: self.addresses.listen_port,
			host_address: self.addresses.host,
			vm_address: self.addresses.vm,
			host_public_key: *self.host.public_key(),
			vm_private_key: self.vm.private_key().to_base64(),
		}
	}
}
