// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::net::Ipv4Addr;
use tracing::debug;

use crate::error::InterfaceError;

/// OS identity of the tunnel interface. Every route mutation goes through one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceBinding {
	pub name: String,
	pub index: u32,
	pub host_address: Ipv4Addr,
	pub peer_address: Ipv4Addr,
}

/// Looks up an interface index by name.
pub trait InterfaceResolver: Send + Sync {
	fn resolve_index(&self, name: &str) -> Result<u32, InterfaceError>;
}

/// Resolves against the host's live interface list.
///
/// Windows names adapters by GUID and shows the tunnel name as the friendly
/// name, so both are matched.
#[derive(Debug, Clone, Default)]
pub struct SystemInterfaceResolver;

impl InterfaceResolver for SystemInterfaceResolver {
	fn resolve_index(&self, name: &str) -> Result<u32, InterfaceError> {
		let found = netdev::get_interfaces().into_iter().find(|iface| {
			iface.name == name || iface.friendly_name.as_deref() == Some(name)
		});

		match found {
			Some(iface) if iface.index != 0 => {
				debug!(interface = name, index = iface.index, "resolved interface index");
				Ok(iface.index)
			}
			_ => Err(InterfaceError::NotFound {
				name: name.to_string(),
			}),
		}
	}
}
