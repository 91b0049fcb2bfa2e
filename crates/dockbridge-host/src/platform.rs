// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OS command lines for address, route and tunnel service changes.

use dockbridge_wgtunnel_common::RouteTarget;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::command::CommandLine;
use crate::interface::InterfaceBinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
	/// WireGuard for Windows tunnel services, `netsh` and `route.exe`.
	Windows,
	/// `wg-quick` and iproute2.
	Linux,
}

impl HostPlatform {
	pub fn current() -> Self {
		if cfg!(windows) {
			Self::Windows
		} else {
			Self::Linux
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s.to_ascii_lowercase().as_str() {
			"windows" => Some(Self::Windows),
			"linux" => Some(Self::Linux),
			_ => None,
		}
	}

	/// Binaries extracted next to the executable before the tunnel is installed.
	pub fn bundled_binaries(&self) -> &'static [&'static str] {
		match self {
			Self::Windows => &["wg.exe", "wireguard.exe"],
			Self::Linux => &[],
		}
	}

	pub fn max_interface_name_len(&self) -> Option<usize> {
		match self {
			Self::Windows => None,
			Self::Linux => Some(15),
		}
	}

	pub fn install_tunnel(&self, bin_dir: &Path, conf_path: &Path) -> CommandLine {
		match self {
			Self::Windows => CommandLine::new(
				wireguard_exe(bin_dir),
				["/installtunnelservice".to_string(), conf_path.display().to_string()],
			),
			Self::Linux => CommandLine::new("wg-quick", ["up".to_string(), conf_path.display().to_string()]),
		}
	}

	pub fn uninstall_tunnel(&self, bin_dir: &Path, name: &str, conf_path: &Path) -> CommandLine {
		match self {
			Self::Windows => CommandLine::new(wireguard_exe(bin_dir), ["/uninstalltunnelservice", name]),
			Self::Linux => {
				CommandLine::new("wg-quick", ["down".to_string(), conf_path.display().to_string()])
			}
		}
	}

	/// Output fragments of a failed install that mean the tunnel is already present.
	pub fn tunnel_conflict_markers(&self) -> &'static [&'static str] {
		match self {
			Self::Windows => &["already installed and running", "already exists"],
			Self::Linux => &["already exists"],
		}
	}

	/// Output fragments of a failed route delete that mean the route is already gone.
	pub fn route_absent_markers(&self) -> &'static [&'static str] {
		match self {
			Self::Windows => &["element not found"],
			Self::Linux => &["no such process", "cannot find device"],
		}
	}

	pub fn set_interface_address(&self, name: &str, host: Ipv4Addr, peer: Ipv4Addr) -> CommandLine {
		match self {
			Self::Windows => CommandLine::new(
				"netsh",
				[
					"interface".to_string(),
					"ip".to_string(),
					"set".to_string(),
					"address".to_string(),
					format!("name={name}"),
					"static".to_string(),
					host.to_string(),
					"255.255.255.255".to_string(),
					peer.to_string(),
				],
			),
			Self::Linux => CommandLine::new(
				"ip",
				[
					"address".to_string(),
					"replace".to_string(),
					format!("{host}/32"),
					"peer".to_string(),
					format!("{peer}/32"),
					"dev".to_string(),
					name.to_string(),
				],
			),
		}
	}

	pub fn add_route(&self, binding: &InterfaceBinding, target: &RouteTarget) -> CommandLine {
		match self {
			Self::Windows => CommandLine::new(
				"route",
				[
					"ADD".to_string(),
					target.network.to_string(),
					"MASK".to_string(),
					target.mask.to_string(),
					"0.0.0.0".to_string(),
					"IF".to_string(),
					binding.index.to_string(),
				],
			),
			Self::Linux => CommandLine::new(
				"ip",
				[
					"route".to_string(),
					"replace".to_string(),
					target.to_string(),
					"dev".to_string(),
					binding.name.clone(),
				],
			),
		}
	}

	/// Deletes by destination on the tunnel interface, without a mask.
	pub fn delete_route(&self, binding: &InterfaceBinding, target: &RouteTarget) -> CommandLine {
		match self {
			Self::Windows => CommandLine::new(
				"route",
				[
					"DELETE".to_string(),
					target.network.to_string(),
					"IF".to_string(),
					binding.index.to_string(),
				],
			),
			Self::Linux => CommandLine::new(
				"ip",
				[
					"route".to_string(),
					"del".to_string(),
					target.to_string(),
					"dev".to_string(),
					binding.name.clone(),
				],
			),
		}
	}

	pub fn delete_default_route(&self, binding: &InterfaceBinding) -> CommandLine {
		let default = RouteTarget::default_route();
		match self {
			Self::Windows => CommandLine::new(
				"route",
				[
					"DELETE".to_string(),
					default.network.to_string(),
					"MASK".to_string(),
					default.mask.to_string(),
					"IF".to_string(),
					binding.index.to_string(),
				],
			),
			Self::Linux => self.delete_route(binding, &default),
		}
	}
}

fn wireguard_exe(bin_dir: &Path) -> String {
	bin_dir.join("wireguard.exe").display().to_string()
}
