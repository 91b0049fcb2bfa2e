// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use ipnet::{IpNet, Ipv4Net};
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubnetError {
	#[error("invalid subnet {subnet:?}: {source}")]
	Invalid {
		subnet: String,
		#[source]
		source: ipnet::AddrParseError,
	},
}

/// Scope the container engine reports for a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkScope {
	Local,
	Swarm,
	Global,
	Other(String),
}

impl NetworkScope {
	pub fn parse(s: &str) -> Self {
		match s {
			"local" => Self::Local,
			"swarm" => Self::Swarm,
			"global" => Self::Global,
			other => Self::Other(other.to_string()),
		}
	}

	/// Only host-local networks live inside the VM and get a host route.
	pub fn is_routable(&self) -> bool {
		matches!(self, Self::Local)
	}
}

impl fmt::Display for NetworkScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Local => f.write_str("local"),
			Self::Swarm => f.write_str("swarm"),
			Self::Global => f.write_str("global"),
			Self::Other(s) => f.write_str(s),
		}
	}
}

/// A container network as seen through the engine's inspect API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
	pub id: String,
	pub name: String,
	pub scope: NetworkScope,
	/// Subnets in IPAM order, exactly as the engine reports them.
	pub subnets: Vec<String>,
}

impl NetworkRecord {
	pub fn is_routable(&self) -> bool {
		self.scope.is_routable()
	}

	/// Parses every non-empty subnet, failing on the first malformed one.
	pub fn parsed_subnets(&self) -> Result<Vec<IpNet>, SubnetError> {
		self
			.subnets
			.iter()
			.map(|s| s.trim())
			.filter(|s| !s.is_empty())
			.map(parse_subnet)
			.collect()
	}
}

pub fn parse_subnet(subnet: &str) -> Result<IpNet, SubnetError> {
	subnet
		.trim()
		.parse::<IpNet>()
		.map_err(|source| SubnetError::Invalid {
			subnet: subnet.to_string(),
			source,
		})
}

/// Destination of a directly attached IPv4 route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteTarget {
	pub network: Ipv4Addr,
	pub mask: Ipv4Addr,
	pub prefix_len: u8,
}

impl RouteTarget {
	pub fn default_route() -> Self {
		Self {
			network: Ipv4Addr::UNSPECIFIED,
			mask: Ipv4Addr::UNSPECIFIED,
			prefix_len: 0,
		}
	}
}

impl From<Ipv4Net> for RouteTarget {
	fn from(net: Ipv4Net) -> Self {
		let net = net.trunc();
		Self {
			network: net.network(),
			mask: net.netmask(),
			prefix_len: net.prefix_len(),
		}
	}
}

impl fmt::Display for RouteTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.network, self.prefix_len)
	}
}
