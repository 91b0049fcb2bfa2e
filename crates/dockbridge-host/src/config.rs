// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use dockbridge_wgtunnel_common::{TunnelAddresses, TunnelConfigOptions};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::platform::HostPlatform;
use crate::readiness::Backoff;
use crate::tunnel::TunnelSettings;

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const ENV_PREFIX: &str = "DOCKBRIDGE_";
pub const DEFAULT_INTERFACE: &str = "dockbridge";
pub const DEFAULT_SETUP_IMAGE: &str = "wpkpda/docker-win-net-setup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
	pub platform: HostPlatform,
	pub interface_name: String,
	pub host_address: Ipv4Addr,
	pub vm_address: Ipv4Addr,
	pub listen_port: u16,
	pub setup_image: String,
	/// Empty means no `DNS =` line.
	pub dns: Vec<IpAddr>,
	pub persistent_keepalive: Option<u16>,
	pub readiness_base: Duration,
	pub readiness_cap: Duration,
	pub retry_delay: Duration,
	pub settle_delay: Duration,
	pub work_dir: PathBuf,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		let backoff = Backoff::default();
		let tunnel = TunnelConfigOptions::default();
		Self {
			platform: HostPlatform::current(),
			interface_name: DEFAULT_INTERFACE.to_string(),
			host_address: Ipv4Addr::new(10, 33, 33, 1),
			vm_address: Ipv4Addr::new(10, 33, 33, 2),
			listen_port: 3333,
			setup_image: DEFAULT_SETUP_IMAGE.to_string(),
			dns: tunnel.dns,
			persistent_keepalive: tunnel.persistent_keepalive,
			readiness_base: backoff.base,
			readiness_cap: backoff.cap,
			retry_delay: Duration::from_secs(1),
			settle_delay: Duration::from_secs(1),
			work_dir: default_work_dir(),
		}
	}
}

impl BridgeConfig {
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Builds a config from `DOCKBRIDGE_*` values, falling back to defaults.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let defaults = Self::default();
		let env = Env { lookup: &lookup };

		let platform = match env.get("PLATFORM") {
			Some(raw) => HostPlatform::parse(&raw).ok_or_else(|| invalid("PLATFORM", "expected windows or linux"))?,
			None => defaults.platform,
		};
		let dns = match env.get("DNS") {
			Some(raw) => parse_dns(&raw).map_err(|message| invalid("DNS", &message))?,
			None => defaults.dns,
		};
		let persistent_keepalive = match env.parse::<u16>("PERSISTENT_KEEPALIVE")? {
			Some(0) => None,
			Some(secs) => Some(secs),
			None => defaults.persistent_keepalive,
		};

		let config = Self {
			platform,
			interface_name: env.get("INTERFACE").unwrap_or(defaults.interface_name),
			host_address: env.parse("HOST_ADDRESS")?.unwrap_or(defaults.host_address),
			vm_address: env.parse("VM_ADDRESS")?.unwrap_or(defaults.vm_address),
			listen_port: env.parse("LISTEN_PORT")?.unwrap_or(defaults.listen_port),
			setup_image: env.get("SETUP_IMAGE").unwrap_or(defaults.setup_image),
			dns,
			persistent_keepalive,
			readiness_base: env
				.parse("READINESS_BASE_SECS")?
				.map(Duration::from_secs)
				.unwrap_or(defaults.readiness_base),
			readiness_cap: env
				.parse("READINESS_CAP_SECS")?
				.map(Duration::from_secs)
				.unwrap_or(defaults.readiness_cap),
			retry_delay: env
				.parse("RETRY_DELAY_MS")?
				.map(Duration::from_millis)
				.unwrap_or(defaults.retry_delay),
			settle_delay: env
				.parse("SETTLE_DELAY_MS")?
				.map(Duration::from_millis)
				.unwrap_or(defaults.settle_delay),
			work_dir: env.get("WORK_DIR").map(PathBuf::from).unwrap_or(defaults.work_dir),
		};
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		let name = self.interface_name.trim();
		if name.is_empty() {
			return Err(invalid("INTERFACE", "must not be empty"));
		}
		if name.chars().any(|c| c.is_whitespace() || c == '/') {
			return Err(invalid("INTERFACE", "must not contain whitespace or '/'"));
		}
		if let Some(max) = self.platform.max_interface_name_len() {
			if name.len() > max {
				return Err(invalid(
					"INTERFACE",
					&format!("must be at most {max} characters on this platform"),
				));
			}
		}
		if self.host_address == self.vm_address {
			return Err(invalid("VM_ADDRESS", "must differ from the host address"));
		}
		if self.listen_port == 0 {
			return Err(invalid("LISTEN_PORT", "must be non-zero"));
		}
		if self.setup_image.trim().is_empty() {
			return Err(invalid("SETUP_IMAGE", "must not be empty"));
		}
		if self.readiness_base.is_zero() || self.readiness_cap < self.readiness_base {
			return Err(invalid(
				"READINESS_CAP_SECS",
				"backoff base must be non-zero and not above the cap",
			));
		}
		Ok(())
	}

	pub fn addresses(&self) -> TunnelAddresses {
		TunnelAddresses {
			host: self.host_address,
			vm: self.vm_address,
			listen_port: self.listen_port,
		}
	}

	pub fn backoff(&self) -> Backoff {
		Backoff {
			base: self.readiness_base,
			cap: self.readiness_cap,
		}
	}

	pub fn tunnel_settings(&self) -> TunnelSettings {
		TunnelSettings {
			interface_name: self.interface_name.clone(),
			work_dir: self.work_dir.clone(),
			setup_image: self.setup_image.clone(),
			config_options: TunnelConfigOptions {
				dns: self.dns.clone(),
				persistent_keepalive: self.persistent_keepalive,
			},
			settle_delay: self.settle_delay,
		}
	}
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
	lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
	fn get(&self, name: &str) -> Option<String> {
		(self.lookup)(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
	}

	fn parse<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>>
	where
		T::Err: std::fmt::Display,
	{
		match self.get(name) {
			Some(val) => val
				.trim()
				.parse()
				.map(Some)
				.map_err(|e: T::Err| invalid(name, &e.to_string())),
			None => Ok(None),
		}
	}
}

fn invalid(name: &str, message: &str) -> ConfigError {
	ConfigError::InvalidValue {
		name: format!("{ENV_PREFIX}{name}"),
		message: message.to_string(),
	}
}

/// Comma-separated addresses. `none` disables the DNS line.
pub fn parse_dns(raw: &str) -> std::result::Result<Vec<IpAddr>, String> {
	if raw.trim().eq_ignore_ascii_case("none") {
		return Ok(Vec::new());
	}
	raw
		.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(|s| s.parse::<IpAddr>().map_err(|e| format!("{s}: {e}")))
		.collect()
}

/// Directory of the running executable, where bundled binaries and the
/// tunnel config live.
pub fn default_work_dir() -> PathBuf {
	std::env::current_exe()
		.ok()
		.and_then(|exe| exe.parent().map(Path::to_path_buf))
		.unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> = pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |name| map.get(name).cloned()
	}

	#[test]
	fn defaults_match_documented_values() {
		let config = BridgeConfig::from_lookup(lookup(&[])).unwrap();
		assert_eq!(config.interface_name, "dockbridge");
		assert_eq!(config.host_address, Ipv4Addr::new(10, 33, 33, 1));
		assert_eq!(config.vm_address, Ipv4Addr::new(10, 33, 33, 2));
		assert_eq!(config.listen_port, 3333);
		assert_eq!(config.setup_image, "wpkpda/docker-win-net-setup");
		assert_eq!(config.dns.len(), 2);
		assert_eq!(config.persistent_keepalive, Some(25));
		assert_eq!(config.readiness_base, Duration::from_secs(20));
		assert_eq!(config.readiness_cap, Duration::from_secs(600));
		assert_eq!(config.retry_delay, Duration::from_secs(1));
		assert_eq!(config.settle_delay, Duration::from_secs(1));
	}

	#[test]
	fn reads_prefixed_overrides() {
		let config = BridgeConfig::from_lookup(lookup(&[
			("DOCKBRIDGE_PLATFORM", "linux"),
			("DOCKBRIDGE_INTERFACE", "db0"),
			("DOCKBRIDGE_LISTEN_PORT", "51820"),
			("DOCKBRIDGE_DNS", "none"),
			("DOCKBRIDGE_PERSISTENT_KEEPALIVE", "0"),
			("DOCKBRIDGE_RETRY_DELAY_MS", "250"),
			("DOCKBRIDGE_WORK_DIR", "/opt/dockbridge"),
		]))
		.unwrap();
		assert_eq!(config.platform, HostPlatform::Linux);
		assert_eq!(config.interface_name, "db0");
		assert_eq!(config.listen_port, 51820);
		assert!(config.dns.is_empty());
		assert_eq!(config.persistent_keepalive, None);
		assert_eq!(config.retry_delay, Duration::from_millis(250));
		assert_eq!(config.work_dir, PathBuf::from("/opt/dockbridge"));
	}

	#[test]
	fn rejects_unparseable_values_with_variable_name() {
		let err = BridgeConfig::from_lookup(lookup(&[("DOCKBRIDGE_LISTEN_PORT", "seventy")])).unwrap_err();
		assert!(err.to_string().contains("DOCKBRIDGE_LISTEN_PORT"));

		let err = BridgeConfig::from_lookup(lookup(&[("DOCKBRIDGE_DNS", "1.1.1.1, nope")])).unwrap_err();
		assert!(err.to_string().contains("DOCKBRIDGE_DNS"));
	}

	#[test]
	fn rejects_identical_addresses() {
		let err = BridgeConfig::from_lookup(lookup(&[("DOCKBRIDGE_VM_ADDRESS", "10.33.33.1")])).unwrap_err();
		assert!(err.to_string().contains("must differ"));
	}

	#[test]
	fn rejects_zero_port() {
		let config = BridgeConfig {
			listen_port: 0,
			..BridgeConfig::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn linux_interface_names_are_limited() {
		let config = BridgeConfig {
			platform: HostPlatform::Linux,
			interface_name: "dockbridge-too-long".to_string(),
			..BridgeConfig::default()
		};
		assert!(config.validate().is_err());

		let config = BridgeConfig {
			platform: HostPlatform::Windows,
			..config
		};
		assert!(config.validate().is_ok());
	}

	#[test]
	fn empty_interface_name_is_rejected() {
		let config = BridgeConfig {
			interface_name: "  ".to_string(),
			..BridgeConfig::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn parses_dns_lists() {
		assert_eq!(
			parse_dns("1.1.1.1, 2606:4700:4700::1111").unwrap(),
			vec![
				"1.1.1.1".parse::<IpAddr>().unwrap(),
				"2606:4700:4700::1111".parse::<IpAddr>().unwrap()
			]
		);
		assert!(parse_dns("NONE").unwrap().is_empty());
	}

	#[test]
	fn tunnel_settings_carry_config_values() {
		let config = BridgeConfig {
			work_dir: PathBuf::from("/srv/db"),
			..BridgeConfig::default()
		};
		let settings = config.tunnel_settings();
		assert_eq!(settings.config_path(), PathBuf::from("/srv/db/dockbridge.conf"));
		assert_eq!(settings.bin_dir(), PathBuf::from("/srv/db/bin"));
		assert_eq!(settings.config_options.persistent_keepalive, Some(25));
	}
}
