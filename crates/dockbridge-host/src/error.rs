// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use dockbridge_wgtunnel_common::SubnetError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
	#[error("{program} not found")]
	NotFound { program: String },

	#[error("failed to run {program}: {source}")]
	Io {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("`{command}` exited with {status}: {stderr}")]
	Failed {
		command: String,
		status: String,
		stdout: String,
		stderr: String,
	},
}

impl CommandError {
	/// Everything the command printed, for matching against known messages.
	pub fn output_text(&self) -> String {
		match self {
			Self::Failed { stdout, stderr, .. } => format!("{stdout}\n{stderr}"),
			other => other.to_string(),
		}
	}

	pub fn mentions_any(&self, needles: &[&str]) -> bool {
		let text = self.output_text().to_lowercase();
		needles.iter().any(|n| text.contains(&n.to_lowercase()))
	}
}

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("failed to create engine client: {0}")]
	Connect(String),

	#[error("engine {operation} failed: {message}")]
	Request {
		operation: &'static str,
		message: String,
	},

	#[error("engine {operation} response is missing {field}")]
	MissingField {
		operation: &'static str,
		field: &'static str,
	},

	#[error("engine {operation} stream closed")]
	StreamClosed { operation: &'static str },
}

/// Fragments of transport errors that mean the engine's socket or named pipe
/// does not exist yet, i.e. the engine has not started.
const ENGINE_DOWN_MARKERS: &[&str] = &[
	"socket not found",
	"pipe/docker_engine",
	"no such file or directory",
	"cannot find the file",
	"os error 2",
	"connection refused",
];

impl EngineError {
	pub fn request(operation: &'static str, err: impl fmt::Display) -> Self {
		Self::Request {
			operation,
			message: err.to_string(),
		}
	}

	pub fn is_engine_not_running(&self) -> bool {
		let text = self.to_string().to_lowercase();
		ENGINE_DOWN_MARKERS.iter().any(|m| text.contains(m))
	}
}

#[derive(Debug, Error)]
pub enum ReadinessError {
	#[error("cancelled while waiting for the container engine")]
	Cancelled,

	#[error("container engine is unreachable: {0}")]
	Fatal(#[source] EngineError),
}

#[derive(Debug, Error)]
pub enum AssetError {
	#[error("asset {name} is not bundled in this build")]
	NotBundled { name: String },

	#[error("failed to write {path}: {source}")]
	Write {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

#[derive(Debug, Error)]
pub enum InterfaceError {
	#[error("interface {name} does not exist yet")]
	NotFound { name: String },
}

#[derive(Debug, Error)]
pub enum RouteError {
	#[error("tunnel interface is not bound")]
	NotBound,

	#[error(transparent)]
	Subnet(#[from] SubnetError),

	#[error("route change for {target} failed: {source}")]
	Command {
		target: String,
		#[source]
		source: CommandError,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
	ExtractBinaries,
	WaitForEngine,
	EnsureImage,
	RenderConfig,
	InstallTunnel,
	ConfigureAddress,
	ResolveInterface,
	RemoveDefaultRoute,
}

impl fmt::Display for SetupStep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::ExtractBinaries => "extract binaries",
			Self::WaitForEngine => "wait for engine",
			Self::EnsureImage => "ensure setup image",
			Self::RenderConfig => "render tunnel config",
			Self::InstallTunnel => "install tunnel",
			Self::ConfigureAddress => "configure interface address",
			Self::ResolveInterface => "resolve interface index",
			Self::RemoveDefaultRoute => "remove default route",
		})
	}
}

#[derive(Debug, Error)]
pub enum SetupError {
	#[error("extract binaries: {0}")]
	ExtractBinaries(#[source] AssetError),

	#[error("wait for engine: {0}")]
	WaitForEngine(#[source] ReadinessError),

	#[error("ensure setup image {image}: {source}")]
	EnsureImage {
		image: String,
		#[source]
		source: EngineError,
	},

	#[error("render tunnel config: {0}")]
	ListNetworks(#[source] EngineError),

	#[error("write tunnel config {path}: {source}")]
	WriteConfig {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("install tunnel: {0}")]
	InstallTunnel(#[source] CommandError),

	#[error("configure interface address: {0}")]
	ConfigureAddress(#[source] CommandError),

	#[error("resolve interface index: {0}")]
	ResolveInterface(#[source] InterfaceError),

	#[error("remove default route: {0}")]
	RemoveDefaultRoute(#[source] CommandError),
}

impl SetupError {
	pub fn step(&self) -> SetupStep {
		match self {
			Self::ExtractBinaries(_) => SetupStep::ExtractBinaries,
			Self::WaitForEngine(_) => SetupStep::WaitForEngine,
			Self::EnsureImage { .. } => SetupStep::EnsureImage,
			Self::ListNetworks(_) | Self::WriteConfig { .. } => {
				SetupStep::RenderConfig
			}
			Self::InstallTunnel(_) => SetupStep::InstallTunnel,
			Self::ConfigureAddress(_) => SetupStep::ConfigureAddress,
			Self::ResolveInterface(_) => SetupStep::ResolveInterface,
			Self::RemoveDefaultRoute(_) => SetupStep::RemoveDefaultRoute,
		}
	}

	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::WaitForEngine(ReadinessError::Cancelled))
	}
}

#[derive(Debug, Error)]
pub enum TeardownError {
	#[error("uninstall tunnel {name}: {source}")]
	Uninstall {
		name: String,
		#[source]
		source: CommandError,
	},
}

#[derive(Debug, Error)]
pub enum BootstrapError {
	#[error("wait for engine: {0}")]
	NotReady(#[source] ReadinessError),

	#[error("create setup container: {0}")]
	Create(#[source] EngineError),

	#[error("start setup container {id}: {source}")]
	Start {
		id: String,
		#[source]
		source: EngineError,
	},

	#[error("follow logs of setup container {id}: {source}")]
	Logs {
		id: String,
		#[source]
		source: EngineError,
	},
}

impl BootstrapError {
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::NotReady(ReadinessError::Cancelled))
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("invalid value for {name}: {message}")]
	InvalidValue { name: String, message: String },
}
