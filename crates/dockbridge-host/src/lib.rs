// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host side of dockbridge.
//!
//! Keeps a WireGuard tunnel to the container engine's VM installed and the
//! host's routes to container networks in step with the engine's network
//! events.

pub mod assets;
pub mod bootstrap;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod interface;
pub mod platform;
pub mod readiness;
pub mod routes;
pub mod supervisor;
pub mod tunnel;

#[cfg(test)]
mod testing;

pub use assets::{ensure_binaries, AssetSource, EmbeddedAssets};
pub use bootstrap::VmBootstrapLauncher;
pub use command::{CommandLine, CommandOutput, CommandRunner, SystemCommandRunner};
pub use config::BridgeConfig;
pub use engine::{DockerEngine, EngineClient, HelperContainerSpec, NetworkEvent};
pub use error::{
	AssetError, BootstrapError, CommandError, ConfigError, EngineError, InterfaceError,
	ReadinessError, RouteError, SetupError, SetupStep, TeardownError,
};
pub use interface::{InterfaceBinding, InterfaceResolver, SystemInterfaceResolver};
pub use platform::HostPlatform;
pub use readiness::{Backoff, ReadinessMonitor};
pub use routes::RouteManager;
pub use supervisor::{HostDeps, Supervisor, SupervisorState, WatchOutcome};
pub use tunnel::{TunnelManager, TunnelSettings, TunnelSetup};
