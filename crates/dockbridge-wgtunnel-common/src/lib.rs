// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared types for the dockbridge WireGuard tunnel: key material, the per-run
//! tunnel identity, config rendering and container network records.

pub mod identity;
pub mod keys;
pub mod network;
pub mod secret;
pub mod tunnel_conf;

pub use identity::{TunnelAddresses, TunnelIdentity, VmPeerMaterial};
pub use keys::{KeyError, WgKeyPair, WgPrivateKey, WgPublicKey};
pub use network::{parse_subnet, NetworkRecord, NetworkScope, RouteTarget, SubnetError};
pub use secret::{Secret, SecretString, REDACTED};
pub use tunnel_conf::{TunnelConfig, TunnelConfigOptions};
