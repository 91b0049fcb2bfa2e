// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Binaries embedded at build time and extracted next to the executable.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::AssetError;

static WG_EXE: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/wg.exe"));
static WIREGUARD_EXE: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/wireguard.exe"));

pub trait AssetSource: Send + Sync {
	fn read_asset(&self, name: &str) -> Result<&[u8], AssetError>;
}

/// Assets compiled into this binary by `build.rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedAssets;

impl AssetSource for EmbeddedAssets {
	fn read_asset(&self, name: &str) -> Result<&[u8], AssetError> {
		let bytes: &'static [u8] = match name {
			"wg.exe" => WG_EXE,
			"wireguard.exe" => WIREGUARD_EXE,
			_ => &[],
		};
		if bytes.is_empty() {
			return Err(AssetError::NotBundled {
				name: name.to_string(),
			});
		}
		Ok(bytes)
	}
}

/// Writes each named asset into `dir` unless every one of them is already there.
///
/// Returns the paths that were written. An empty list means nothing needed
/// extracting.
pub async fn ensure_binaries(
	dir: &Path,
	names: &[&str],
	source: &dyn AssetSource,
) -> Result<Vec<PathBuf>, AssetError> {
	if names.is_empty() {
		return Ok(Vec::new());
	}

	let mut all_present = true;
	for name in names {
		if !tokio::fs::try_exists(dir.join(name)).await.unwrap_or(false) {
			all_present = false;
			break;
		}
	}
	if all_present {
		debug!(dir = %dir.display(), "bundled binaries already present");
		return Ok(Vec::new());
	}

	tokio::fs::create_dir_all(dir)
		.await
		.map_err(|source| AssetError::Write {
			path: dir.to_path_buf(),
			source,
		})?;

	let mut written = Vec::with_capacity(names.len());
	for name in names {
		let bytes = source.read_asset(name)?;
		let path = dir.join(name);
		tokio::fs::write(&path, bytes)
			.await
			.map_err(|source| AssetError::Write {
				path: path.clone(),
				source,
			})?;
		written.push(path);
	}

	info!(dir = %dir.display(), count = written.len(), "extracted bundled binaries");
	Ok(written)
}
