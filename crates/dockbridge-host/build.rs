// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stages the bundled WireGuard binaries into OUT_DIR for `include_bytes!`.
//!
//! Binaries are read from `DOCKBRIDGE_ASSET_DIR` when set, otherwise from
//! `assets/bin`. A missing binary becomes an empty placeholder so non-Windows
//! builds and CI work without them.

use std::path::PathBuf;

const BUNDLED: &[&str] = &["wg.exe", "wireguard.exe"];

fn main() {
	println!("cargo:rerun-if-env-changed=DOCKBRIDGE_ASSET_DIR");
	println!("cargo:rerun-if-changed=assets/bin/");

	let asset_dir = std::env::var_os("DOCKBRIDGE_ASSET_DIR")
		.map(PathBuf::from)
		.unwrap_or_else(|| PathBuf::from("assets/bin"));
	let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR not set"));

	for name in BUNDLED {
		let src = asset_dir.join(name);
		let dst = out_dir.join(name);
		println!("cargo:rerun-if-changed={}", src.display());

		if src.is_file() {
			std::fs::copy(&src, &dst).expect("Failed to copy bundled binary");
		} else {
			println!(
				"cargo:warning={name} not found in {}, bundling an empty placeholder",
				asset_dir.display()
			);
			std::fs::write(&dst, []).expect("Failed to write placeholder binary");
		}
	}
}
