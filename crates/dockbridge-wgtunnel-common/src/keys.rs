// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::secret::{SecretString, REDACTED};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

#[derive(Error, Debug)]
pub enum KeyError {
	#[error("invalid key length: expected 32 bytes, got {0}")]
	InvalidLength(usize),

	#[error("invalid base64 encoding: {0}")]
	InvalidBase64(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, KeyError>;

fn decode_key(s: &str) -> Result<[u8; 32]> {
	let bytes = STANDARD.decode(s.trim())?;
	if bytes.len() != 32 {
		return Err(KeyError::InvalidLength(bytes.len()));
	}
	let mut arr = [0u8; 32];
	arr.copy_from_slice(&bytes);
	Ok(arr)
}

/// Curve25519 private key in the padded base64 form `wg` and tunnel configs use.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct WgPrivateKey {
	bytes: [u8; 32],
}

impl WgPrivateKey {
	pub fn generate() -> Self {
		let secret = StaticSecret::random_from_rng(OsRng);
		Self {
			bytes: secret.to_bytes(),
		}
	}

	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self { bytes }
	}

	pub fn from_base64(s: &str) -> Result<Self> {
		Ok(Self {
			bytes: decode_key(s)?,
		})
	}

	pub fn to_base64(&self) -> SecretString {
		SecretString::new(STANDARD.encode(self.bytes))
	}

	pub fn public_key(&self) -> WgPublicKey {
		let secret = StaticSecret::from(self.bytes);
		WgPublicKey {
			bytes: *PublicKey::from(&secret).as_bytes(),
		}
	}
}

impl fmt::Debug for WgPrivateKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WgPrivateKey")
			.field("bytes", &REDACTED)
			.finish()
	}
}

impl fmt::Display for WgPrivateKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl Serialize for WgPrivateKey {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		serializer.serialize_str(REDACTED)
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WgPublicKey {
	bytes: [u8; 32],
}

impl WgPublicKey {
	pub fn from_base64(s: &str) -> Result<Self> {
		Ok(Self {
			bytes: decode_key(s)?,
		})
	}

	pub fn to_base64(&self) -> String {
		STANDARD.encode(self.bytes)
	}

	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.bytes
	}
}

impl fmt::Debug for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let b64 = self.to_base64();
		f.debug_struct("WgPublicKey")
			.field("prefix", &format!("{}...", &b64[..8]))
			.finish()
	}
}

impl fmt::Display for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_base64())
	}
}

impl Serialize for WgPublicKey {
	fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_base64())
	}
}

#[derive(Clone)]
pub struct WgKeyPair {
	private: WgPrivateKey,
	public: WgPublicKey,
}

impl WgKeyPair {
	pub fn generate() -> Self {
		Self::from_private_key(WgPrivateKey::generate())
	}

	pub fn from_private_key(private: WgPrivateKey) -> Self {
		let public = private.public_key();
		Self { private, public }
	}

	pub fn private_key(&self) -> &WgPrivateKey {
		&self.private
	}

	pub fn public_key(&self) -> &WgPublicKey {
		&self.public
	}
}

impl fmt::Debug for WgKeyPair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WgKeyPair")
			.field("private", &self.private)
			.field("public", &self.public)
			.finish()
	}
}
