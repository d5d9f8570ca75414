// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Opaque 128-bit identifiers used throughout the link manager.
//!
//! All ids are rendered as lowercase hex, matching the wire representation
//! used by the signaling transport and the datapath engine (which both speak
//! the hex form over their own RPC boundaries, external to this crate).

use std::fmt;
use std::str::FromStr;

macro_rules! opaque_id {
  ($name:ident) => {
    #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct $name(u128);

    impl $name {
      pub const fn from_raw(value: u128) -> Self {
        Self(value)
      }

      pub const fn raw(&self) -> u128 {
        self.0
      }

      /// First `len` hex characters, for log lines that only want a short prefix.
      pub fn short(&self) -> String {
        let full = self.to_string();
        full[..7.min(full.len())].to_string()
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
      }
    }

    impl fmt::Debug for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", stringify!($name), self)
      }
    }

    impl FromStr for $name {
      type Err = std::num::ParseIntError;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16).map(Self)
      }
    }

    impl serde::Serialize for $name {
      fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
      where
        S: serde::Serializer,
      {
        serializer.collect_str(self)
      }
    }

    impl<'de> serde::Deserialize<'de> for $name {
      fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
      where
        D: serde::Deserializer<'de>,
      {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
      }
    }
  };
}

opaque_id!(NodeId);
opaque_id!(OverlayId);
opaque_id!(PeerId);
opaque_id!(TunnelId);
opaque_id!(LinkId);

/// A `TunnelId` and `LinkId` are the same value at creation time (per the data
/// model's identifier rule); this helper makes that relationship explicit at
/// call sites instead of silently copying the raw `u128`.
impl From<TunnelId> for LinkId {
  fn from(tunnel_id: TunnelId) -> Self {
    LinkId::from_raw(tunnel_id.raw())
  }
}

impl From<LinkId> for TunnelId {
  fn from(link_id: LinkId) -> Self {
    TunnelId::from_raw(link_id.raw())
  }
}

/// Produces new tunnel/link ids. Swappable so tests can supply deterministic
/// sequences instead of `rand`'s true randomness.
///
/// Mirrors the `TunnelIDGenerator` seam snocat exposes on its
/// server daemon (`server/modular.rs`), generalized from a monotonic counter
/// to this crate's opaque 128-bit ids.
pub trait IdGenerator: Send + Sync {
  fn next_tunnel_id(&self) -> TunnelId;
}

#[derive(Debug, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
  fn next_tunnel_id(&self) -> TunnelId {
    TunnelId::from_raw(rand::random())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn renders_as_lowercase_hex() {
    let id = TunnelId::from_raw(0xABCDEF);
    assert_eq!(id.to_string(), format!("{:032x}", 0xABCDEFu128));
    assert!(id.to_string().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
  }

  #[test]
  fn tunnel_and_link_id_share_raw_value() {
    let tnl = TunnelId::from_raw(42);
    let lnk: LinkId = tnl.into();
    assert_eq!(lnk.raw(), 42);
  }

  #[test]
  fn roundtrips_through_json() {
    let id = PeerId::from_raw(0x1234_5678);
    let json = serde_json::to_string(&id).unwrap();
    let back: PeerId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, back);
  }
}
