// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Process-wide configuration. Loading it is an external
//! collaborator's job — this module only defines
//! the shape and the one piece of derived logic the core needs at handshake
//! time: the effective tap name for a peer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::ids::{NodeId, OverlayId, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverlayType {
  Tincan,
  Tunnel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
  #[serde(rename = "Type")]
  pub kind: OverlayType,
  #[serde(rename = "TapName")]
  pub tap_name: String,
  #[serde(rename = "IP4", skip_serializing_if = "Option::is_none")]
  pub ip4: Option<String>,
  #[serde(rename = "MTU4", skip_serializing_if = "Option::is_none")]
  pub mtu4: Option<u32>,
  #[serde(rename = "IP4PrefixLen", skip_serializing_if = "Option::is_none")]
  pub ip4_prefix_len: Option<u8>,
  #[serde(rename = "IgnoredNetInterfaces", default)]
  pub ignored_net_interfaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
  #[serde(rename = "NodeId")]
  pub node_id: NodeId,
  #[serde(rename = "TimerInterval", with = "duration_secs")]
  pub timer_interval: Duration,
  #[serde(rename = "Stun", default)]
  pub stun: Vec<SocketAddr>,
  #[serde(rename = "Turn", default, skip_serializing_if = "Option::is_none")]
  pub turn: Option<Vec<SocketAddr>>,
  #[serde(rename = "Overlays")]
  pub overlays: HashMap<OverlayId, OverlayConfig>,
}

impl Config {
  /// Expiry horizon for incomplete links: `4 * TimerInterval`.
  pub fn link_expiry(&self) -> Duration {
    self.timer_interval * 4
  }

  /// The effective tap name bound to a tunnel with this peer.
  ///
  /// POSIX: `TapName[:8] + peer_id[:7]`, to keep interface names unique per
  /// peer without exceeding typical `IFNAMSIZ` limits. Windows: the
  /// configured name verbatim (adapter names aren't length-constrained the
  /// same way and are usually managed by the datapath's installer).
  ///
  /// The `[:8] + [:7]` truncation scheme can still collide across overlays
  /// with similar `TapName` prefixes — this
  /// function doesn't defend against that; a config loader should validate
  /// uniqueness across all configured overlays before handing this `Config`
  /// to the core.
  pub fn tap_name_for(&self, overlay: &OverlayId, peer: &PeerId) -> anyhow::Result<String> {
    let overlay_cfg = self
      .overlays
      .get(overlay)
      .ok_or_else(|| anyhow::anyhow!("unknown overlay {}", overlay))?;
    Ok(Self::derive_tap_name(&overlay_cfg.tap_name, peer))
  }

  #[cfg(unix)]
  fn derive_tap_name(configured: &str, peer: &PeerId) -> String {
    let prefix: String = configured.chars().take(8).collect();
    let peer_suffix = peer.short();
    let peer_suffix: String = peer_suffix.chars().take(7).collect();
    format!("{}{}", prefix, peer_suffix)
  }

  #[cfg(windows)]
  fn derive_tap_name(configured: &str, _peer: &PeerId) -> String {
    configured.to_string()
  }
}

mod duration_secs {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_config() -> Config {
    let mut overlays = HashMap::new();
    overlays.insert(
      OverlayId::from_raw(1),
      OverlayConfig {
        kind: OverlayType::Tincan,
        tap_name: "ipopoverlay".to_string(),
        ip4: None,
        mtu4: None,
        ip4_prefix_len: None,
        ignored_net_interfaces: Vec::new(),
      },
    );
    Config {
      node_id: NodeId::from_raw(0xA0),
      timer_interval: Duration::from_secs(10),
      stun: Vec::new(),
      turn: None,
      overlays,
    }
  }

  #[test]
  fn link_expiry_is_four_timer_intervals() {
    let cfg = sample_config();
    assert_eq!(cfg.link_expiry(), Duration::from_secs(40));
  }

  #[cfg(unix)]
  #[test]
  fn tap_name_truncates_prefix_and_appends_peer_suffix() {
    let cfg = sample_config();
    let peer = PeerId::from_raw(0xB0);
    let name = cfg.tap_name_for(&OverlayId::from_raw(1), &peer).unwrap();
    assert_eq!(name.len(), 8 + 7);
    assert!(name.starts_with("ipopover"));
  }
}
