// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Lifecycle event publication, generalized from the
//! `tunnel_connected` / `tunnel_authenticated` / `tunnel_disconnected`
//! broadcast channels on snocat's `ModularDaemon` (`server/modular.rs`) into
//! a single `LNK_TUNNEL_EVENTS` topic carrying a tagged enum.

use std::collections::HashMap;
use std::time::SystemTime;

use tokio::sync::broadcast;

use crate::common::ids::{LinkId, OverlayId, PeerId, TunnelId};

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
  Creating {
    overlay: OverlayId,
    peer: PeerId,
    tunnel: TunnelId,
    link: LinkId,
  },
  Connected {
    overlay: OverlayId,
    peer: PeerId,
    tunnel: TunnelId,
    link: LinkId,
    tap_name: String,
    mac: String,
    peer_mac: String,
    connected_ts: SystemTime,
  },
  Disconnected {
    overlay: OverlayId,
    peer: PeerId,
    tunnel: TunnelId,
    link: LinkId,
    tap_name: String,
  },
  Removed {
    overlay: OverlayId,
    peer: PeerId,
    tunnel: TunnelId,
    link: LinkId,
    tap_name: Option<String>,
  },
}

impl LifecycleEvent {
  pub fn tunnel_id(&self) -> TunnelId {
    match self {
      LifecycleEvent::Creating { tunnel, .. }
      | LifecycleEvent::Connected { tunnel, .. }
      | LifecycleEvent::Disconnected { tunnel, .. }
      | LifecycleEvent::Removed { tunnel, .. } => *tunnel,
    }
  }
}

/// Fire-and-forget publisher for the `LNK_TUNNEL_EVENTS` topic. Dropping or
/// lagging subscribers never blocks the core — `broadcast::Sender::send`
/// only fails when there are zero receivers, which we treat as "nobody's
/// listening right now" rather than an error.
#[derive(Clone)]
pub struct EventPublisher {
  sender: broadcast::Sender<LifecycleEvent>,
}

impl EventPublisher {
  pub fn new(capacity: usize) -> Self {
    let (sender, _) = broadcast::channel(capacity);
    Self { sender }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
    self.sender.subscribe()
  }

  pub fn publish(&self, event: LifecycleEvent) {
    // A send error just means there are currently no subscribers; that's
    // expected and not worth logging at more than trace level.
    if self.sender.send(event).is_err() {
      tracing::trace!("published lifecycle event with no active subscribers");
    }
  }
}

impl Default for EventPublisher {
  fn default() -> Self {
    Self::new(256)
  }
}

/// Per-tunnel stats snapshot handed back from `LNK_QUERY_TUNNEL_INFO`
/// for ONLINE tunnels only.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TunnelInfo {
  pub overlay_id: OverlayId,
  pub peer_id: PeerId,
  pub stats: HashMap<String, String>,
  pub mac: String,
  pub peer_mac: String,
}
