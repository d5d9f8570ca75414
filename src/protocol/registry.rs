// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! In-memory indices for tunnels, links, peers, and per-overlay ignored
//! interface names. All mutations here are synchronous and are
//! only ever called while the core's lock (`crate::core::LinkManager::state`)
//! is held, so none of these methods take their own lock — tagged record
//! types plus id-keyed maps as the only dynamic containers, generalized from
//! snocat's `InMemoryTunnelRegistry` (`common/protocol/traits.rs`) which
//! serializes the same kind of registry mutation behind a single lock.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::common::ids::{LinkId, OverlayId, PeerId, TunnelId};
use crate::common::model::{CreationState, Link, Tunnel};

#[derive(Debug, Default)]
pub struct Registries {
  tunnels: HashMap<TunnelId, Tunnel>,
  links: HashMap<LinkId, TunnelId>,
  peers: HashMap<OverlayId, HashMap<PeerId, TunnelId>>,
  ignored_interfaces: HashMap<OverlayId, HashSet<String>>,
}

impl Registries {
  pub fn new(overlays: impl IntoIterator<Item = OverlayId>) -> Self {
    let mut peers = HashMap::new();
    for overlay in overlays {
      peers.insert(overlay, HashMap::new());
    }
    Self {
      tunnels: HashMap::new(),
      links: HashMap::new(),
      peers,
      ignored_interfaces: HashMap::new(),
    }
  }

  pub fn tunnel(&self, tunnel_id: TunnelId) -> Option<&Tunnel> {
    self.tunnels.get(&tunnel_id)
  }

  pub fn tunnel_mut(&mut self, tunnel_id: TunnelId) -> Option<&mut Tunnel> {
    self.tunnels.get_mut(&tunnel_id)
  }

  pub fn tunnel_for_peer(&self, overlay: OverlayId, peer: PeerId) -> Option<TunnelId> {
    self.peers.get(&overlay).and_then(|p| p.get(&peer)).copied()
  }

  pub fn tunnel_for_link(&self, link_id: LinkId) -> Option<TunnelId> {
    self.links.get(&link_id).copied()
  }

  pub fn link_id_for_tunnel(&self, tunnel_id: TunnelId) -> Option<LinkId> {
    self.tunnels.get(&tunnel_id).and_then(|t| t.link.as_ref()).map(|l| l.link_id)
  }

  pub fn all_tunnels(&self) -> impl Iterator<Item = &Tunnel> {
    self.tunnels.values()
  }

  /// Creates a brand-new tunnel record and indexes it by (overlay, peer).
  /// Callers must have already verified no tunnel exists for that pair
  /// (at most one tunnel per (overlay, peer) pair).
  pub fn create_tunnel(&mut self, overlay: OverlayId, peer: PeerId, tunnel_id: TunnelId, now: Instant) {
    self
      .peers
      .entry(overlay)
      .or_insert_with(HashMap::new)
      .insert(peer, tunnel_id);
    self.tunnels.insert(tunnel_id, Tunnel::new(overlay, peer, tunnel_id, now));
  }

  /// Sets `tunnels[T].link = {L, creation_state, ..}` and `links[L] = T`.
  /// Required before publishing any CREATING event.
  pub fn assign_link(&mut self, tunnel_id: TunnelId, link_id: LinkId, creation_state: CreationState) {
    if let Some(tunnel) = self.tunnels.get_mut(&tunnel_id) {
      tunnel.link = Some(Link::new(link_id, creation_state));
    }
    self.links.insert(link_id, tunnel_id);
  }

  /// Drops `links[L]`, clears `tunnels[T].link`, sets state OFFLINE. Does not
  /// remove the tunnel itself.
  pub fn remove_link_from_tunnel(&mut self, tunnel_id: TunnelId) {
    if let Some(tunnel) = self.tunnels.get_mut(&tunnel_id) {
      if let Some(link) = tunnel.link.take() {
        self.links.remove(&link.link_id);
      }
      tunnel.state = crate::common::model::TunnelState::Offline;
    }
  }

  /// Removes the tunnel from `tunnels` and from `peers[O][P]`. Callers must
  /// have already dropped the link back-reference (or the tunnel had no
  /// link) — this never touches `links`.
  ///
  /// Idempotent: calling this twice for the same id is a no-op the second
  /// time: at most one tunnel may exist per (overlay, peer) pair.
  pub fn cleanup_removed_tunnel(&mut self, tunnel_id: TunnelId) -> Option<Tunnel> {
    let tunnel = self.tunnels.remove(&tunnel_id)?;
    if let Some(peers) = self.peers.get_mut(&tunnel.overlay_id) {
      peers.remove(&tunnel.peer_id);
    }
    Some(tunnel)
  }

  /// The union of every current tunnel's tap name plus this overlay's
  /// explicitly ignored interfaces — handed to the datapath so
  /// it never ICE-candidates its own or a sibling overlay's tap.
  pub fn ignored_tap_names(&self, overlay: OverlayId) -> HashSet<String> {
    let mut names: HashSet<String> = self
      .tunnels
      .values()
      .filter_map(|t| t.descriptor.tap_name.clone())
      .collect();
    if let Some(extra) = self.ignored_interfaces.get(&overlay) {
      names.extend(extra.iter().cloned());
    }
    names
  }

  pub fn add_ignored_interfaces(&mut self, overlay: OverlayId, interfaces: impl IntoIterator<Item = String>) {
    self
      .ignored_interfaces
      .entry(overlay)
      .or_insert_with(HashSet::new)
      .extend(interfaces);
  }
}
