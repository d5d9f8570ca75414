// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Explicit removal and handshake rollback.

use crate::common::error::{LinkManagerError, Result};
use crate::common::ids::TunnelId;
use crate::common::model::TunnelState;
use crate::protocol::datapath::{DatapathClient, RemoveLinkParams, RemoveTunnelParams};
use crate::protocol::events::LifecycleEvent;
use crate::protocol::signaling::SignalingClient;

use super::{LinkManager, LinkSelector, TunnelSelector};

impl<D, S, I> LinkManager<D, S, I>
where
  D: DatapathClient,
  S: SignalingClient,
  I: crate::common::ids::IdGenerator,
{
  /// `LNK_REMOVE_TUNNEL`. Permitted only while
  /// `state ∈ {ONLINE, OFFLINE}`; a tunnel mid-handshake fails `Busy`.
  pub async fn remove_tunnel(&self, selector: TunnelSelector) -> Result<()> {
    let (tunnel_id, overlay, peer) = {
      let state = self.state.lock().await;
      let tunnel_id = self.resolve_tunnel_selector(&state, selector)?;
      let tunnel = state.tunnel(tunnel_id).expect("resolved by resolve_tunnel_selector");
      if !matches!(tunnel.state, TunnelState::Online | TunnelState::Offline) {
        return Err(LinkManagerError::Busy);
      }
      (tunnel_id, tunnel.overlay_id, tunnel.peer_id)
    };

    if let Err(err) = self.datapath.remove_tunnel(RemoveTunnelParams { overlay_id: overlay, tunnel_id, peer_id: peer }).await {
      // D's "unknown" response is authoritative deletion, not an error we
      // need to surface; the core still removes its local record either way
      // ("idempotent cleanup" per the removal contract).
      tracing::debug!(%tunnel_id, error = %err, "datapath reported failure removing tunnel, cleaning up locally anyway");
    }

    let mut state = self.state.lock().await;
    let link_id = state.link_id_for_tunnel(tunnel_id);
    state.remove_link_from_tunnel(tunnel_id);
    let removed = state.cleanup_removed_tunnel(tunnel_id);
    drop(state);

    if let (Some(tunnel), Some(link_id)) = (removed, link_id) {
      self.events.publish(LifecycleEvent::Removed {
        overlay,
        peer,
        tunnel: tunnel_id,
        link: link_id,
        tap_name: tunnel.descriptor.tap_name,
      });
    }
    Ok(())
  }

  /// `LNK_REMOVE_LINK`. Symmetric to `remove_tunnel` but
  /// leaves the tunnel record alive, OFFLINE, awaiting a future `CREATE_TUNNEL`
  /// restart (the asymmetric-restart case).
  pub async fn remove_link(&self, selector: LinkSelector) -> Result<()> {
    let (tunnel_id, link_id, overlay, peer) = {
      let state = self.state.lock().await;
      let (tunnel_id, link_id) = self.resolve_link_selector(&state, selector)?;
      let tunnel = state.tunnel(tunnel_id).expect("resolved by resolve_link_selector");
      if !matches!(tunnel.state, TunnelState::Online | TunnelState::Offline) {
        return Err(LinkManagerError::Busy);
      }
      (tunnel_id, link_id, tunnel.overlay_id, tunnel.peer_id)
    };

    if let Err(err) = self.datapath.remove_link(RemoveLinkParams { overlay_id: overlay, tunnel_id, link_id, peer_id: peer }).await {
      tracing::debug!(%link_id, error = %err, "datapath reported failure removing link, cleaning up locally anyway");
    }

    let mut state = self.state.lock().await;
    let tap_name = state.tunnel(tunnel_id).and_then(|t| t.descriptor.tap_name.clone());
    state.remove_link_from_tunnel(tunnel_id);
    drop(state);

    self.events.publish(LifecycleEvent::Removed { overlay, peer, tunnel: tunnel_id, link: link_id, tap_name });
    Ok(())
  }

  /// Rollback on handshake failure: issues `REMOVE_TUNNEL` for a
  /// still-incomplete link and cleans up the registries. A no-op if the
  /// tunnel already vanished (superseded by a collision, already rolled back
  /// by a concurrent caller, or never created) or if its link already
  /// finished the handshake — an established link's teardown goes through
  /// `remove_tunnel`/`force_cleanup`, not this one.
  pub(crate) async fn rollback_incomplete(&self, tunnel_id: TunnelId) {
    let (overlay, peer) = {
      let state = self.state.lock().await;
      match state.tunnel(tunnel_id) {
        Some(tunnel) if tunnel.is_link_incomplete() => (tunnel.overlay_id, tunnel.peer_id),
        _ => return,
      }
    };
    self.cleanup_tunnel(tunnel_id, overlay, peer).await;
  }

  /// Unconditional cleanup for a tunnel the datapath has reported UNKNOWN:
  /// D has already forgotten it, regardless of whether its link
  /// ever finished the handshake, so this skips `rollback_incomplete`'s
  /// incomplete-only guard.
  pub(crate) async fn force_cleanup(&self, tunnel_id: TunnelId) {
    let (overlay, peer) = {
      let state = self.state.lock().await;
      match state.tunnel(tunnel_id) {
        Some(tunnel) => (tunnel.overlay_id, tunnel.peer_id),
        None => return,
      }
    };
    self.cleanup_tunnel(tunnel_id, overlay, peer).await;
  }

  async fn cleanup_tunnel(&self, tunnel_id: TunnelId, overlay: crate::common::ids::OverlayId, peer: crate::common::ids::PeerId) {
    if let Err(err) = self.datapath.remove_tunnel(RemoveTunnelParams { overlay_id: overlay, tunnel_id, peer_id: peer }).await {
      tracing::debug!(%tunnel_id, error = %err, "cleanup's REMOVE_TUNNEL failed, cleaning up locally anyway");
    }

    let mut state = self.state.lock().await;
    let link_id = state.link_id_for_tunnel(tunnel_id);
    state.remove_link_from_tunnel(tunnel_id);
    let removed = state.cleanup_removed_tunnel(tunnel_id);
    drop(state);

    if let (Some(tunnel), Some(link_id)) = (removed, link_id) {
      self.events.publish(LifecycleEvent::Removed {
        overlay,
        peer,
        tunnel: tunnel_id,
        link: link_id,
        tap_name: tunnel.descriptor.tap_name,
      });
    }
  }
}
