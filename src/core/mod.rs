// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Task dispatch and the `LinkManager` object that owns the
//! core's registries, lock, and collaborator handles.
//!
//! Every public method here is a dispatch entrypoint for one of the
//! inbound actions this crate exposes (or, for `handle_*`, a peer-originated
//! action relayed by the signaling transport). Each holds `state` only for
//! synchronous registry mutation and always drops the guard before
//! `.await`-ing a collaborator call — handlers must not perform synchronous
//! I/O while holding the lock, which sidesteps the need for
//! a reentrant mutex: a handler that must "re-enter" after an inline
//! collaborator round-trip (the collision-arbitration path in
//! `core::handshake`) does so by simply continuing its own `async fn` after
//! the `.await`, rather than recursively re-acquiring a held lock.

pub mod handshake;
pub mod health;
pub mod teardown;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::common::config::Config;
use crate::common::error::{LinkManagerError, Result};
use crate::common::ids::{IdGenerator, LinkId, OverlayId, PeerId, RandomIdGenerator, TunnelId};
use crate::common::model::TunnelState;
use crate::protocol::datapath::DatapathClient;
use crate::protocol::events::{EventPublisher, LifecycleEvent, TunnelInfo};
use crate::protocol::registry::Registries;
use crate::protocol::signaling::SignalingClient;

/// Selects a tunnel for `LNK_REMOVE_TUNNEL`: either by the
/// (overlay, peer) pair or directly by tunnel id.
#[derive(Debug, Clone, Copy)]
pub enum TunnelSelector {
  ByPeer { overlay: OverlayId, peer: PeerId },
  ById(TunnelId),
}

/// Selects a link for `LNK_REMOVE_LINK`: by (overlay, peer), by
/// owning tunnel, or directly by link id.
#[derive(Debug, Clone, Copy)]
pub enum LinkSelector {
  ByPeer { overlay: OverlayId, peer: PeerId },
  ByTunnel(TunnelId),
  ByLink(LinkId),
}

pub struct LinkManager<D, S, I = RandomIdGenerator> {
  pub(crate) state: Mutex<Registries>,
  pub(crate) config: Arc<Config>,
  pub(crate) datapath: Arc<D>,
  pub(crate) signaling: Arc<S>,
  pub(crate) events: EventPublisher,
  pub(crate) id_generator: Arc<I>,
}

impl<D, S, I> LinkManager<D, S, I>
where
  D: DatapathClient,
  S: SignalingClient,
  I: IdGenerator,
{
  pub fn new(config: Arc<Config>, datapath: Arc<D>, signaling: Arc<S>, id_generator: Arc<I>) -> Self {
    let registries = Registries::new(config.overlays.keys().copied());
    Self {
      state: Mutex::new(registries),
      config,
      datapath,
      signaling,
      events: EventPublisher::default(),
      id_generator,
    }
  }

  pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<LifecycleEvent> {
    self.events.subscribe()
  }

  /// This node's identifier in `NodeData::uid` form.
  pub(crate) fn local_ident(&self) -> crate::common::model::NodeIdent {
    self.config.node_id.to_string()
  }

  /// `LNK_ADD_IGN_INF`: records interface names the datapath should never
  /// treat as an ICE candidate for a given overlay.
  pub async fn add_ignored_interfaces(&self, interfaces: HashMap<OverlayId, Vec<String>>) {
    let mut state = self.state.lock().await;
    for (overlay, names) in interfaces {
      state.add_ignored_interfaces(overlay, names);
    }
  }

  /// `LNK_QUERY_TUNNEL_INFO`: stats for every ONLINE tunnel.
  pub async fn query_tunnel_info(&self) -> HashMap<TunnelId, TunnelInfo> {
    let state = self.state.lock().await;
    state
      .all_tunnels()
      .filter(|t| t.state == TunnelState::Online)
      .filter_map(|t| {
        let link = t.link.as_ref()?;
        let mac = t.descriptor.mac.clone()?;
        let peer_mac = t.descriptor.peer_mac.clone()?;
        Some((
          t.tunnel_id,
          TunnelInfo {
            overlay_id: t.overlay_id,
            peer_id: t.peer_id,
            stats: link.stats.clone(),
            mac,
            peer_mac,
          },
        ))
      })
      .collect()
  }

  pub(crate) fn resolve_tunnel_selector(&self, state: &Registries, selector: TunnelSelector) -> Result<TunnelId> {
    match selector {
      TunnelSelector::ById(id) => Ok(id),
      TunnelSelector::ByPeer { overlay, peer } => state
        .tunnel_for_peer(overlay, peer)
        .ok_or_else(|| LinkManagerError::bad_request("no tunnel for that overlay/peer")),
    }
  }

  pub(crate) fn resolve_link_selector(&self, state: &Registries, selector: LinkSelector) -> Result<(TunnelId, LinkId)> {
    let tunnel_id = match selector {
      LinkSelector::ByLink(link_id) => {
        return state
          .tunnel_for_link(link_id)
          .map(|t| (t, link_id))
          .ok_or_else(|| LinkManagerError::bad_request("no tunnel for that link"));
      }
      LinkSelector::ByTunnel(id) => id,
      LinkSelector::ByPeer { overlay, peer } => state
        .tunnel_for_peer(overlay, peer)
        .ok_or_else(|| LinkManagerError::bad_request("no tunnel for that overlay/peer"))?,
    };
    let link_id = state
      .link_id_for_tunnel(tunnel_id)
      .ok_or_else(|| LinkManagerError::bad_request("tunnel has no active link"))?;
    Ok((tunnel_id, link_id))
  }
}
