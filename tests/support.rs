// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! In-memory fakes for the two external collaborators (spec §1): a datapath
//! that fabricates deterministic descriptors/CAS values instead of running
//! ICE, and a signaling hub that routes `remote_action` calls directly
//! between two in-process `LinkManager`s instead of going over a transport.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use linkmgr::common::config::{Config, OverlayConfig, OverlayType};
use linkmgr::common::ids::{NodeId, OverlayId, PeerId};
use linkmgr::protocol::datapath::{
  CreateLinkParams, CreateLinkResult, CreateTunnelParams, DatapathClient, DatapathResult, LinkStatsResponse,
  RemoveLinkParams, RemoveTunnelParams, TunnelDescriptor,
};
use linkmgr::protocol::signaling::{InboundRemoteAction, RemoteAction, RemoteActionReply, RemoteActionRequest, SignalingClient, SignalingResult};
use linkmgr::LinkManager;
use tokio::sync::Mutex;

pub type TestLinkManager = LinkManager<FakeDatapath, Hub>;

pub fn overlay(name_prefix: &str) -> (OverlayId, OverlayConfig) {
  (
    OverlayId::from_raw(1),
    OverlayConfig {
      kind: OverlayType::Tincan,
      tap_name: name_prefix.to_string(),
      ip4: None,
      mtu4: None,
      ip4_prefix_len: None,
      ignored_net_interfaces: Vec::new(),
    },
  )
}

pub fn config_for(node: NodeId, timer_interval: Duration) -> Config {
  let (overlay_id, overlay_cfg) = overlay("ipop");
  let mut overlays = HashMap::new();
  overlays.insert(overlay_id, overlay_cfg);
  Config {
    node_id: node,
    timer_interval,
    stun: Vec::<SocketAddr>::new(),
    turn: None,
    overlays,
  }
}

/// Fabricates a descriptor/CAS deterministically from the node identity and
/// tunnel/link id, so assertions can check them without needing real ICE.
pub struct FakeDatapath {
  pub node: NodeId,
  pub stats_queue: Mutex<VecDeque<LinkStatsResponse>>,
}

impl FakeDatapath {
  pub fn new(node: NodeId) -> Self {
    Self { node, stats_queue: Mutex::new(VecDeque::new()) }
  }

  pub async fn push_stats(&self, response: LinkStatsResponse) {
    self.stats_queue.lock().await.push_back(response);
  }
}

impl DatapathClient for FakeDatapath {
  fn create_tunnel(&self, params: CreateTunnelParams) -> BoxFuture<'_, DatapathResult<TunnelDescriptor>> {
    Box::pin(async move {
      Ok(TunnelDescriptor {
        mac: format!("mac-{}-{}", self.node, params.tunnel_id.short()),
        tap_name: params.tap_name,
        fpr: format!("fpr-{}", self.node),
      })
    })
  }

  fn create_link(&self, params: CreateLinkParams) -> BoxFuture<'_, DatapathResult<CreateLinkResult>> {
    Box::pin(async move {
      let tap_name = params.tunnel_params.as_ref().map(|p| p.tap_name.clone());
      Ok(CreateLinkResult {
        mac: format!("mac-{}-{}", self.node, params.tunnel_id.short()),
        fpr: format!("fpr-{}", self.node),
        cas: format!("cas-{}-{}", self.node, params.link_id.short()),
        tap_name,
      })
    })
  }

  fn query_link_stats(&self, _tunnel_ids: Vec<linkmgr::common::ids::TunnelId>) -> BoxFuture<'_, DatapathResult<LinkStatsResponse>> {
    Box::pin(async move { Ok(self.stats_queue.lock().await.pop_front().unwrap_or_default()) })
  }

  fn remove_tunnel(&self, _params: RemoveTunnelParams) -> BoxFuture<'_, DatapathResult<()>> {
    Box::pin(async { Ok(()) })
  }

  fn remove_link(&self, _params: RemoveLinkParams) -> BoxFuture<'_, DatapathResult<()>> {
    Box::pin(async { Ok(()) })
  }
}

/// Routes `remote_action` calls between registered peers, standing in for
/// the signaling transport (spec §1).
#[derive(Default)]
pub struct Hub {
  peers: Mutex<HashMap<PeerId, Weak<TestLinkManager>>>,
}

impl Hub {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub async fn register(&self, peer_id: PeerId, manager: &Arc<TestLinkManager>) {
    self.peers.lock().await.insert(peer_id, Arc::downgrade(manager));
  }
}

impl SignalingClient for Hub {
  fn remote_action(&self, request: RemoteActionRequest) -> BoxFuture<'_, SignalingResult<RemoteActionReply>> {
    Box::pin(async move {
      let recipient = {
        let peers = self.peers.lock().await;
        peers
          .get(&request.recipient_id)
          .and_then(Weak::upgrade)
          .ok_or_else(|| anyhow::anyhow!("peer {} not registered with signaling hub", request.recipient_id))?
      };
      // The sender's identity is its NodeId, which shares representation
      // with PeerId — the real transport would carry this out-of-band;
      // here we just reparse the hex string already on the wire.
      let sender_id: PeerId = request.node_data.uid.parse().expect("NodeIdent is hex-rendered NodeId");
      let inbound = InboundRemoteAction {
        overlay_id: request.overlay_id,
        sender_id,
        action: request.action.clone(),
        tunnel_id: request.tunnel_id,
        link_id: request.link_id,
        node_data: request.node_data,
      };
      let node_data = match request.action {
        RemoteAction::RequestLinkEndpoint => recipient.handle_req_link_endpt(inbound).await?,
        RemoteAction::AddPeerCas => recipient.handle_add_peer_cas(inbound).await?,
      };
      Ok(RemoteActionReply { action: request.action, node_data })
    })
  }
}
