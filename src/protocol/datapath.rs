// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! The datapath engine boundary (`D`): an external collaborator
//! that owns tap devices and runs ICE/DTLS. Out of scope for this crate — this
//! module only defines the interface, mirroring how snocat's
//! `common/protocol/traits.rs` defines `TunnelRegistry`/`Router`/`Service` as
//! `Downcast`-free object-safe traits returning `BoxFuture`s rather than
//! `async fn` (so they remain usable as `Arc<dyn DatapathClient>`).

use std::collections::HashMap;

use futures::future::BoxFuture;

use crate::common::ids::{LinkId, OverlayId, PeerId, TunnelId};
use crate::common::model::{LinkStatus, NodeData};

#[derive(Debug, Clone)]
pub struct CreateTunnelParams {
  pub overlay_id: OverlayId,
  pub node_id: crate::common::ids::NodeId,
  pub tunnel_id: TunnelId,
  pub link_id: LinkId,
  pub peer_id: PeerId,
  pub stun: Vec<std::net::SocketAddr>,
  pub turn: Option<Vec<std::net::SocketAddr>>,
  pub overlay_type: crate::common::config::OverlayType,
  pub tap_name: String,
  pub ip4: Option<String>,
  pub mtu4: Option<u32>,
  pub ip4_prefix_len: Option<u8>,
  pub ignored_interfaces: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TunnelDescriptor {
  pub mac: String,
  pub tap_name: String,
  pub fpr: String,
}

#[derive(Debug, Clone)]
pub struct CreateLinkParams {
  pub overlay_id: OverlayId,
  pub tunnel_id: TunnelId,
  pub link_id: LinkId,
  pub node_data: NodeData,
  /// Present when this call also establishes the virtual interface (node B's
  /// first `CREATE_LINK`, or any call made without a prior `CREATE_TUNNEL`);
  /// absent for node A's phase-5 call, which targets an interface the
  /// earlier `CREATE_TUNNEL` already made.
  pub tunnel_params: Option<CreateTunnelParams>,
}

#[derive(Debug, Clone)]
pub struct CreateLinkResult {
  pub mac: String,
  pub fpr: String,
  pub cas: String,
  /// Present only when `CreateLinkParams::tunnel_params` was `Some` — i.e.
  /// this call also bootstrapped the tap device, not just the ICE link.
  pub tap_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LinkStatsEntry {
  pub status: LinkStatus,
  pub ice_role: Option<String>,
  pub stats: HashMap<String, String>,
}

pub type LinkStatsResponse = HashMap<TunnelId, HashMap<LinkId, LinkStatsEntry>>;

#[derive(Debug, Clone)]
pub struct RemoveTunnelParams {
  pub overlay_id: OverlayId,
  pub tunnel_id: TunnelId,
  pub peer_id: PeerId,
}

#[derive(Debug, Clone)]
pub struct RemoveLinkParams {
  pub overlay_id: OverlayId,
  pub tunnel_id: TunnelId,
  pub link_id: LinkId,
  pub peer_id: PeerId,
}

/// A link-state change pushed asynchronously by the datapath, independent of
/// any request/response the core initiated (`TCI_TINCAN_MSG_NOTIFY`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkStateChange {
  Down,
  Up,
}

#[derive(Debug, Copy, Clone)]
pub struct LinkStateNotification {
  pub link_id: LinkId,
  pub change: LinkStateChange,
}

pub type DatapathResult<T> = anyhow::Result<T>;

/// Out-of-scope external collaborator: tunnel/link creation,
/// teardown, stats query. Implementations talk to the real datapath process;
/// tests supply an in-memory fake (see `tests/support.rs`).
pub trait DatapathClient: Send + Sync {
  fn create_tunnel(&self, params: CreateTunnelParams) -> BoxFuture<'_, DatapathResult<TunnelDescriptor>>;

  fn create_link(&self, params: CreateLinkParams) -> BoxFuture<'_, DatapathResult<CreateLinkResult>>;

  fn query_link_stats(&self, tunnel_ids: Vec<TunnelId>) -> BoxFuture<'_, DatapathResult<LinkStatsResponse>>;

  fn remove_tunnel(&self, params: RemoveTunnelParams) -> BoxFuture<'_, DatapathResult<()>>;

  fn remove_link(&self, params: RemoveLinkParams) -> BoxFuture<'_, DatapathResult<()>>;
}
