// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! The signaling transport boundary: relays overlay-addressed
//! control messages between peers. Out of scope for this crate — only the
//! interface is defined here, following the same object-safe,
//! `BoxFuture`-returning shape as `datapath::DatapathClient`.

use futures::future::BoxFuture;

use crate::common::ids::{LinkId, OverlayId, PeerId, TunnelId};
use crate::common::model::NodeData;

/// The two remote actions this crate ever dispatches through signaling
/// (the peer-facing action table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAction {
  RequestLinkEndpoint,
  AddPeerCas,
}

#[derive(Debug, Clone)]
pub struct RemoteActionRequest {
  pub overlay_id: OverlayId,
  pub recipient_id: PeerId,
  pub action: RemoteAction,
  pub tunnel_id: TunnelId,
  pub link_id: LinkId,
  pub node_data: NodeData,
}

#[derive(Debug, Clone)]
pub struct RemoteActionReply {
  pub action: RemoteAction,
  pub node_data: NodeData,
}

/// A remote action as *delivered to this node* by the signaling transport,
/// distinct from `RemoteActionRequest` (what this node sends when it's the
/// one dialing out): the transport supplies `sender_id`, which isn't
/// something the sender addresses itself, so it has no place on the outbound
/// shape.
#[derive(Debug, Clone)]
pub struct InboundRemoteAction {
  pub overlay_id: OverlayId,
  pub sender_id: PeerId,
  pub action: RemoteAction,
  pub tunnel_id: TunnelId,
  pub link_id: LinkId,
  pub node_data: NodeData,
}

pub type SignalingResult<T> = anyhow::Result<T>;

/// Out-of-scope external collaborator: dispatches a remote action
/// to a named peer module (`RecipientCM = "LinkManager"`) and returns its
/// reply, or propagates a transport-level failure.
pub trait SignalingClient: Send + Sync {
  fn remote_action(&self, request: RemoteActionRequest) -> BoxFuture<'_, SignalingResult<RemoteActionReply>>;
}
