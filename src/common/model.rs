// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Tagged record types for the entities in the data model,
//! replacing the dynamic dictionaries the original module kept them in.

use std::collections::HashMap;
use std::time::Instant;

use crate::common::ids::{LinkId, OverlayId, PeerId, TunnelId};

/// The handshake phase a link occupies. Values are grouped by role (`A*` for
/// the initiator, `B*` for the responder) and collapse to `Established` once
/// the handshake completes on either side.
///
/// The spec documents these as the single byte values `0xA1..0xA4`, `0xB1..0xB3`
/// and `0xC0`; we keep a closed enum instead (Design Note 1) since nothing in
/// this crate puts the byte on the wire — only `is_complete` and ordering
/// within a role are ever observed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CreationState {
  /// Node A: tunnel allocated, datapath create-tunnel requested.
  A1,
  /// Node A: local descriptor stored, peer endpoint requested.
  A2,
  /// Node A: peer endpoint reply received, local CREATE_LINK requested.
  A3,
  /// Node A: local CAS obtained, ADD_PEER_CAS sent to peer.
  A4,
  /// Node B: endpoint request accepted, CREATE_LINK requested from datapath.
  B1,
  /// Node B: local descriptor + peer_mac stored, reply sent to peer.
  B2,
  /// Node B: peer's CAS applied via a second CREATE_LINK.
  B3,
  /// Handshake complete on this side (`0xC0` on the wire).
  Established,
}

impl CreationState {
  pub fn is_complete(&self) -> bool {
    matches!(self, CreationState::Established)
  }

  pub fn is_incomplete(&self) -> bool {
    !self.is_complete()
  }
}

/// The quadruple exchanged between peers during the handshake. `cas` is only
/// absent on the phase-3B→4B leg (node B hasn't produced one yet when it first
/// forwards node A's data into `TCI_CREATE_LINK`).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeData {
  pub uid: NodeIdent,
  pub mac: String,
  pub fpr: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cas: Option<String>,
}

/// `NodeData::uid` is populated with either this node's id or the peer's,
/// depending on direction; kept as a thin wrapper instead of a bare `String`
/// so callers can't accidentally swap it for a `TapName` or `Fpr`.
pub type NodeIdent = String;

/// Local virtual-interface identity, populated asynchronously by the
/// datapath as the handshake progresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
  pub mac: Option<String>,
  pub tap_name: Option<String>,
  pub fpr: Option<String>,
  pub peer_mac: Option<String>,
}

/// Datapath-reported connectivity status for a link, returned from
/// `TCI_QUERY_LINK_STATS`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkStatus {
  Online,
  Offline,
  Unknown,
}

/// The transient negotiation/connectivity record inside a tunnel.
#[derive(Debug, Clone)]
pub struct Link {
  pub link_id: LinkId,
  pub creation_state: CreationState,
  pub ice_role: Option<String>,
  pub stats: HashMap<String, String>,
  pub status_retry: u8,
}

impl Link {
  pub fn new(link_id: LinkId, creation_state: CreationState) -> Self {
    Self {
      link_id,
      creation_state,
      ice_role: None,
      stats: HashMap::new(),
      status_retry: 0,
    }
  }
}

/// Tracks a tunnel's overall lifecycle independent of its link's handshake phase.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TunnelState {
  Creating,
  Querying,
  Online,
  Offline,
}

/// The durable association with one peer in one overlay.
#[derive(Debug, Clone)]
pub struct Tunnel {
  pub overlay_id: OverlayId,
  pub peer_id: PeerId,
  pub tunnel_id: TunnelId,
  pub state: TunnelState,
  pub created_at: Instant,
  pub descriptor: Descriptor,
  pub link: Option<Link>,
}

impl Tunnel {
  pub fn new(overlay_id: OverlayId, peer_id: PeerId, tunnel_id: TunnelId, created_at: Instant) -> Self {
    Self {
      overlay_id,
      peer_id,
      tunnel_id,
      state: TunnelState::Creating,
      created_at,
      descriptor: Descriptor::default(),
      link: None,
    }
  }

  pub fn is_link_incomplete(&self) -> bool {
    self.link.as_ref().map(|l| l.creation_state.is_incomplete()).unwrap_or(false)
  }

  pub fn is_link_complete(&self) -> bool {
    self.link.as_ref().map(|l| l.creation_state.is_complete()).unwrap_or(false)
  }
}
