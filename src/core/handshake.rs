// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! The 9-phase create-link handshake: phases 1A/2A/5A/6A/9A
//! drive the initiator role, 3B/4B the first half of the responder role, 7B/8B
//! the second half. Each is an `async fn` that acquires `LinkManager::state`
//! only for its synchronous mutation window and drops the guard before
//! `.await`-ing the datapath or signaling collaborator — awaitable futures
//! whose completion is signaled by the dispatch layer, rather than a literal
//! parent/child task table.
//!
//! Because a phase function simply keeps running after its `.await` instead
//! of being re-dispatched through a queue, the collision-loser path (phase 3B)
//! can tear down the loser's registry entry directly instead of writing into
//! a task-bus row that was never modeled. The loser's own in-flight
//! `create_tunnel` call does not receive a synchronous cancellation signal,
//! but the next time that call re-acquires the lock and finds its tunnel
//! gone, it surfaces `Conflict` to its own caller, which matches the
//! externally observable behaviour a losing collision should have.

use std::time::Instant;

use tracing::Instrument;

use crate::common::error::{LinkManagerError, Result};
use crate::common::ids::{LinkId, OverlayId, PeerId, TunnelId};
use crate::common::model::{CreationState, NodeData};
use crate::protocol::datapath::{CreateLinkParams, CreateTunnelParams, DatapathClient};
use crate::protocol::events::LifecycleEvent;
use crate::protocol::registry::Registries;
use crate::protocol::signaling::{InboundRemoteAction, RemoteAction, RemoteActionRequest, SignalingClient};

use super::LinkManager;

impl<D, S, I> LinkManager<D, S, I>
where
  D: DatapathClient,
  S: SignalingClient,
  I: crate::common::ids::IdGenerator,
{
  /// `LNK_CREATE_TUNNEL`. Runs phases 1A, 2A, 5A, 6A, 9A in order,
  /// or — for the asymmetric-restart case — skips straight to 2A
  /// when a tunnel already exists for `(overlay, peer)` with no link.
  pub async fn create_tunnel(&self, overlay: OverlayId, peer: PeerId) -> Result<LinkId> {
    let span = tracing::info_span!("create_tunnel", overlay = %overlay, peer = %peer);
    async move {
      let (tunnel_id, is_restart) = self.phase1a_allocate_or_reuse(overlay, peer).await?;
      let link_id: LinkId = tunnel_id.into();

      if is_restart {
        self.phase2a_restart_existing_link(tunnel_id, link_id, overlay, peer).await?;
      } else {
        self.phase2a_create_local_tunnel(tunnel_id, overlay, peer).await?;
      }

      let peer_reply = self.phase2a_request_link_endpoint(tunnel_id, link_id, overlay, peer).await?;

      let local_cas = self
        .phase5a_create_local_link(tunnel_id, link_id, overlay, peer_reply)
        .await?;

      self
        .phase6a_add_peer_cas(tunnel_id, link_id, overlay, peer, local_cas)
        .await?;

      Ok(link_id)
    }
    .instrument(span)
    .await
  }

  /// Phase 1A, or the asymmetric-restart shortcut: allocate a
  /// brand-new `T = L` when no tunnel exists for `(overlay, peer)`; reuse the
  /// existing tunnel id when one exists with `link == None`; otherwise the
  /// caller already has a tunnel in flight or online for this peer. The
  /// second element of the result is `true` when this is the asymmetric
  /// restart: the caller must then skip the datapath `CREATE_TUNNEL` leg
  /// entirely and reuse the descriptor still stored on the tunnel.
  async fn phase1a_allocate_or_reuse(&self, overlay: OverlayId, peer: PeerId) -> Result<(TunnelId, bool)> {
    let mut state = self.state.lock().await;
    if let Some(existing) = state.tunnel_for_peer(overlay, peer) {
      let tunnel = state
        .tunnel(existing)
        .expect("peers index and tunnels map are kept in sync under the core lock");
      if tunnel.link.is_some() {
        return Err(LinkManagerError::conflict("tunnel already exists for this overlay/peer"));
      }
      return Ok((existing, true));
    }
    let tunnel_id = self.id_generator.next_tunnel_id();
    state.create_tunnel(overlay, peer, tunnel_id, Instant::now());
    Ok((tunnel_id, false))
  }

  /// Phase 1A's asymmetric-restart leg (spec §4.3): the tunnel's descriptor
  /// from its previous session is already stored, so no datapath
  /// `CREATE_TUNNEL` is issued here — this only assigns the link record
  /// (the first assignment since the restart, so `CREATING` is published)
  /// at `A2` directly, since phase 2A's request is about to go out with the
  /// reused descriptor already in hand.
  async fn phase2a_restart_existing_link(&self, tunnel_id: TunnelId, link_id: LinkId, overlay: OverlayId, peer: PeerId) -> Result<()> {
    let mut state = self.state.lock().await;
    if !self.require_live(&state, tunnel_id) {
      return Err(LinkManagerError::conflict("tunnel superseded before restart"));
    }
    state.assign_link(tunnel_id, link_id, CreationState::A2);
    self.events.publish(LifecycleEvent::Creating {
      overlay,
      peer,
      tunnel: tunnel_id,
      link: link_id,
    });
    Ok(())
  }

  /// Phase 1A's datapath leg: publish CREATING, ask D to create the tunnel,
  /// store its descriptor.
  async fn phase2a_create_local_tunnel(&self, tunnel_id: TunnelId, overlay: OverlayId, peer: PeerId) -> Result<()> {
    let link_id: LinkId = tunnel_id.into();
    let tap_name = self
      .config
      .tap_name_for(&overlay, &peer)
      .map_err(|e| LinkManagerError::conflict(e.to_string()))?;
    let overlay_cfg = self
      .config
      .overlays
      .get(&overlay)
      .ok_or_else(|| LinkManagerError::bad_request("unknown overlay"))?
      .clone();

    {
      let mut state = self.state.lock().await;
      state.assign_link(tunnel_id, link_id, CreationState::A1);
      self.events.publish(LifecycleEvent::Creating {
        overlay,
        peer,
        tunnel: tunnel_id,
        link: link_id,
      });
    }

    let ignored = {
      let state = self.state.lock().await;
      state.ignored_tap_names(overlay)
    };

    let descriptor = self
      .datapath
      .create_tunnel(CreateTunnelParams {
        overlay_id: overlay,
        node_id: self.config.node_id,
        tunnel_id,
        link_id,
        peer_id: peer,
        stun: self.config.stun.clone(),
        turn: self.config.turn.clone(),
        overlay_type: overlay_cfg.kind,
        tap_name,
        ip4: overlay_cfg.ip4.clone(),
        mtu4: overlay_cfg.mtu4,
        ip4_prefix_len: overlay_cfg.ip4_prefix_len,
        ignored_interfaces: ignored.into_iter().collect(),
      })
      .await
      .map_err(LinkManagerError::DatapathFailure);

    let descriptor = match descriptor {
      Ok(d) => d,
      Err(err) => {
        self.rollback_incomplete(tunnel_id).await;
        return Err(err);
      }
    };

    let mut state = self.state.lock().await;
    if !self.require_live(&state, tunnel_id) {
      return Err(LinkManagerError::conflict("tunnel superseded during CREATE_TUNNEL"));
    }
    let tunnel = state.tunnel_mut(tunnel_id).expect("checked by require_live");
    tunnel.descriptor.mac = Some(descriptor.mac);
    tunnel.descriptor.tap_name = Some(descriptor.tap_name);
    tunnel.descriptor.fpr = Some(descriptor.fpr);
    Ok(())
  }

  /// Phase 2A: request B's endpoint with A's NodeData; phase 5A begins once
  /// the reply lands.
  async fn phase2a_request_link_endpoint(
    &self,
    tunnel_id: TunnelId,
    link_id: LinkId,
    overlay: OverlayId,
    peer: PeerId,
  ) -> Result<NodeData> {
    let node_data = {
      let state = self.state.lock().await;
      let tunnel = state
        .tunnel(tunnel_id)
        .ok_or_else(|| LinkManagerError::conflict("tunnel superseded before REQ_LINK_ENDPT"))?;
      NodeData {
        uid: self.local_ident(),
        mac: tunnel.descriptor.mac.clone().unwrap_or_default(),
        fpr: tunnel.descriptor.fpr.clone().unwrap_or_default(),
        cas: None,
      }
    };

    let reply = self
      .signaling
      .remote_action(RemoteActionRequest {
        overlay_id: overlay,
        recipient_id: peer,
        action: RemoteAction::RequestLinkEndpoint,
        tunnel_id,
        link_id,
        node_data,
      })
      .await;

    let reply = match reply {
      Ok(r) => r,
      Err(err) => {
        self.rollback_incomplete(tunnel_id).await;
        return Err(LinkManagerError::SignalingFailure(err));
      }
    };

    let mut state = self.state.lock().await;
    if !self.require_live(&state, tunnel_id) {
      return Err(LinkManagerError::conflict("tunnel superseded during REQ_LINK_ENDPT"));
    }
    let tunnel = state.tunnel_mut(tunnel_id).expect("checked by require_live");
    tunnel.descriptor.peer_mac = Some(reply.node_data.mac.clone());
    if let Some(link) = tunnel.link.as_mut() {
      link.creation_state = CreationState::A2;
    }
    Ok(reply.node_data)
  }

  /// Phase 5A: ask D to finish the link using B's NodeData (including CAS).
  /// Returns the local CAS D handed back, carried by phase 6A to B.
  async fn phase5a_create_local_link(
    &self,
    tunnel_id: TunnelId,
    link_id: LinkId,
    overlay: OverlayId,
    peer_data: NodeData,
  ) -> Result<String> {
    let result = self
      .datapath
      .create_link(CreateLinkParams {
        overlay_id: overlay,
        tunnel_id,
        link_id,
        node_data: peer_data,
        tunnel_params: None,
      })
      .await;

    let result = match result {
      Ok(r) => r,
      Err(err) => {
        self.rollback_incomplete(tunnel_id).await;
        return Err(LinkManagerError::DatapathFailure(err));
      }
    };

    let mut state = self.state.lock().await;
    if !self.require_live(&state, tunnel_id) {
      return Err(LinkManagerError::conflict("tunnel superseded during local CREATE_LINK"));
    }
    let tunnel = state.tunnel_mut(tunnel_id).expect("checked by require_live");
    tunnel.descriptor.mac = Some(result.mac);
    tunnel.descriptor.fpr = Some(result.fpr);
    if let Some(link) = tunnel.link.as_mut() {
      link.creation_state = CreationState::A3;
    }
    Ok(result.cas)
  }

  /// Phase 6A: send B `ADD_PEER_CAS` with A's `{MAC, FPR, CAS}`; phase 9A
  /// completes the upstream call once B's reply lands.
  async fn phase6a_add_peer_cas(
    &self,
    tunnel_id: TunnelId,
    link_id: LinkId,
    overlay: OverlayId,
    peer: PeerId,
    local_cas: String,
  ) -> Result<()> {
    let node_data = {
      let mut state = self.state.lock().await;
      if !self.require_live(&state, tunnel_id) {
        return Err(LinkManagerError::conflict("tunnel superseded before ADD_PEER_CAS"));
      }
      if let Some(link) = state.tunnel_mut(tunnel_id).and_then(|t| t.link.as_mut()) {
        link.creation_state = CreationState::A4;
      }
      let tunnel = state.tunnel(tunnel_id).expect("checked above");
      NodeData {
        uid: self.local_ident(),
        mac: tunnel.descriptor.mac.clone().unwrap_or_default(),
        fpr: tunnel.descriptor.fpr.clone().unwrap_or_default(),
        cas: Some(local_cas),
      }
    };

    let reply = self
      .signaling
      .remote_action(RemoteActionRequest {
        overlay_id: overlay,
        recipient_id: peer,
        action: RemoteAction::AddPeerCas,
        tunnel_id,
        link_id,
        node_data,
      })
      .await;

    let _reply = match reply {
      Ok(r) => r,
      Err(err) => {
        self.rollback_incomplete(tunnel_id).await;
        return Err(LinkManagerError::SignalingFailure(err));
      }
    };

    let mut state = self.state.lock().await;
    if !self.require_live(&state, tunnel_id) {
      return Err(LinkManagerError::conflict("tunnel superseded during ADD_PEER_CAS"));
    }
    if let Some(link) = state.tunnel_mut(tunnel_id).and_then(|t| t.link.as_mut()) {
      link.creation_state = CreationState::Established;
    }
    // tunnel.state deliberately stays CREATING here: CONNECTED is only
    // published once D's LINK_STATE_UP notification confirms reachability.
    Ok(())
  }

  fn require_live(&self, state: &Registries, tunnel_id: TunnelId) -> bool {
    state.tunnel(tunnel_id).is_some()
  }

  /// Node B, phases 3B/4B: handle an inbound `LNK_REQ_LINK_ENDPT`.
  /// Performs collision arbitration before touching the datapath.
  pub async fn handle_req_link_endpt(&self, request: InboundRemoteAction) -> Result<NodeData> {
    let span = tracing::info_span!("req_link_endpt", tunnel = %request.tunnel_id, peer = %request.sender_id);
    async move {
      let overlay = request.overlay_id;
      let sender = request.sender_id;

      let tunnel_id = loop {
        let mut state = self.state.lock().await;
        match self.resolve_collision(&mut state, overlay, sender, &request.node_data) {
          Resolution::Proceed => {
            state.create_tunnel(overlay, sender, request.tunnel_id, Instant::now());
            break request.tunnel_id;
          }
          Resolution::RestartExisting(existing) => break existing,
          Resolution::RejectWinner => {
            return Err(LinkManagerError::conflict("superceeded, discard your endpoint"));
          }
          Resolution::AlreadyEstablished => {
            return Err(LinkManagerError::conflict("tunnel already exists"));
          }
          Resolution::TearDownAndRetry(loser_tunnel) => {
            drop(state);
            self.rollback_incomplete(loser_tunnel).await;
            continue;
          }
        }
      };

      {
        let mut state = self.state.lock().await;
        let link_id: LinkId = tunnel_id.into();
        state.assign_link(tunnel_id, link_id, CreationState::B1);
        self.events.publish(LifecycleEvent::Creating {
          overlay,
          peer: sender,
          tunnel: tunnel_id,
          link: link_id,
        });
      }

      let tap_name = self
        .config
        .tap_name_for(&overlay, &sender)
        .map_err(|e| LinkManagerError::conflict(e.to_string()))?;
      let overlay_cfg = self
        .config
        .overlays
        .get(&overlay)
        .ok_or_else(|| LinkManagerError::bad_request("unknown overlay"))?
        .clone();
      let ignored = {
        let state = self.state.lock().await;
        state.ignored_tap_names(overlay)
      };
      let link_id: LinkId = tunnel_id.into();

      let result = self
        .datapath
        .create_link(CreateLinkParams {
          overlay_id: overlay,
          tunnel_id,
          link_id,
          node_data: request.node_data.clone(),
          tunnel_params: Some(CreateTunnelParams {
            overlay_id: overlay,
            node_id: self.config.node_id,
            tunnel_id,
            link_id,
            peer_id: sender,
            stun: self.config.stun.clone(),
            turn: self.config.turn.clone(),
            overlay_type: overlay_cfg.kind,
            tap_name,
            ip4: overlay_cfg.ip4.clone(),
            mtu4: overlay_cfg.mtu4,
            ip4_prefix_len: overlay_cfg.ip4_prefix_len,
            ignored_interfaces: ignored.into_iter().collect(),
          }),
        })
        .await;

      let result = match result {
        Ok(r) => r,
        Err(err) => {
          self.rollback_incomplete(tunnel_id).await;
          return Err(LinkManagerError::DatapathFailure(err));
        }
      };

      let mut state = self.state.lock().await;
      if !self.require_live(&state, tunnel_id) {
        return Err(LinkManagerError::conflict("tunnel superseded during local CREATE_LINK"));
      }
      let tunnel = state.tunnel_mut(tunnel_id).expect("checked by require_live");
      tunnel.descriptor.mac = Some(result.mac.clone());
      tunnel.descriptor.fpr = Some(result.fpr.clone());
      tunnel.descriptor.peer_mac = Some(request.node_data.mac.clone());
      if let Some(tap_name) = result.tap_name.clone() {
        tunnel.descriptor.tap_name = Some(tap_name);
      }
      if let Some(link) = tunnel.link.as_mut() {
        link.creation_state = CreationState::B2;
      }

      Ok(NodeData {
        uid: self.local_ident(),
        mac: result.mac,
        fpr: result.fpr,
        cas: None,
      })
    }
    .instrument(span)
    .await
  }

  /// Node B, phases 7B/8B: handle an inbound `LNK_ADD_PEER_CAS`. An unknown
  /// or already-superseded tunnel/link returns `Stale` immediately with no
  /// mutation, instead of logging a discard and mutating anyway.
  pub async fn handle_add_peer_cas(&self, request: InboundRemoteAction) -> Result<NodeData> {
    let tunnel_id = request.tunnel_id;
    let link_id: LinkId = request.link_id;

    let (overlay, local_mac, local_fpr) = {
      let state = self.state.lock().await;
      let tunnel = state.tunnel(tunnel_id).ok_or(LinkManagerError::Stale(link_id))?;
      let in_b2 = matches!(
        tunnel.link.as_ref().map(|l| l.creation_state),
        Some(CreationState::B2)
      );
      if !in_b2 {
        return Err(LinkManagerError::Stale(link_id));
      }
      (
        tunnel.overlay_id,
        tunnel.descriptor.mac.clone().unwrap_or_default(),
        tunnel.descriptor.fpr.clone().unwrap_or_default(),
      )
    };

    let result = self
      .datapath
      .create_link(CreateLinkParams {
        overlay_id: overlay,
        tunnel_id,
        link_id,
        node_data: request.node_data.clone(),
        tunnel_params: None,
      })
      .await;

    let _result = match result {
      Ok(r) => r,
      Err(err) => {
        self.rollback_incomplete(tunnel_id).await;
        return Err(LinkManagerError::DatapathFailure(err));
      }
    };

    let mut state = self.state.lock().await;
    if !self.require_live(&state, tunnel_id) {
      return Err(LinkManagerError::Stale(link_id));
    }
    if let Some(link) = state.tunnel_mut(tunnel_id).and_then(|t| t.link.as_mut()) {
      link.creation_state = CreationState::Established;
    }

    // Phase 8B: idempotent echo of phase 4B's NodeData.
    Ok(NodeData {
      uid: self.local_ident(),
      mac: local_mac,
      fpr: local_fpr,
      cas: None,
    })
  }

  fn resolve_collision(
    &self,
    state: &mut Registries,
    overlay: OverlayId,
    sender: PeerId,
    sender_data: &NodeData,
  ) -> Resolution {
    let existing = state.tunnel_for_peer(overlay, sender);
    let existing = match existing {
      None => return Resolution::Proceed,
      Some(t) => t,
    };
    let tunnel = state.tunnel(existing).expect("indexed tunnel must exist");
    match tunnel.link.as_ref().map(|l| l.creation_state) {
      None => Resolution::RestartExisting(existing),
      Some(cs) if cs.is_complete() => Resolution::AlreadyEstablished,
      Some(_) => {
        let remote_peer_lexical = sender_data.uid.clone();
        let local_node_lexical = self.local_ident();
        if remote_peer_lexical < local_node_lexical {
          Resolution::TearDownAndRetry(existing)
        } else {
          Resolution::RejectWinner
        }
      }
    }
  }
}

enum Resolution {
  Proceed,
  RestartExisting(TunnelId),
  RejectWinner,
  AlreadyEstablished,
  TearDownAndRetry(TunnelId),
}
