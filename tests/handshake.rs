// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! End-to-end handshake scenarios driven through two real `LinkManager`s
//! wired together by an in-memory signaling hub, matching spec §8's literal
//! happy-path and idempotent-removal scenarios.

mod support;

use std::sync::Arc;
use std::time::Duration;

use linkmgr::common::ids::{NodeId, PeerId, RandomIdGenerator};
use linkmgr::protocol::datapath::{LinkStateChange, LinkStateNotification};
use linkmgr::protocol::events::LifecycleEvent;
use linkmgr::{LinkManager, LinkSelector, TunnelSelector};
use support::{config_for, overlay, FakeDatapath, Hub};

async fn build_pair() -> (Arc<LinkManager<FakeDatapath, Hub>>, Arc<LinkManager<FakeDatapath, Hub>>, NodeId, NodeId) {
  let node_a = NodeId::from_raw(1);
  let node_b = NodeId::from_raw(2);
  let hub = Hub::new();

  let a = Arc::new(LinkManager::new(
    Arc::new(config_for(node_a, Duration::from_secs(10))),
    Arc::new(FakeDatapath::new(node_a)),
    hub.clone(),
    Arc::new(RandomIdGenerator),
  ));
  let b = Arc::new(LinkManager::new(
    Arc::new(config_for(node_b, Duration::from_secs(10))),
    Arc::new(FakeDatapath::new(node_b)),
    hub.clone(),
    Arc::new(RandomIdGenerator),
  ));

  hub.register(PeerId::from_raw(node_a.raw()), &a).await;
  hub.register(PeerId::from_raw(node_b.raw()), &b).await;

  (a, b, node_a, node_b)
}

#[tokio::test]
async fn happy_path_reaches_established_then_connected_on_link_state_up() {
  let (a, b, node_a, node_b) = build_pair().await;
  let (overlay_id, _) = overlay("ipop");

  let mut a_events = a.subscribe_events();
  let mut b_events = b.subscribe_events();

  let link_id = a.create_tunnel(overlay_id, PeerId::from_raw(node_b.raw())).await.unwrap();

  // Both sides published CREATING as soon as their half of the handshake
  // started; neither has published CONNECTED yet (spec §8 scenario 1: that
  // only follows a later LINK_STATE_UP).
  assert!(matches!(a_events.recv().await.unwrap(), LifecycleEvent::Creating { .. }));
  assert!(matches!(b_events.recv().await.unwrap(), LifecycleEvent::Creating { .. }));
  assert!(a_events.try_recv().is_err());
  assert!(b_events.try_recv().is_err());

  let info_a = a.query_tunnel_info().await;
  assert!(info_a.is_empty(), "tunnel.state stays CREATING until LINK_STATE_UP, so it's not yet queryable as ONLINE");

  a.on_link_state_notification(LinkStateNotification { link_id, change: LinkStateChange::Up }).await;
  b.on_link_state_notification(LinkStateNotification { link_id, change: LinkStateChange::Up }).await;

  assert!(matches!(a_events.recv().await.unwrap(), LifecycleEvent::Connected { .. }));
  assert!(matches!(b_events.recv().await.unwrap(), LifecycleEvent::Connected { .. }));

  let info_a = a.query_tunnel_info().await;
  assert_eq!(info_a.len(), 1);
  let info_b = b.query_tunnel_info().await;
  assert_eq!(info_b.len(), 1);
}

#[tokio::test]
async fn remove_tunnel_is_refused_mid_handshake_and_idempotent_once_online() {
  let (a, b, _node_a, node_b) = build_pair().await;
  let (overlay_id, _) = overlay("ipop");
  let peer_b = PeerId::from_raw(node_b.raw());

  let link_id = a.create_tunnel(overlay_id, peer_b).await.unwrap();

  // Still CREATING: an explicit removal must fail Busy rather than tear down
  // a handshake in flight (spec §4.4).
  let err = a.remove_tunnel(TunnelSelector::ByPeer { overlay: overlay_id, peer: peer_b }).await.unwrap_err();
  assert!(matches!(err, linkmgr::common::error::LinkManagerError::Busy));

  a.on_link_state_notification(LinkStateNotification { link_id, change: LinkStateChange::Up }).await;

  a.remove_tunnel(TunnelSelector::ByPeer { overlay: overlay_id, peer: peer_b }).await.unwrap();
  // Removing twice is a no-op, not an error (invariant I3).
  let err = a.remove_tunnel(TunnelSelector::ByPeer { overlay: overlay_id, peer: peer_b }).await.unwrap_err();
  assert!(matches!(err, linkmgr::common::error::LinkManagerError::BadRequest(_)));

  assert!(a.query_tunnel_info().await.is_empty());
  let _ = b;
}

#[tokio::test]
async fn remove_link_leaves_tunnel_offline_for_a_future_restart() {
  let (a, b, _node_a, node_b) = build_pair().await;
  let (overlay_id, _) = overlay("ipop");
  let peer_b = PeerId::from_raw(node_b.raw());

  let link_id = a.create_tunnel(overlay_id, peer_b).await.unwrap();
  a.on_link_state_notification(LinkStateNotification { link_id, change: LinkStateChange::Up }).await;

  a.remove_link(LinkSelector::ByPeer { overlay: overlay_id, peer: peer_b }).await.unwrap();

  // The tunnel itself survives removal of its link (asymmetric-restart case,
  // spec §4.3): a second CREATE_TUNNEL reuses A's existing tunnel record
  // instead of bouncing off phase 1A's "tunnel already exists" check. B never
  // heard about the removal (this crate has no peer-facing signal for it),
  // so B's own handshake state is still Established and rejects the replay —
  // that failure arrives as a SignalingFailure, not phase 1A's local Conflict,
  // which is exactly how we can tell the reuse happened locally.
  let reused = a.create_tunnel(overlay_id, peer_b).await.unwrap_err();
  assert!(matches!(reused, linkmgr::common::error::LinkManagerError::SignalingFailure(_)));
  let _ = b;
}
