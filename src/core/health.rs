// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Periodic stats polling, reachability recheck, and the expiry sweep.
//! `health_tick` is meant to be driven by an external timer loop (out of
//! scope for this crate); `on_link_state_notification` is driven by the
//! datapath's own asynchronous push channel.

use std::time::Instant;

use crate::common::ids::{LinkId, TunnelId};
use crate::common::model::{LinkStatus, TunnelState};
use crate::protocol::datapath::{DatapathClient, LinkStateChange, LinkStateNotification, LinkStatsResponse};
use crate::protocol::events::LifecycleEvent;
use crate::protocol::signaling::SignalingClient;

use super::LinkManager;

impl<D, S, I> LinkManager<D, S, I>
where
  D: DatapathClient,
  S: SignalingClient,
  I: crate::common::ids::IdGenerator,
{
  /// One tick of the health monitor's periodic timer: sweep
  /// expired incomplete links, then batch-query stats for every established
  /// tunnel.
  pub async fn health_tick(&self) {
    self.expiry_sweep().await;

    let established: Vec<TunnelId> = {
      let state = self.state.lock().await;
      state
        .all_tunnels()
        .filter(|t| t.is_link_complete())
        .map(|t| t.tunnel_id)
        .collect()
    };
    if established.is_empty() {
      return;
    }

    match self.datapath.query_link_stats(established).await {
      Ok(response) => self.on_link_stats(response).await,
      Err(err) => tracing::warn!(error = %err, "TCI_QUERY_LINK_STATS failed"),
    }
  }

  /// Expiry sweep: any tunnel whose link
  /// has sat incomplete longer than `4 * TimerInterval` is rolled back.
  async fn expiry_sweep(&self) {
    let expiry = self.config.link_expiry();
    let now = Instant::now();
    let expired: Vec<TunnelId> = {
      let state = self.state.lock().await;
      state
        .all_tunnels()
        .filter(|t| t.is_link_incomplete() && now.duration_since(t.created_at) > expiry)
        .map(|t| t.tunnel_id)
        .collect()
    };
    for tunnel_id in expired {
      tracing::debug!(%tunnel_id, "link expired, rolling back");
      self.rollback_incomplete(tunnel_id).await;
    }
  }

  /// Applies a `TCI_QUERY_LINK_STATS` response: UNKNOWN tears the
  /// tunnel down unconditionally (D has already forgotten it, whether or not
  /// its handshake ever finished), OFFLINE drives the retry counter, ONLINE
  /// refreshes stats and resets it.
  pub async fn on_link_stats(&self, response: LinkStatsResponse) {
    let mut to_rollback = Vec::new();
    let mut to_force_cleanup = Vec::new();
    let mut to_disconnect = Vec::new();

    {
      let mut state = self.state.lock().await;
      for (tunnel_id, links) in response {
        for (link_id, entry) in links {
          if state.link_id_for_tunnel(tunnel_id) != Some(link_id) {
            // Stale report for a link this tunnel no longer owns.
            continue;
          }
          match entry.status {
            LinkStatus::Unknown => to_force_cleanup.push(tunnel_id),
            LinkStatus::Offline => {
              let was_creating = state.tunnel(tunnel_id).map(|t| t.state == TunnelState::Creating).unwrap_or(false);
              let was_querying = state.tunnel(tunnel_id).map(|t| t.state == TunnelState::Querying).unwrap_or(false);
              let retry = state
                .tunnel(tunnel_id)
                .and_then(|t| t.link.as_ref())
                .map(|l| l.status_retry)
                .unwrap_or(0);

              if retry >= 2 && was_creating {
                to_rollback.push(tunnel_id);
              } else if retry >= 1 && was_querying {
                if let Some(tunnel) = state.tunnel_mut(tunnel_id) {
                  tunnel.state = TunnelState::Offline;
                  to_disconnect.push((tunnel_id, link_id, tunnel.overlay_id, tunnel.peer_id, tunnel.descriptor.tap_name.clone()));
                }
              } else if let Some(link) = state.tunnel_mut(tunnel_id).and_then(|t| t.link.as_mut()) {
                link.status_retry += 1;
              }
            }
            LinkStatus::Online => {
              if let Some(tunnel) = state.tunnel_mut(tunnel_id) {
                tunnel.state = TunnelState::Online;
                if let Some(link) = tunnel.link.as_mut() {
                  link.ice_role = entry.ice_role.clone();
                  link.stats = entry.stats.clone();
                  link.status_retry = 0;
                }
              }
            }
          }
        }
      }
    }

    for tunnel_id in to_rollback {
      self.rollback_incomplete(tunnel_id).await;
    }
    for tunnel_id in to_force_cleanup {
      self.force_cleanup(tunnel_id).await;
    }
    for (tunnel_id, link_id, overlay, peer, tap_name) in to_disconnect {
      self.events.publish(LifecycleEvent::Disconnected {
        overlay,
        peer,
        tunnel: tunnel_id,
        link: link_id,
        tap_name: tap_name.unwrap_or_default(),
      });
    }
  }

  /// Handles an asynchronous `LINK_STATE_DOWN` / `LINK_STATE_UP` push from
  /// the datapath. `Down` schedules an immediate stats query
  /// rather than waiting for the next tick, since a dropped link is worth
  /// confirming sooner.
  pub async fn on_link_state_notification(&self, notification: LinkStateNotification) {
    let link_id = notification.link_id;
    match notification.change {
      LinkStateChange::Down => {
        let tunnel_id = {
          let mut state = self.state.lock().await;
          let tunnel_id = match state.tunnel_for_link(link_id) {
            Some(id) => id,
            None => return,
          };
          if let Some(tunnel) = state.tunnel_mut(tunnel_id) {
            tunnel.state = TunnelState::Querying;
          }
          tunnel_id
        };
        match self.datapath.query_link_stats(vec![tunnel_id]).await {
          Ok(response) => self.on_link_stats(response).await,
          Err(err) => tracing::warn!(%link_id, error = %err, "stats requery after LINK_STATE_DOWN failed"),
        }
      }
      LinkStateChange::Up => self.on_link_up(link_id).await,
    }
  }

  async fn on_link_up(&self, link_id: LinkId) {
    let connect_info = {
      let mut state = self.state.lock().await;
      let tunnel_id = match state.tunnel_for_link(link_id) {
        Some(id) => id,
        None => return,
      };
      let was_querying = state.tunnel(tunnel_id).map(|t| t.state == TunnelState::Querying).unwrap_or(false);
      let tunnel = match state.tunnel_mut(tunnel_id) {
        Some(t) => t,
        None => return,
      };
      tunnel.state = TunnelState::Online;
      if was_querying {
        // Suppress a duplicate CONNECTED: this UP just confirms a session
        // the handshake already reported connected once.
        if let Some(link) = tunnel.link.as_mut() {
          link.status_retry = 0;
        }
        None
      } else {
        Some((
          tunnel_id,
          tunnel.overlay_id,
          tunnel.peer_id,
          tunnel.descriptor.tap_name.clone().unwrap_or_default(),
          tunnel.descriptor.mac.clone().unwrap_or_default(),
          tunnel.descriptor.peer_mac.clone().unwrap_or_default(),
        ))
      }
    };

    if let Some((tunnel_id, overlay, peer, tap_name, mac, peer_mac)) = connect_info {
      self.events.publish(LifecycleEvent::Connected {
        overlay,
        peer,
        tunnel: tunnel_id,
        link: link_id,
        tap_name,
        mac,
        peer_mac,
        connected_ts: std::time::SystemTime::now(),
      });
    }
  }
}
