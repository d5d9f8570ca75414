// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Error kinds returned by the link manager's public API. None of these are fatal to the process; every
//! variant is recovered by either a rollback or a discard at the call site.

use crate::common::ids::{LinkId, TunnelId};

#[derive(thiserror::Error, Debug)]
pub enum LinkManagerError {
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("tunnel busy, retry operation")]
  Busy,

  #[error("datapath failure: {0}")]
  DatapathFailure(#[source] anyhow::Error),

  #[error("signaling failure: {0}")]
  SignalingFailure(#[source] anyhow::Error),

  #[error("handshake expired for tunnel {0}")]
  Expired(TunnelId),

  #[error("stale response discarded for link {0}")]
  Stale(LinkId),
}

impl LinkManagerError {
  pub fn bad_request(msg: impl Into<String>) -> Self {
    Self::BadRequest(msg.into())
  }

  pub fn conflict(msg: impl Into<String>) -> Self {
    Self::Conflict(msg.into())
  }
}

pub type Result<T> = std::result::Result<T, LinkManagerError>;
