// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Link manager core for a peer-to-peer overlay networking daemon: tunnel and
//! link registries, the create-link handshake, teardown/rollback, and the
//! health monitor. The datapath engine and signaling transport are external
//! collaborators — this crate only defines the boundary traits they
//! implement (`protocol::datapath::DatapathClient`,
//! `protocol::signaling::SignalingClient`).

pub mod common;
pub mod core;
pub mod protocol;

pub use crate::core::{LinkManager, LinkSelector, TunnelSelector};
