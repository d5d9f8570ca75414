// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

pub mod datapath;
pub mod events;
pub mod registry;
pub mod signaling;
