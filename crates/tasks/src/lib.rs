// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! The maintenance tasks themselves, one module per concern.
//!
//! Everything in here is written against the
//! [`mms_matrix::HomeserverConnection`] trait and the
//! [`ContainerRuntime`] trait, so the tasks can be exercised in tests
//! without a homeserver or a container daemon.

pub mod certs;
pub mod containers;
pub mod eviction;
pub mod federation;
pub mod purge;
pub mod render;
pub mod rooms;

pub use self::{
    containers::{ContainerRuntime, DockerCli},
    purge::{PurgeDispatcher, Retention},
    rooms::RoomEnsurer,
};
