// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Interface to the Matrix homeserver, as used by the maintenance tasks.
//!
//! The [`HomeserverConnection`] trait is the seam between the tasks and the
//! actual homeserver; the `mms-matrix-synapse` crate implements it over the
//! Synapse HTTP API, and [`MockHomeserverConnection`] implements it in-memory
//! for tests.

mod mock;

use serde::Deserialize;
use serde_json::Value;

pub use self::mock::HomeserverConnection as MockHomeserverConnection;

/// Boundary up to which a history purge deletes events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeBound {
    /// Purge everything up to and including this event
    UpToEvent(String),

    /// Purge everything received before this timestamp, in milliseconds since
    /// the Unix epoch
    UpToTimestamp(i64),
}

/// State of a purge job as reported by the homeserver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurgeStatus {
    /// The job is still running
    Active,

    /// The job finished successfully
    Complete,

    /// The job failed
    Failed,

    /// The homeserver reported a status string we don't know about
    #[serde(other)]
    Unknown,
}

impl PurgeStatus {
    /// Whether the job is still running on the homeserver
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Presence of a user as reported by the homeserver
#[derive(Debug, Clone, Deserialize)]
pub struct Presence {
    /// The presence state, e.g. `online`, `offline` or `unavailable`
    pub presence: String,

    /// Milliseconds since the user was last active, if known
    pub last_active_ago: Option<i64>,
}

impl Presence {
    /// Whether the user is currently offline
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.presence == "offline"
    }
}

/// A state event of a room
#[derive(Debug, Clone, Deserialize)]
pub struct StateEvent {
    /// The event type, e.g. `m.room.aliases`
    #[serde(rename = "type")]
    pub event_type: String,

    /// The state key of the event
    #[serde(default)]
    pub state_key: String,

    /// The event content
    pub content: Value,
}

/// An abstraction over the Matrix client & admin API operations the
/// maintenance tasks rely on
#[async_trait::async_trait]
pub trait HomeserverConnection: Send + Sync {
    /// Submit a history purge for the given room.
    ///
    /// Returns the purge job ID on acceptance, or `None` if the homeserver
    /// rejected the submission; the room is then simply skipped for this run.
    ///
    /// # Errors
    ///
    /// Returns an error if the homeserver could not be reached.
    async fn purge_history(
        &self,
        room_id: &str,
        bound: &PurgeBound,
    ) -> Result<Option<String>, anyhow::Error>;

    /// Look up the state of a previously submitted purge job.
    ///
    /// # Errors
    ///
    /// Returns an error if the homeserver could not be reached or answered
    /// with a non-success status.
    async fn purge_history_status(&self, purge_id: &str) -> Result<PurgeStatus, anyhow::Error>;

    /// Join a room by ID or alias, returning the room ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the room could not be joined.
    async fn join_room(&self, room_id_or_alias: &str) -> Result<String, anyhow::Error>;

    /// Create a public room with the given alias localpart and power level
    /// overrides, returning the room ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the room could not be created.
    async fn create_room(
        &self,
        alias_localpart: &str,
        power_level_content_override: &Value,
    ) -> Result<String, anyhow::Error>;

    /// Fetch the full state of a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the state could not be fetched.
    async fn room_state(&self, room_id: &str) -> Result<Vec<StateEvent>, anyhow::Error>;

    /// Fetch the `m.room.power_levels` content of a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the power levels could not be fetched.
    async fn get_power_levels(&self, room_id: &str) -> Result<Value, anyhow::Error>;

    /// Replace the `m.room.power_levels` content of a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the power levels could not be updated.
    async fn set_power_levels(&self, room_id: &str, content: &Value) -> Result<(), anyhow::Error>;

    /// Point a room alias at the given room.
    ///
    /// # Errors
    ///
    /// Returns an error if the alias could not be created.
    async fn set_room_alias(&self, room_id: &str, alias: &str) -> Result<(), anyhow::Error>;

    /// Delete a room alias.
    ///
    /// # Errors
    ///
    /// Returns an error if the alias could not be deleted.
    async fn remove_room_alias(&self, alias: &str) -> Result<(), anyhow::Error>;

    /// Fetch the presence of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence could not be fetched.
    async fn get_presence(&self, user_id: &str) -> Result<Presence, anyhow::Error>;

    /// Kick a user out of a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the user could not be kicked.
    async fn kick_user(
        &self,
        room_id: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<(), anyhow::Error>;
}
