// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A mock implementation of the [`HomeserverConnection`] trait, which never
//! talks to a real homeserver. Only useful in tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use anyhow::bail;
use serde_json::Value;

use crate::{Presence, PurgeBound, PurgeStatus, StateEvent};

struct PurgeJob {
    room_id: String,
    /// Number of status polls left before the job reports `complete`
    polls_left: usize,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, PurgeJob>,
    next_purge_id: usize,
    active: usize,
    max_active: usize,
    submissions: Vec<String>,
    rejected_rooms: HashSet<String>,
    calls: Vec<String>,

    aliases: HashMap<String, String>,
    room_state: HashMap<String, Vec<StateEvent>>,
    power_levels: HashMap<String, Value>,
    created_rooms: Vec<String>,

    presence: HashMap<String, Presence>,
    kicked: Vec<(String, String)>,
}

/// A mock connection to a Matrix homeserver
pub struct HomeserverConnection {
    homeserver: String,
    /// How many status polls a freshly submitted purge stays `active` for
    polls_until_complete: usize,
    inner: Mutex<Inner>,
}

impl HomeserverConnection {
    /// Create a new mock connection for the given server name
    #[must_use]
    pub fn new(homeserver: impl Into<String>) -> Self {
        Self {
            homeserver: homeserver.into(),
            polls_until_complete: 1,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Make freshly submitted purges stay active for this many status polls
    #[must_use]
    pub fn with_polls_until_complete(mut self, polls: usize) -> Self {
        self.polls_until_complete = polls;
        self
    }

    /// Make purge submissions for the given room be rejected
    pub fn reject_room(&self, room_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .rejected_rooms
            .insert(room_id.to_owned());
    }

    /// Register an alias pointing at a room, making it joinable
    pub fn set_alias(&self, alias: &str, room_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .aliases
            .insert(alias.to_owned(), room_id.to_owned());
    }

    /// Set the state returned for a room
    pub fn set_room_state(&self, room_id: &str, state: Vec<StateEvent>) {
        self.inner
            .lock()
            .unwrap()
            .room_state
            .insert(room_id.to_owned(), state);
    }

    /// Set the power levels returned for a room
    pub fn set_power_levels_content(&self, room_id: &str, content: Value) {
        self.inner
            .lock()
            .unwrap()
            .power_levels
            .insert(room_id.to_owned(), content);
    }

    /// Set the presence returned for a user
    pub fn set_presence(&self, user_id: &str, presence: &str, last_active_ago: Option<i64>) {
        self.inner.lock().unwrap().presence.insert(
            user_id.to_owned(),
            Presence {
                presence: presence.to_owned(),
                last_active_ago,
            },
        );
    }

    /// Highest number of purge jobs that were in flight at the same time
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().unwrap().max_active
    }

    /// Rooms for which a purge was accepted, in submission order
    #[must_use]
    pub fn submissions(&self) -> Vec<String> {
        self.inner.lock().unwrap().submissions.clone()
    }

    /// Users kicked so far, as (room, user) pairs
    #[must_use]
    pub fn kicked(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().kicked.clone()
    }

    /// Rooms created so far
    #[must_use]
    pub fn created_rooms(&self) -> Vec<String> {
        self.inner.lock().unwrap().created_rooms.clone()
    }

    /// Every trait call made on this mock, in order
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }
}

#[async_trait::async_trait]
impl crate::HomeserverConnection for HomeserverConnection {
    async fn purge_history(
        &self,
        room_id: &str,
        _bound: &PurgeBound,
    ) -> Result<Option<String>, anyhow::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("purge_history {room_id}"));

        if inner.rejected_rooms.contains(room_id) {
            return Ok(None);
        }

        inner.next_purge_id += 1;
        let purge_id = format!("purge-{}", inner.next_purge_id);
        inner.jobs.insert(
            purge_id.clone(),
            PurgeJob {
                room_id: room_id.to_owned(),
                polls_left: self.polls_until_complete,
            },
        );
        inner.submissions.push(room_id.to_owned());
        inner.active += 1;
        inner.max_active = inner.max_active.max(inner.active);

        Ok(Some(purge_id))
    }

    async fn purge_history_status(&self, purge_id: &str) -> Result<PurgeStatus, anyhow::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("purge_history_status {purge_id}"));

        let Some(job) = inner.jobs.get_mut(purge_id) else {
            bail!("unknown purge job {purge_id}");
        };

        if job.polls_left > 0 {
            job.polls_left -= 1;
            return Ok(PurgeStatus::Active);
        }

        let room_id = job.room_id.clone();
        inner.jobs.remove(purge_id);
        inner.active -= 1;
        inner.calls.push(format!("purge_complete {room_id}"));
        Ok(PurgeStatus::Complete)
    }

    async fn join_room(&self, room_id_or_alias: &str) -> Result<String, anyhow::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("join_room {room_id_or_alias}"));

        if let Some(room_id) = inner.aliases.get(room_id_or_alias) {
            return Ok(room_id.clone());
        }
        if room_id_or_alias.starts_with('!') {
            return Ok(room_id_or_alias.to_owned());
        }
        bail!("no room with alias {room_id_or_alias}");
    }

    async fn create_room(
        &self,
        alias_localpart: &str,
        power_level_content_override: &Value,
    ) -> Result<String, anyhow::Error> {
        let homeserver = self.homeserver.clone();
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("create_room {alias_localpart}"));

        let room_id = format!("!{alias_localpart}:{homeserver}");
        let alias = format!("#{alias_localpart}:{homeserver}");
        inner.aliases.insert(alias, room_id.clone());
        inner
            .power_levels
            .insert(room_id.clone(), power_level_content_override.clone());
        inner.created_rooms.push(room_id.clone());
        Ok(room_id)
    }

    async fn room_state(&self, room_id: &str) -> Result<Vec<StateEvent>, anyhow::Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.room_state.get(room_id).cloned().unwrap_or_default())
    }

    async fn get_power_levels(&self, room_id: &str) -> Result<Value, anyhow::Error> {
        let inner = self.inner.lock().unwrap();
        match inner.power_levels.get(room_id) {
            Some(content) => Ok(content.clone()),
            None => bail!("no power levels for {room_id}"),
        }
    }

    async fn set_power_levels(&self, room_id: &str, content: &Value) -> Result<(), anyhow::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("set_power_levels {room_id}"));
        inner
            .power_levels
            .insert(room_id.to_owned(), content.clone());
        Ok(())
    }

    async fn set_room_alias(&self, room_id: &str, alias: &str) -> Result<(), anyhow::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("set_room_alias {alias}"));
        inner.aliases.insert(alias.to_owned(), room_id.to_owned());
        Ok(())
    }

    async fn remove_room_alias(&self, alias: &str) -> Result<(), anyhow::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("remove_room_alias {alias}"));
        inner.aliases.remove(alias);
        Ok(())
    }

    async fn get_presence(&self, user_id: &str) -> Result<Presence, anyhow::Error> {
        let inner = self.inner.lock().unwrap();
        match inner.presence.get(user_id) {
            Some(presence) => Ok(presence.clone()),
            None => bail!("no presence for {user_id}"),
        }
    }

    async fn kick_user(
        &self,
        room_id: &str,
        user_id: &str,
        _reason: &str,
    ) -> Result<(), anyhow::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("kick_user {room_id} {user_id}"));
        inner.kicked.push((room_id.to_owned(), user_id.to_owned()));
        Ok(())
    }
}
