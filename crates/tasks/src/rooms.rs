// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Provisioning of the public broadcast rooms across a federation.
//!
//! Every deployment runs this against the same ordered list of known
//! servers, which keeps room creation race-free: only the first server of
//! the list ever creates a room, every other server joins it through
//! federation and points its server-local alias at it.

use std::collections::{BTreeMap, HashSet};

use anyhow::bail;
use mms_matrix::{HomeserverConnection, StateEvent};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Power level required for regular users
const PL_USER: i64 = 0;
/// Power level required for moderation actions
const PL_MODERATOR: i64 = 50;
/// Power level granted to the per-server admin users
const PL_ADMINISTRATOR: i64 = 100;

/// What the ensurer found out about a room on one server
#[derive(Debug, Clone)]
struct RoomInfo {
    room_id: String,
    aliases: HashSet<String>,
}

/// Reconciles the broadcast rooms across the known servers.
///
/// Holds one logged-in connection per reachable server; servers that could
/// not be reached are simply absent and reported as offline.
pub struct RoomEnsurer<C> {
    username: String,
    own_server_name: String,
    known_servers: Vec<String>,
    connections: BTreeMap<String, C>,
}

impl<C: HomeserverConnection> RoomEnsurer<C> {
    /// Create an ensurer.
    ///
    /// `known_servers` is the full ordered server list; `connections` maps
    /// the subset of reachable server names to their connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the server list is empty or if the own server is
    /// not among the reachable ones.
    pub fn new(
        username: String,
        own_server_name: String,
        known_servers: Vec<String>,
        connections: BTreeMap<String, C>,
    ) -> Result<Self, anyhow::Error> {
        if known_servers.is_empty() {
            bail!("the known servers list is empty");
        }
        if !connections.contains_key(&own_server_name) {
            bail!("not connected to own server {own_server_name}");
        }

        debug!(
            own_server_name,
            first_server_name = known_servers[0],
            connected = connections.len(),
            "Room ensurer initialized"
        );

        Ok(Self {
            username,
            own_server_name,
            known_servers,
            connections,
        })
    }

    fn first_server_name(&self) -> &str {
        &self.known_servers[0]
    }

    fn is_first_server(&self) -> bool {
        self.own_server_name == self.first_server_name()
    }

    fn own_connection(&self) -> &C {
        &self.connections[&self.own_server_name]
    }

    /// Ensure every given broadcast room exists, is federated and carries
    /// the right aliases and power levels.
    ///
    /// Failures on one alias don't stop the others; if any alias failed an
    /// error is returned at the end.
    ///
    /// # Errors
    ///
    /// Returns an error if one or more rooms could not be ensured.
    pub async fn ensure_rooms(&self, aliases: &[String]) -> Result<(), anyhow::Error> {
        let mut failed = 0;
        for alias in aliases {
            info!(room_alias = alias, "Ensuring room");
            if let Err(error) = self.ensure_room(alias).await {
                warn!(
                    room_alias = alias,
                    error = &*error as &dyn std::error::Error,
                    "Error while ensuring room"
                );
                failed += 1;
            }
        }

        if failed > 0 {
            bail!("failed to ensure {failed} out of {} rooms", aliases.len());
        }
        Ok(())
    }

    async fn ensure_room(&self, alias_localpart: &str) -> Result<(), anyhow::Error> {
        self.first_server_actions(alias_localpart).await?;

        let mut room_infos: BTreeMap<String, Option<RoomInfo>> = BTreeMap::new();
        for server_name in &self.known_servers {
            room_infos.insert(
                server_name.clone(),
                self.get_room(server_name, alias_localpart).await,
            );
        }

        // The reference room is the first one found, in server list order
        let reference = self
            .known_servers
            .iter()
            .find_map(|server_name| room_infos.get(server_name).cloned().flatten());
        let Some(reference) = reference else {
            warn!("No server carries the room yet and we are not first. Doing nothing.");
            return Ok(());
        };

        let offline_servers: Vec<&str> = room_infos
            .iter()
            .filter(|(_, info)| info.is_none())
            .map(|(server_name, _)| server_name.as_str())
            .collect();
        let all_rooms_available = offline_servers.is_empty();
        if !all_rooms_available {
            warn!(
                ?offline_servers,
                "Could not find the room on all servers. Those cannot be ensured."
            );
        }

        let all_rooms_the_same = room_infos
            .values()
            .flatten()
            .all(|info| info.room_id == reference.room_id);
        if !all_rooms_the_same {
            warn!(
                alias_prefix = alias_localpart,
                expected = reference.room_id,
                "Room id mismatch between servers"
            );
        }

        if all_rooms_available && all_rooms_the_same {
            info!("Room state ok.");
            return Ok(());
        }

        let own_room_info = room_infos.get(&self.own_server_name).cloned().flatten();
        let own_server_room_alias = format!("#{alias_localpart}:{}", self.own_server_name);
        let first_server_room_alias = format!("#{alias_localpart}:{}", self.first_server_name());

        match &own_room_info {
            None => {
                warn!(
                    server_name = self.own_server_name,
                    room_id = reference.room_id,
                    new_room_alias = own_server_room_alias,
                    "Room missing on own server, adding alias"
                );
                self.join_and_alias_room(&first_server_room_alias, &own_server_room_alias)
                    .await?;
                info!(alias = own_server_room_alias, "Room alias set");
            }
            Some(own) if own.room_id != reference.room_id => {
                warn!(
                    server_name = self.own_server_name,
                    expected_room_id = reference.room_id,
                    current_room_id = own.room_id,
                    "Conflicting local room, reassigning alias"
                );
                self.own_connection()
                    .remove_room_alias(&own_server_room_alias)
                    .await?;
                self.join_and_alias_room(&first_server_room_alias, &own_server_room_alias)
                    .await?;
                info!(
                    alias = own_server_room_alias,
                    room_id = reference.room_id,
                    "Room alias updated"
                );
            }
            Some(_) => {
                warn!("Mismatching rooms on other servers. Doing nothing.");
            }
        }

        self.ensure_admin_power_levels(own_room_info.as_ref()).await;

        Ok(())
    }

    /// Create the room if we are the first server of the list and no room
    /// exists there yet.
    async fn first_server_actions(&self, alias_localpart: &str) -> Result<(), anyhow::Error> {
        if !self.is_first_server() {
            return Ok(());
        }

        let room_info = self.get_room(self.first_server_name(), alias_localpart).await;
        if room_info.is_none() {
            info!(server_name = self.own_server_name, "Creating room");
            let room_id = self
                .own_connection()
                .create_room(alias_localpart, &self.server_power_levels())
                .await?;
            info!(room_id, "Room created. Waiting for other servers to join.");
        }

        Ok(())
    }

    /// Join the room behind the server-local alias and collect its id and
    /// alias set; `None` if the server is unreachable or the room is absent.
    async fn get_room(&self, server_name: &str, alias_localpart: &str) -> Option<RoomInfo> {
        let connection = self.connections.get(server_name)?;

        let room_alias_local = format!("#{alias_localpart}:{server_name}");
        let room_id = match connection.join_room(&room_alias_local).await {
            Ok(room_id) => room_id,
            Err(_) => {
                debug!(room_alias = room_alias_local, "Room doesn't exist");
                return None;
            }
        };

        let state = connection.room_state(&room_id).await.ok()?;
        let aliases = aliases_from_state(&state);
        debug!(server_name, room_id, ?aliases, "Room aliases");

        Some(RoomInfo { room_id, aliases })
    }

    async fn join_and_alias_room(
        &self,
        first_server_room_alias: &str,
        own_server_room_alias: &str,
    ) -> Result<(), anyhow::Error> {
        let own_room_id = self
            .own_connection()
            .join_room(first_server_room_alias)
            .await?;
        debug!(own_room_id, "Joined room on first server");
        self.own_connection()
            .set_room_alias(&own_room_id, own_server_room_alias)
            .await?;

        Ok(())
    }

    /// The power level content every broadcast room is supposed to carry:
    /// one admin user per known server, plus our own user.
    fn server_power_levels(&self) -> Value {
        let mut users = serde_json::Map::new();
        for server_name in &self.known_servers {
            let localpart = format!("admin-{server_name}").replace(':', "-");
            users.insert(
                format!("@{localpart}:{server_name}"),
                json!(PL_ADMINISTRATOR),
            );
        }
        users.insert(
            format!("@{}:{}", self.username, self.own_server_name),
            json!(PL_ADMINISTRATOR),
        );

        json!({
            "users": users,
            "users_default": PL_USER,
            "events": {
                "m.room.power_levels": PL_ADMINISTRATOR,
                "m.room.history_visibility": PL_ADMINISTRATOR,
            },
            "events_default": PL_USER,
            "state_default": PL_MODERATOR,
            "ban": PL_MODERATOR,
            "kick": PL_MODERATOR,
            "redact": PL_MODERATOR,
            "invite": PL_MODERATOR,
        })
    }

    /// Grant the per-server admin users their power levels, if our own user
    /// is in a position to do so. Best-effort: failures are logged only.
    async fn ensure_admin_power_levels(&self, room_info: Option<&RoomInfo>) {
        let Some(room_info) = room_info else { return };

        info!(room_aliases = ?room_info.aliases, "Ensuring power levels");
        let connection = self.own_connection();
        let own_user = format!("@{}:{}", self.username, self.own_server_name);
        let supposed = self.server_power_levels();

        let Ok(mut current) = connection.get_power_levels(&room_info.room_id).await else {
            debug!(room_aliases = ?room_info.aliases, "Could not fetch power levels");
            return;
        };

        let current_users: HashSet<String> = current["users"]
            .as_object()
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default();
        if !current_users.contains(&own_user) {
            warn!("{own_user} has not been granted administrative power levels yet. Doing nothing.");
            return;
        }

        // The supposed users can be a subset of the current ones, because
        // providers who left cannot be removed by other admins
        let supposed_users: HashSet<String> = supposed["users"]
            .as_object()
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default();
        if supposed_users.is_subset(&current_users) {
            debug!("Power levels are up to date. Doing nothing.");
            return;
        }

        merge_json(&mut current, &supposed);
        if connection
            .set_power_levels(&room_info.room_id, &current)
            .await
            .is_err()
        {
            debug!(room_aliases = ?room_info.aliases, "Could not set power levels");
        }
    }
}

/// Collect every alias carried by `m.room.aliases` state events
fn aliases_from_state(state: &[StateEvent]) -> HashSet<String> {
    state
        .iter()
        .filter(|event| event.event_type == "m.room.aliases")
        .filter_map(|event| event.content["aliases"].as_array())
        .flatten()
        .filter_map(|alias| alias.as_str().map(ToOwned::to_owned))
        .collect()
}

/// Recursively merge `other` into `value`; objects merge key-wise, anything
/// else is overwritten
fn merge_json(value: &mut Value, other: &Value) {
    match (value, other) {
        (Value::Object(value), Value::Object(other)) => {
            for (key, other_value) in other {
                merge_json(value.entry(key.clone()).or_insert(Value::Null), other_value);
            }
        }
        (value, other) => *value = other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use mms_matrix::MockHomeserverConnection;

    use super::*;

    fn servers() -> Vec<String> {
        vec!["one.example.com".to_owned(), "two.example.com".to_owned()]
    }

    #[tokio::test]
    async fn first_server_creates_missing_room() {
        let mut connections = BTreeMap::new();
        connections.insert(
            "one.example.com".to_owned(),
            MockHomeserverConnection::new("one.example.com"),
        );

        let ensurer = RoomEnsurer::new(
            "admin".to_owned(),
            "one.example.com".to_owned(),
            servers(),
            connections,
        )
        .unwrap();

        ensurer
            .ensure_rooms(&["discovery".to_owned()])
            .await
            .unwrap();

        let mock = &ensurer.connections["one.example.com"];
        assert_eq!(mock.created_rooms(), &["!discovery:one.example.com"]);
    }

    #[tokio::test]
    async fn non_first_server_adds_local_alias() {
        let first = MockHomeserverConnection::new("one.example.com");
        first.set_alias("#discovery:one.example.com", "!abc:one.example.com");

        let own = MockHomeserverConnection::new("two.example.com");
        // The room is joinable through federation via the first server's
        // alias, but has no local alias yet
        own.set_alias("#discovery:one.example.com", "!abc:one.example.com");

        let mut connections = BTreeMap::new();
        connections.insert("one.example.com".to_owned(), first);
        connections.insert("two.example.com".to_owned(), own);

        let ensurer = RoomEnsurer::new(
            "admin".to_owned(),
            "two.example.com".to_owned(),
            servers(),
            connections,
        )
        .unwrap();

        ensurer
            .ensure_rooms(&["discovery".to_owned()])
            .await
            .unwrap();

        let own = &ensurer.connections["two.example.com"];
        assert!(
            own.calls()
                .contains(&"set_room_alias #discovery:two.example.com".to_owned())
        );
    }

    #[tokio::test]
    async fn nothing_to_do_when_rooms_agree() {
        let first = MockHomeserverConnection::new("one.example.com");
        first.set_alias("#discovery:one.example.com", "!abc:one.example.com");
        let own = MockHomeserverConnection::new("two.example.com");
        own.set_alias("#discovery:two.example.com", "!abc:one.example.com");

        let mut connections = BTreeMap::new();
        connections.insert("one.example.com".to_owned(), first);
        connections.insert("two.example.com".to_owned(), own);

        let ensurer = RoomEnsurer::new(
            "admin".to_owned(),
            "two.example.com".to_owned(),
            servers(),
            connections,
        )
        .unwrap();

        ensurer
            .ensure_rooms(&["discovery".to_owned()])
            .await
            .unwrap();

        let own = &ensurer.connections["two.example.com"];
        assert!(
            !own.calls()
                .iter()
                .any(|call| call.starts_with("set_room_alias"))
        );
    }

    #[tokio::test]
    async fn requires_connection_to_own_server() {
        let connections: BTreeMap<String, MockHomeserverConnection> = BTreeMap::new();
        let result = RoomEnsurer::new(
            "admin".to_owned(),
            "one.example.com".to_owned(),
            servers(),
            connections,
        );
        assert!(result.is_err());
    }

    #[test]
    fn merge_json_merges_objects_keywise() {
        let mut value = serde_json::json!({"users": {"@a:x": 100}, "ban": 50});
        let other = serde_json::json!({"users": {"@b:y": 100}});
        merge_json(&mut value, &other);

        assert_eq!(value["users"]["@a:x"], 100);
        assert_eq!(value["users"]["@b:y"], 100);
        assert_eq!(value["ban"], 50);
    }
}
