// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use anyhow::Context as _;
use http::Method;
use mms_matrix::{HomeserverConnection, Presence, PurgeBound, PurgeStatus, StateEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::error::{MatrixError, SynapseResponseExt as _};

#[derive(Clone)]
pub struct SynapseConnection {
    homeserver: String,
    endpoint: Url,
    access_token: String,
    http_client: reqwest::Client,
}

impl SynapseConnection {
    #[must_use]
    pub fn new(
        homeserver: String,
        endpoint: Url,
        access_token: String,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            homeserver,
            endpoint,
            access_token,
            http_client,
        }
    }

    /// Log in with the `m.login.password` flow and build a connection from
    /// the returned access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the login request failed or was denied.
    #[tracing::instrument(
        name = "homeserver.login",
        skip_all,
        fields(matrix.homeserver = homeserver),
        err(Debug),
    )]
    pub async fn login_with_password(
        homeserver: String,
        endpoint: Url,
        username: &str,
        password: &str,
        http_client: reqwest::Client,
    ) -> Result<Self, anyhow::Error> {
        #[derive(Serialize)]
        struct Request<'a> {
            #[serde(rename = "type")]
            login_type: &'a str,
            user: &'a str,
            password: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            access_token: String,
        }

        let body = Request {
            login_type: "m.login.password",
            user: username,
            password,
        };

        let url = endpoint
            .join("_matrix/client/r0/login")
            .map(String::from)
            .unwrap_or_default();
        let response = http_client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("Failed to send login request to the homeserver")?;

        let response = response
            .error_for_synapse_error()
            .await
            .context("Homeserver denied the login")?;

        let body: Response = response
            .json()
            .await
            .context("Failed to deserialize login response")?;

        Ok(Self::new(homeserver, endpoint, body.access_token, http_client))
    }

    fn builder(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(
                method,
                self.endpoint
                    .join(url)
                    .map(String::from)
                    .unwrap_or_default(),
            )
            .bearer_auth(&self.access_token)
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.builder(Method::POST, url)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.builder(Method::GET, url)
    }

    fn put(&self, url: &str) -> reqwest::RequestBuilder {
        self.builder(Method::PUT, url)
    }

    fn delete(&self, url: &str) -> reqwest::RequestBuilder {
        self.builder(Method::DELETE, url)
    }
}

#[derive(Deserialize)]
struct RoomIdResponse {
    room_id: String,
}

#[async_trait::async_trait]
impl HomeserverConnection for SynapseConnection {
    #[tracing::instrument(
        name = "homeserver.purge_history",
        skip_all,
        fields(
            matrix.homeserver = self.homeserver,
            matrix.room_id = room_id,
        ),
        err(Debug),
    )]
    async fn purge_history(
        &self,
        room_id: &str,
        bound: &PurgeBound,
    ) -> Result<Option<String>, anyhow::Error> {
        #[derive(Serialize)]
        struct Request<'a> {
            delete_local_events: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            purge_up_to_event_id: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            purge_up_to_ts: Option<i64>,
        }

        #[derive(Deserialize)]
        struct Response {
            purge_id: String,
        }

        let body = match bound {
            PurgeBound::UpToEvent(event_id) => Request {
                delete_local_events: true,
                purge_up_to_event_id: Some(event_id),
                purge_up_to_ts: None,
            },
            PurgeBound::UpToTimestamp(ts) => Request {
                delete_local_events: true,
                purge_up_to_event_id: None,
                purge_up_to_ts: Some(*ts),
            },
        };

        let encoded_room_id = urlencoding::encode(room_id);
        let url = format!("_matrix/client/r0/admin/purge_history/{encoded_room_id}");
        let response = self
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to submit purge to the homeserver")?;

        // A rejected submission only drops this room from the run; transport
        // failures above abort it.
        if !response.status().is_success() {
            let status = response.status();
            let matrix_error: Option<MatrixError> = response.json().await.ok();
            warn!(
                matrix.room_id = room_id,
                http.status = %status,
                matrix.errcode = matrix_error.as_ref().map(|e| e.errcode.as_str()),
                "Homeserver rejected the purge submission, skipping room"
            );
            return Ok(None);
        }

        let body: Response = response
            .json()
            .await
            .context("Failed to deserialize purge submission response")?;

        Ok(Some(body.purge_id))
    }

    #[tracing::instrument(
        name = "homeserver.purge_history_status",
        skip_all,
        fields(
            matrix.homeserver = self.homeserver,
            matrix.purge_id = purge_id,
        ),
        err(Debug),
    )]
    async fn purge_history_status(&self, purge_id: &str) -> Result<PurgeStatus, anyhow::Error> {
        #[derive(Deserialize)]
        struct Response {
            status: PurgeStatus,
        }

        let encoded_purge_id = urlencoding::encode(purge_id);
        let url = format!("_matrix/client/r0/admin/purge_history_status/{encoded_purge_id}");
        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to query purge status from the homeserver")?;

        let response = response
            .error_for_synapse_error()
            .await
            .context("Unexpected HTTP response while querying purge status")?;

        let body: Response = response
            .json()
            .await
            .context("Failed to deserialize purge status response")?;

        Ok(body.status)
    }

    #[tracing::instrument(
        name = "homeserver.join_room",
        skip_all,
        fields(
            matrix.homeserver = self.homeserver,
            matrix.room = room_id_or_alias,
        ),
        err(Debug),
    )]
    async fn join_room(&self, room_id_or_alias: &str) -> Result<String, anyhow::Error> {
        let encoded = urlencoding::encode(room_id_or_alias);
        let url = format!("_matrix/client/r0/join/{encoded}");
        let response = self
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("Failed to join room")?;

        let response = response
            .error_for_synapse_error()
            .await
            .context("Unexpected HTTP response while joining room")?;

        let body: RoomIdResponse = response
            .json()
            .await
            .context("Failed to deserialize join response")?;

        Ok(body.room_id)
    }

    #[tracing::instrument(
        name = "homeserver.create_room",
        skip_all,
        fields(
            matrix.homeserver = self.homeserver,
            matrix.room_alias = alias_localpart,
        ),
        err(Debug),
    )]
    async fn create_room(
        &self,
        alias_localpart: &str,
        power_level_content_override: &Value,
    ) -> Result<String, anyhow::Error> {
        #[derive(Serialize)]
        struct Request<'a> {
            room_alias_name: &'a str,
            visibility: &'a str,
            power_level_content_override: &'a Value,
        }

        let body = Request {
            room_alias_name: alias_localpart,
            visibility: "public",
            power_level_content_override,
        };

        let response = self
            .post("_matrix/client/r0/createRoom")
            .json(&body)
            .send()
            .await
            .context("Failed to create room")?;

        let response = response
            .error_for_synapse_error()
            .await
            .context("Unexpected HTTP response while creating room")?;

        let body: RoomIdResponse = response
            .json()
            .await
            .context("Failed to deserialize room creation response")?;

        Ok(body.room_id)
    }

    #[tracing::instrument(
        name = "homeserver.room_state",
        skip_all,
        fields(
            matrix.homeserver = self.homeserver,
            matrix.room_id = room_id,
        ),
        err(Debug),
    )]
    async fn room_state(&self, room_id: &str) -> Result<Vec<StateEvent>, anyhow::Error> {
        let encoded_room_id = urlencoding::encode(room_id);
        let url = format!("_matrix/client/r0/rooms/{encoded_room_id}/state");
        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to fetch room state")?;

        let response = response
            .error_for_synapse_error()
            .await
            .context("Unexpected HTTP response while fetching room state")?;

        let body: Vec<StateEvent> = response
            .json()
            .await
            .context("Failed to deserialize room state")?;

        Ok(body)
    }

    #[tracing::instrument(
        name = "homeserver.get_power_levels",
        skip_all,
        fields(
            matrix.homeserver = self.homeserver,
            matrix.room_id = room_id,
        ),
        err(Debug),
    )]
    async fn get_power_levels(&self, room_id: &str) -> Result<Value, anyhow::Error> {
        let encoded_room_id = urlencoding::encode(room_id);
        let url = format!("_matrix/client/r0/rooms/{encoded_room_id}/state/m.room.power_levels");
        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to fetch room power levels")?;

        let response = response
            .error_for_synapse_error()
            .await
            .context("Unexpected HTTP response while fetching room power levels")?;

        let body: Value = response
            .json()
            .await
            .context("Failed to deserialize room power levels")?;

        Ok(body)
    }

    #[tracing::instrument(
        name = "homeserver.set_power_levels",
        skip_all,
        fields(
            matrix.homeserver = self.homeserver,
            matrix.room_id = room_id,
        ),
        err(Debug),
    )]
    async fn set_power_levels(&self, room_id: &str, content: &Value) -> Result<(), anyhow::Error> {
        let encoded_room_id = urlencoding::encode(room_id);
        let url = format!("_matrix/client/r0/rooms/{encoded_room_id}/state/m.room.power_levels");
        let response = self
            .put(&url)
            .json(content)
            .send()
            .await
            .context("Failed to update room power levels")?;

        response
            .error_for_synapse_error()
            .await
            .context("Unexpected HTTP response while updating room power levels")?;

        Ok(())
    }

    #[tracing::instrument(
        name = "homeserver.set_room_alias",
        skip_all,
        fields(
            matrix.homeserver = self.homeserver,
            matrix.room_id = room_id,
            matrix.room_alias = alias,
        ),
        err(Debug),
    )]
    async fn set_room_alias(&self, room_id: &str, alias: &str) -> Result<(), anyhow::Error> {
        #[derive(Serialize)]
        struct Request<'a> {
            room_id: &'a str,
        }

        let encoded_alias = urlencoding::encode(alias);
        let url = format!("_matrix/client/r0/directory/room/{encoded_alias}");
        let response = self
            .put(&url)
            .json(&Request { room_id })
            .send()
            .await
            .context("Failed to create room alias")?;

        response
            .error_for_synapse_error()
            .await
            .context("Unexpected HTTP response while creating room alias")?;

        Ok(())
    }

    #[tracing::instrument(
        name = "homeserver.remove_room_alias",
        skip_all,
        fields(
            matrix.homeserver = self.homeserver,
            matrix.room_alias = alias,
        ),
        err(Debug),
    )]
    async fn remove_room_alias(&self, alias: &str) -> Result<(), anyhow::Error> {
        let encoded_alias = urlencoding::encode(alias);
        let url = format!("_matrix/client/r0/directory/room/{encoded_alias}");
        let response = self
            .delete(&url)
            .send()
            .await
            .context("Failed to delete room alias")?;

        response
            .error_for_synapse_error()
            .await
            .context("Unexpected HTTP response while deleting room alias")?;

        Ok(())
    }

    #[tracing::instrument(
        name = "homeserver.get_presence",
        skip_all,
        fields(
            matrix.homeserver = self.homeserver,
            matrix.user_id = user_id,
        ),
        err(Debug),
    )]
    async fn get_presence(&self, user_id: &str) -> Result<Presence, anyhow::Error> {
        let encoded_user_id = urlencoding::encode(user_id);
        let url = format!("_matrix/client/r0/presence/{encoded_user_id}/status");
        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to fetch user presence")?;

        let response = response
            .error_for_synapse_error()
            .await
            .context("Unexpected HTTP response while fetching user presence")?;

        let body: Presence = response
            .json()
            .await
            .context("Failed to deserialize user presence")?;

        Ok(body)
    }

    #[tracing::instrument(
        name = "homeserver.kick_user",
        skip_all,
        fields(
            matrix.homeserver = self.homeserver,
            matrix.room_id = room_id,
            matrix.user_id = user_id,
        ),
        err(Debug),
    )]
    async fn kick_user(
        &self,
        room_id: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<(), anyhow::Error> {
        #[derive(Serialize)]
        struct Request<'a> {
            user_id: &'a str,
            reason: &'a str,
        }

        let encoded_room_id = urlencoding::encode(room_id);
        let url = format!("_matrix/client/r0/rooms/{encoded_room_id}/kick");
        let response = self
            .post(&url)
            .json(&Request { user_id, reason })
            .send()
            .await
            .context("Failed to kick user")?;

        response
            .error_for_synapse_error()
            .await
            .context("Unexpected HTTP response while kicking user")?;

        Ok(())
    }
}
