// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Implementation of the [`mms_matrix::HomeserverConnection`] trait over the
//! Synapse client & admin HTTP API.

use std::time::Duration;

use rustls_platform_verifier::ConfigVerifierExt;

mod connection;
mod error;

pub use self::connection::SynapseConnection;

static USER_AGENT: &str = concat!("matrix-maintenance-service/", env!("CARGO_PKG_VERSION"));

/// Create a new [`reqwest::Client`] with sane parameters
///
/// # Panics
///
/// Panics if the client fails to build, which should never happen
#[must_use]
pub fn http_client() -> reqwest::Client {
    // The explicit typing here is because `use_preconfigured_tls` accepts
    // `Any`, but wants a `ClientConfig` under the hood. This helps us detect
    // breaking changes in the rustls-platform-verifier API.
    let tls_config: rustls::ClientConfig =
        rustls::ClientConfig::with_platform_verifier().expect("failed to create TLS config");

    reqwest::Client::builder()
        .use_preconfigured_tls(tls_config)
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to create HTTP client")
}

#[cfg(test)]
mod tests {
    use mms_matrix::{HomeserverConnection, PurgeBound, PurgeStatus};
    use serde_json::json;
    use url::Url;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;

    /// Ensure a rustls crypto provider is installed for the process. reqwest
    /// is built with the `-no-provider` feature, so the application (here, the
    /// test harness) must install one before any client is built. Idempotent:
    /// `install_default` is internally guarded, so concurrent tests are safe.
    fn install_crypto_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    fn connection(mock_server: &MockServer) -> SynapseConnection {
        install_crypto_provider();
        SynapseConnection::new(
            "example.com".to_owned(),
            Url::parse(&mock_server.uri()).unwrap(),
            "secret-token".to_owned(),
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn test_login_with_password() {
        install_crypto_provider();
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/_matrix/client/r0/login"))
            .and(body_partial_json(json!({
                "type": "m.login.password",
                "user": "@admin:example.com",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "syt_secret",
                "user_id": "@admin:example.com",
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let conn = SynapseConnection::login_with_password(
            "example.com".to_owned(),
            Url::parse(&mock_server.uri()).unwrap(),
            "@admin:example.com",
            "hunter2",
            reqwest::Client::new(),
        )
        .await;

        assert!(conn.is_ok());
    }

    #[tokio::test]
    async fn test_login_denied() {
        install_crypto_provider();
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/_matrix/client/r0/login"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "errcode": "M_FORBIDDEN",
                "error": "Invalid password",
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let conn = SynapseConnection::login_with_password(
            "example.com".to_owned(),
            Url::parse(&mock_server.uri()).unwrap(),
            "@admin:example.com",
            "wrong",
            reqwest::Client::new(),
        )
        .await;

        assert!(conn.is_err());
    }

    #[tokio::test]
    async fn test_purge_history_accepted() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(
                "/_matrix/client/r0/admin/purge_history/%21abc%3Aexample.com",
            ))
            .and(header("Authorization", "Bearer secret-token"))
            .and(body_partial_json(json!({
                "delete_local_events": true,
                "purge_up_to_event_id": "$ev42",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "purge_id": "purge-1" })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let conn = connection(&mock_server);
        let purge_id = conn
            .purge_history(
                "!abc:example.com",
                &PurgeBound::UpToEvent("$ev42".to_owned()),
            )
            .await
            .unwrap();

        assert_eq!(purge_id.as_deref(), Some("purge-1"));
    }

    #[tokio::test]
    async fn test_purge_history_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(
                "/_matrix/client/r0/admin/purge_history/%21abc%3Aexample.com",
            ))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errcode": "M_UNKNOWN",
                "error": "No event found",
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let conn = connection(&mock_server);
        let purge_id = conn
            .purge_history("!abc:example.com", &PurgeBound::UpToTimestamp(1_000_000))
            .await
            .unwrap();

        // The room is skipped, not an error
        assert_eq!(purge_id, None);
    }

    #[tokio::test]
    async fn test_purge_history_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_matrix/client/r0/admin/purge_history_status/purge-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "active" })))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/r0/admin/purge_history_status/purge-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "complete" })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let conn = connection(&mock_server);

        let status = conn.purge_history_status("purge-1").await.unwrap();
        assert!(status.is_active());

        let status = conn.purge_history_status("purge-2").await.unwrap();
        assert_eq!(status, PurgeStatus::Complete);
    }

    #[tokio::test]
    async fn test_purge_history_status_failure_is_fatal() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_matrix/client/r0/admin/purge_history_status/purge-1"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let conn = connection(&mock_server);
        assert!(conn.purge_history_status("purge-1").await.is_err());
    }

    #[tokio::test]
    async fn test_get_presence() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(
                "/_matrix/client/r0/presence/%40alice%3Aexample.com/status",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "presence": "offline",
                "last_active_ago": 5000,
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let conn = connection(&mock_server);
        let presence = conn.get_presence("@alice:example.com").await.unwrap();

        assert!(presence.is_offline());
        assert_eq!(presence.last_active_ago, Some(5000));
    }

    #[tokio::test]
    async fn test_join_room() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/_matrix/client/r0/join/%23discovery%3Aexample.com"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "room_id": "!abc:example.com" })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let conn = connection(&mock_server);
        let room_id = conn.join_room("#discovery:example.com").await.unwrap();

        assert_eq!(room_id, "!abc:example.com");
    }
}
