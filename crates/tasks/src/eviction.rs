// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Eviction of long-inactive users from the broadcast rooms.
//!
//! A JSON ledger on disk records when each user was last seen active. Users
//! whose record is older than the threshold are double-checked against live
//! presence before being kicked; users that turn out to have been active
//! recently get their record refreshed instead.

use std::{collections::BTreeMap, time::Duration};

use anyhow::Context as _;
use camino::Utf8Path;
use mms_matrix::HomeserverConnection;
use tracing::{debug, info};

/// Maps each user ID to the epoch-seconds timestamp of its last recorded
/// activity
pub type PresenceLedger = BTreeMap<String, i64>;

/// Outcome of an eviction run
#[derive(Debug, Default, Clone)]
pub struct EvictionOutcome {
    /// Users that were kicked and removed from the ledger
    pub evicted: Vec<String>,

    /// Number of ledger entries refreshed with newer activity
    pub refreshed: usize,
}

/// Read the presence ledger, `None` if the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub async fn load_ledger(path: &Utf8Path) -> Result<Option<PresenceLedger>, anyhow::Error> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("could not read presence ledger {path:?}"));
        }
    };

    let ledger = serde_json::from_str(&contents)
        .with_context(|| format!("invalid presence ledger {path:?}"))?;
    Ok(Some(ledger))
}

/// Write the presence ledger back, atomically (write + rename).
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub async fn store_ledger(path: &Utf8Path, ledger: &PresenceLedger) -> Result<(), anyhow::Error> {
    let contents = serde_json::to_string_pretty(ledger).context("could not serialize ledger")?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("could not write presence ledger {tmp:?}"))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("could not move presence ledger into place at {path:?}"))?;

    Ok(())
}

/// Kick every user that has been inactive for longer than `threshold` out of
/// the broadcast rooms, updating the ledger in place.
///
/// `now` is the current time in epoch seconds.
///
/// # Errors
///
/// Returns an error if the homeserver could not be reached.
pub async fn evict_inactive_users(
    connection: &dyn HomeserverConnection,
    ledger: &mut PresenceLedger,
    broadcast_rooms: &[String],
    threshold: Duration,
    pace: Duration,
    now: i64,
) -> Result<EvictionOutcome, anyhow::Error> {
    let threshold_time = now - i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
    let mut outcome = EvictionOutcome::default();

    let candidates: Vec<String> = ledger
        .iter()
        .filter(|(_, last_active)| **last_active < threshold_time)
        .map(|(user_id, _)| user_id.clone())
        .collect();

    for user_id in candidates {
        let presence = connection
            .get_presence(&user_id)
            .await
            .with_context(|| format!("could not fetch the presence of {user_id}"))?;

        // The ledger can lag behind; trust the live estimate
        let Some(last_active_ago) = presence.last_active_ago else {
            debug!(user_id, "No activity estimate, leaving record untouched");
            continue;
        };
        let last_active = now - last_active_ago / 1000;

        if last_active < threshold_time && presence.is_offline() {
            outcome.evicted.push(user_id);
        } else if ledger.get(&user_id).is_some_and(|old| last_active > *old) {
            ledger.insert(user_id, last_active);
            outcome.refreshed += 1;
        }

        tokio::time::sleep(pace).await;
    }

    for user_id in &outcome.evicted {
        for room_id in broadcast_rooms {
            connection
                .kick_user(room_id, user_id, "Evicted due to inactivity")
                .await
                .with_context(|| format!("could not kick {user_id} from {room_id}"))?;
        }
        ledger.remove(user_id);
        info!(user_id, "Evicted inactive user");

        tokio::time::sleep(pace).await;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use mms_matrix::MockHomeserverConnection;

    use super::*;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);
    const NOW: i64 = 1_700_000_000;

    fn week_secs() -> i64 {
        i64::try_from(WEEK.as_secs()).unwrap()
    }

    #[tokio::test]
    async fn evicts_long_offline_users() {
        let mock = MockHomeserverConnection::new("example.com");
        // Still offline, last active long before the threshold
        mock.set_presence("@stale:example.com", "offline", Some((week_secs() + 3600) * 1000));

        let mut ledger = PresenceLedger::from([(
            "@stale:example.com".to_owned(),
            NOW - week_secs() - 7200,
        )]);
        let rooms = vec!["!discovery:example.com".to_owned()];

        let outcome = evict_inactive_users(
            &mock,
            &mut ledger,
            &rooms,
            WEEK,
            Duration::ZERO,
            NOW,
        )
        .await
        .unwrap();

        assert_eq!(outcome.evicted, &["@stale:example.com"]);
        assert!(ledger.is_empty());
        assert_eq!(
            mock.kicked(),
            &[(
                "!discovery:example.com".to_owned(),
                "@stale:example.com".to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn refreshes_users_seen_recently() {
        let mock = MockHomeserverConnection::new("example.com");
        // The ledger says stale, but the user was online an hour ago
        mock.set_presence("@back:example.com", "online", Some(3600 * 1000));

        let mut ledger = PresenceLedger::from([(
            "@back:example.com".to_owned(),
            NOW - week_secs() - 7200,
        )]);

        let outcome =
            evict_inactive_users(&mock, &mut ledger, &[], WEEK, Duration::ZERO, NOW)
                .await
                .unwrap();

        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.refreshed, 1);
        assert_eq!(ledger["@back:example.com"], NOW - 3600);
        assert!(mock.kicked().is_empty());
    }

    #[tokio::test]
    async fn recently_recorded_users_are_not_checked() {
        let mock = MockHomeserverConnection::new("example.com");
        // No presence is registered for the user: a lookup would fail

        let mut ledger =
            PresenceLedger::from([("@fresh:example.com".to_owned(), NOW - 3600)]);

        let outcome =
            evict_inactive_users(&mock, &mut ledger, &[], WEEK, Duration::ZERO, NOW)
                .await
                .unwrap();

        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.refreshed, 0);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn ledger_roundtrip() {
        let dir = camino::Utf8PathBuf::try_from(std::env::temp_dir()).unwrap();
        let path = dir.join(format!("mms-ledger-{}.json", std::process::id()));

        let ledger = PresenceLedger::from([("@alice:example.com".to_owned(), 12345)]);
        store_ledger(&path, &ledger).await.unwrap();
        let loaded = load_ledger(&path).await.unwrap().unwrap();
        assert_eq!(loaded, ledger);

        tokio::fs::remove_file(&path).await.unwrap();
        assert!(load_ledger(&path).await.unwrap().is_none());
    }
}
