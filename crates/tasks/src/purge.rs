// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! History purging: walks every room of the homeserver, finds the event up
//! to which history can be deleted and submits purge jobs, keeping at most a
//! configured number of jobs in flight on the homeserver at once.

use std::{collections::HashMap, time::Duration};

use anyhow::Context as _;
use chrono::Utc;
use mms_matrix::{HomeserverConnection, PurgeBound};
use mms_storage::SynapseReader;
use tracing::{debug, info, warn};

/// Which events to keep when purging a room
#[derive(Debug, Clone, Copy, Default)]
pub struct Retention {
    /// Keep events received after this timestamp, in milliseconds since the
    /// Unix epoch
    pub cutoff_ts_ms: Option<i64>,

    /// Keep at least this number of message events per room
    pub keep_min_messages: Option<i64>,
}

impl Retention {
    /// Whether no retention bound is set at all, i.e. the whole history of
    /// every room is to be purged
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.cutoff_ts_ms.is_none() && self.keep_min_messages.is_none()
    }
}

/// Keeps at most a configured number of purge jobs in flight on the
/// homeserver.
///
/// The homeserver runs purges asynchronously and reports their state through
/// a status endpoint; this dispatcher tracks the submitted jobs and
/// sleep-polls that endpoint until a slot frees up before submitting the
/// next one. Jobs cannot be cancelled, only observed.
pub struct PurgeDispatcher<'conn> {
    connection: &'conn dyn HomeserverConnection,
    limit: usize,
    poll_interval: Duration,
    /// Maps the room ID of each in-flight purge to its job ID
    pending: HashMap<String, String>,
}

impl<'conn> PurgeDispatcher<'conn> {
    /// Create a dispatcher keeping at most `limit` purges in flight,
    /// sleeping `poll_interval` between status polls.
    #[must_use]
    pub fn new(
        connection: &'conn dyn HomeserverConnection,
        limit: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            connection,
            // A limit of zero could never admit a job
            limit: limit.max(1),
            poll_interval,
            pending: HashMap::new(),
        }
    }

    /// Number of purges currently in flight
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Submit a purge for the given room, waiting for a free slot first.
    ///
    /// Returns the job ID, or `None` if the homeserver rejected the
    /// submission; the room is then skipped for this run and never retried.
    ///
    /// # Errors
    ///
    /// Returns an error if the homeserver could not be reached, or if a
    /// status poll failed while waiting for a slot.
    pub async fn submit(
        &mut self,
        room_id: &str,
        bound: PurgeBound,
    ) -> Result<Option<String>, anyhow::Error> {
        self.await_slot(self.limit).await?;

        let Some(purge_id) = self.connection.purge_history(room_id, &bound).await? else {
            return Ok(None);
        };

        debug!(
            matrix.room_id = room_id,
            matrix.purge_id = purge_id,
            "Purge submitted"
        );
        self.pending.insert(room_id.to_owned(), purge_id.clone());

        Ok(Some(purge_id))
    }

    /// Wait until every submitted purge has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if a status poll failed.
    pub async fn drain(&mut self) -> Result<(), anyhow::Error> {
        self.await_slot(1).await
    }

    /// Sleep-poll until fewer than `required` purges are in flight.
    async fn await_slot(&mut self, required: usize) -> Result<(), anyhow::Error> {
        while self.pending.len() >= required {
            tokio::time::sleep(self.poll_interval).await;
            self.reap_finished().await?;
        }

        Ok(())
    }

    /// Poll the status of every in-flight purge and forget the ones the
    /// homeserver no longer reports as active.
    async fn reap_finished(&mut self) -> Result<(), anyhow::Error> {
        let snapshot: Vec<(String, String)> = self
            .pending
            .iter()
            .map(|(room_id, purge_id)| (room_id.clone(), purge_id.clone()))
            .collect();

        for (room_id, purge_id) in snapshot {
            // A failing status endpoint means the pending set can never
            // converge, so it aborts the run rather than being treated as a
            // completion.
            let status = self
                .connection
                .purge_history_status(&purge_id)
                .await
                .context("could not poll the status of a pending purge")?;

            if !status.is_active() {
                info!(
                    matrix.room_id = room_id,
                    matrix.purge_id = purge_id,
                    ?status,
                    "Finished purge"
                );
                self.pending.remove(&room_id);
            }
        }

        Ok(())
    }
}

/// Outcome of a purge run
#[derive(Debug, Default, Clone, Copy)]
pub struct PurgeOutcome {
    /// Number of rooms considered
    pub rooms: usize,

    /// Number of purges submitted and completed
    pub purged: usize,

    /// Number of rooms skipped, either because they had no eligible events
    /// or because the homeserver rejected the submission
    pub skipped: usize,
}

/// Walk every room of the homeserver and purge its history according to the
/// retention settings, then drain all outstanding purges.
///
/// # Errors
///
/// Returns an error if the database or the homeserver could not be reached,
/// or if a status poll failed.
pub async fn run(
    connection: &dyn HomeserverConnection,
    reader: &mut SynapseReader<'_>,
    retention: Retention,
    parallel_purges: usize,
    poll_interval: Duration,
) -> Result<PurgeOutcome, anyhow::Error> {
    let mut dispatcher = PurgeDispatcher::new(connection, parallel_purges, poll_interval);
    let mut outcome = PurgeOutcome::default();

    let rooms = reader.room_ids().await?;
    outcome.rooms = rooms.len();
    info!(count = rooms.len(), "Processing rooms");

    for room_id in rooms {
        let bound = if retention.is_unbounded() {
            // No retention bound, purge everything up to now
            PurgeBound::UpToTimestamp(Utc::now().timestamp_millis())
        } else {
            let boundary = reader
                .purge_boundary(&room_id, retention.cutoff_ts_ms, retention.keep_min_messages)
                .await?;

            match boundary {
                Some(event_id) => PurgeBound::UpToEvent(event_id),
                None => {
                    // Room doesn't have messages eligible for purging, skip
                    debug!(matrix.room_id = room_id, "No eligible events, skipping");
                    outcome.skipped += 1;
                    continue;
                }
            }
        };

        match dispatcher.submit(&room_id, bound).await? {
            Some(_purge_id) => outcome.purged += 1,
            None => {
                warn!(matrix.room_id = room_id, "Submission rejected, skipping");
                outcome.skipped += 1;
            }
        }
    }

    dispatcher.drain().await?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use mms_matrix::MockHomeserverConnection;

    use super::*;

    const TICK: Duration = Duration::from_millis(1);

    fn bound() -> PurgeBound {
        PurgeBound::UpToTimestamp(1_700_000_000_000)
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        let mock = MockHomeserverConnection::new("example.com").with_polls_until_complete(3);
        let mut dispatcher = PurgeDispatcher::new(&mock, 2, TICK);

        for n in 0..10 {
            let submitted = dispatcher
                .submit(&format!("!room-{n}:example.com"), bound())
                .await
                .unwrap();
            assert!(submitted.is_some());
            assert!(dispatcher.pending() <= 2);
        }
        dispatcher.drain().await.unwrap();

        assert_eq!(mock.max_in_flight(), 2);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn drain_terminates_after_status_flip() {
        // Jobs stay active for a handful of polls before completing
        let mock = MockHomeserverConnection::new("example.com").with_polls_until_complete(5);
        let mut dispatcher = PurgeDispatcher::new(&mock, 4, TICK);

        dispatcher
            .submit("!abc:example.com", bound())
            .await
            .unwrap();
        dispatcher
            .submit("!def:example.com", bound())
            .await
            .unwrap();

        dispatcher.drain().await.unwrap();
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(mock.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn serializes_submissions_with_limit_of_one() {
        let mock = MockHomeserverConnection::new("example.com").with_polls_until_complete(2);
        let mut dispatcher = PurgeDispatcher::new(&mock, 1, TICK);

        dispatcher
            .submit("!first:example.com", bound())
            .await
            .unwrap();
        dispatcher
            .submit("!second:example.com", bound())
            .await
            .unwrap();
        dispatcher.drain().await.unwrap();

        // The second submission must only happen after the first purge was
        // observed as no longer active
        let calls = mock.calls();
        let first_done = calls
            .iter()
            .position(|c| c == "purge_complete !first:example.com")
            .unwrap();
        let second_submitted = calls
            .iter()
            .position(|c| c == "purge_history !second:example.com")
            .unwrap();
        assert!(first_done < second_submitted);
    }

    #[tokio::test]
    async fn third_submission_blocks_until_a_slot_frees() {
        let mock = MockHomeserverConnection::new("example.com").with_polls_until_complete(1);
        let mut dispatcher = PurgeDispatcher::new(&mock, 2, TICK);

        // Two rooms fit under the limit without any status poll
        dispatcher.submit("!a:example.com", bound()).await.unwrap();
        dispatcher.submit("!b:example.com", bound()).await.unwrap();
        assert_eq!(dispatcher.pending(), 2);
        assert!(
            !mock
                .calls()
                .iter()
                .any(|c| c.starts_with("purge_history_status"))
        );

        // The third has to wait for one of the first two to complete
        dispatcher.submit("!c:example.com", bound()).await.unwrap();
        assert!(dispatcher.pending() <= 2);
        assert_eq!(mock.max_in_flight(), 2);

        dispatcher.drain().await.unwrap();
        assert_eq!(mock.submissions().len(), 3);
    }

    #[tokio::test]
    async fn rejected_submission_is_skipped_not_retried() {
        let mock = MockHomeserverConnection::new("example.com").with_polls_until_complete(1);
        mock.reject_room("!rejected:example.com");
        let mut dispatcher = PurgeDispatcher::new(&mock, 2, TICK);

        let submitted = dispatcher
            .submit("!rejected:example.com", bound())
            .await
            .unwrap();
        assert_eq!(submitted, None);
        // The rejected room takes up no slot and the dispatcher moves on
        // without blocking
        assert_eq!(dispatcher.pending(), 0);

        dispatcher
            .submit("!next:example.com", bound())
            .await
            .unwrap();
        dispatcher.drain().await.unwrap();

        assert_eq!(mock.submissions(), &["!next:example.com"]);
    }

    #[tokio::test]
    async fn drain_with_nothing_pending_returns_immediately() {
        let mock = MockHomeserverConnection::new("example.com");
        let mut dispatcher = PurgeDispatcher::new(&mock, 3, TICK);

        dispatcher.drain().await.unwrap();
        assert!(mock.calls().is_empty());
    }
}
