// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! # Synapse Database Reader
//!
//! This crate provides direct, read-mostly access to the tables of a Synapse
//! database that the maintenance tasks need: the room list, the purge
//! boundary lookup and the admin flag of the admin user. It does not own any
//! schema of its own.

use sqlx::{PgConnection, Postgres, Type};
use thiserror::Error;
use thiserror_ext::ContextInto;

#[derive(Debug, Error, ContextInto)]
pub enum Error {
    #[error("database error whilst {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },
}

/// A Synapse boolean.
/// Synapse stores booleans as 0 or 1, due to compatibility with old SQLite
/// versions that did not have native boolean support.
#[derive(Copy, Clone, Debug)]
pub struct SynapseBool(bool);

impl<'r> sqlx::Decode<'r, Postgres> for SynapseBool {
    fn decode(
        value: <Postgres as sqlx::Database>::ValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        <i16 as sqlx::Decode<Postgres>>::decode(value)
            .map(|boolean_int| SynapseBool(boolean_int != 0))
    }
}

impl sqlx::Type<Postgres> for SynapseBool {
    fn type_info() -> <Postgres as sqlx::Database>::TypeInfo {
        <i16 as Type<Postgres>>::type_info()
    }
}

impl From<SynapseBool> for bool {
    fn from(SynapseBool(value): SynapseBool) -> Self {
        value
    }
}

/// Reads from the tables of a Synapse database
pub struct SynapseReader<'conn> {
    conn: &'conn mut PgConnection,
}

impl<'conn> SynapseReader<'conn> {
    pub fn new(conn: &'conn mut PgConnection) -> Self {
        Self { conn }
    }

    /// Lists the IDs of every room known to the homeserver.
    ///
    /// # Errors
    ///
    /// Returns an error on an underlying database failure.
    pub async fn room_ids(&mut self) -> Result<Vec<String>, Error> {
        sqlx::query_scalar("SELECT room_id FROM rooms")
            .fetch_all(&mut *self.conn)
            .await
            .into_database("listing rooms")
    }

    /// Finds the newest message event of a room that is eligible for purging.
    ///
    /// An event qualifies when it was received before `cutoff_ts_ms` (if set)
    /// and when at least `keep_min_messages` newer message events remain in
    /// the room (if set). Returns `None` when the room has no eligible
    /// events, in which case it is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error on an underlying database failure.
    pub async fn purge_boundary(
        &mut self,
        room_id: &str,
        cutoff_ts_ms: Option<i64>,
        keep_min_messages: Option<i64>,
    ) -> Result<Option<String>, Error> {
        sqlx::query_scalar(
            "
            SELECT event_id FROM (
                SELECT event_id,
                    received_ts,
                    COUNT(*) OVER (ORDER BY received_ts DESC) AS msg_count_above
                FROM events
                WHERE room_id = $1 AND type = 'm.room.message'
                ORDER BY received_ts DESC
            ) t
            WHERE ($2::bigint IS NULL OR received_ts < $2)
              AND ($3::bigint IS NULL OR msg_count_above > $3)
            LIMIT 1
            ",
        )
        .bind(room_id)
        .bind(cutoff_ts_ms)
        .bind(keep_min_messages)
        .fetch_optional(&mut *self.conn)
        .await
        .into_database_with(|| format!("finding the purge boundary of room {room_id}"))
    }

    /// Looks up the admin flag of a user, `None` if the user does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on an underlying database failure.
    pub async fn user_is_admin(&mut self, user_id: &str) -> Result<Option<bool>, Error> {
        let admin: Option<SynapseBool> = sqlx::query_scalar("SELECT admin FROM users WHERE name = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.conn)
            .await
            .into_database_with(|| format!("looking up the admin flag of {user_id}"))?;

        Ok(admin.map(Into::into))
    }

    /// Marks a user as a server admin.
    ///
    /// # Errors
    ///
    /// Returns an error on an underlying database failure.
    pub async fn set_user_admin(&mut self, user_id: &str) -> Result<(), Error> {
        sqlx::query("UPDATE users SET admin = 1 WHERE name = $1")
            .bind(user_id)
            .execute(&mut *self.conn)
            .await
            .into_database_with(|| format!("setting the admin flag of {user_id}"))?;

        Ok(())
    }

    /// Runs a raw SQL script, e.g. a janitor script executed after purging,
    /// and returns the total number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error on an underlying database failure.
    pub async fn run_script(&mut self, sql: &str) -> Result<u64, Error> {
        let result = sqlx::raw_sql(sql)
            .execute(&mut *self.conn)
            .await
            .into_database("running the post-purge SQL script")?;

        Ok(result.rows_affected())
    }
}
