use stack_string::StackString;
use time::OffsetDateTime;
use tokio_postgres::{GenericClient, Row};
use uuid::Uuid;

use crate::{errors::SyncError, pgpool::PgPool};

/// A student organization. The four `calendar_*` columns form the external
/// calendar binding; `calendar_sync_token` is the provider cursor and is
/// only ever non-null while `calendar_id` is set.
#[derive(Clone, Debug)]
pub struct Club {
    pub id: Uuid,
    pub club_name: StackString,
    pub description: Option<StackString>,
    pub approved: bool,
    pub calendar_id: Option<StackString>,
    pub calendar_name: Option<StackString>,
    pub calendar_account_id: Option<Uuid>,
    pub calendar_sync_token: Option<StackString>,
}

impl Club {
    fn from_row(row: &Row) -> Result<Self, SyncError> {
        Ok(Self {
            id: row.try_get("id")?,
            club_name: row.try_get("club_name")?,
            description: row.try_get("description")?,
            approved: row.try_get("approved")?,
            calendar_id: row.try_get("calendar_id")?,
            calendar_name: row.try_get("calendar_name")?,
            calendar_account_id: row.try_get("calendar_account_id")?,
            calendar_sync_token: row.try_get("calendar_sync_token")?,
        })
    }

    pub async fn get_by_id(club_id: Uuid, pool: &PgPool) -> Result<Option<Self>, SyncError> {
        let conn = pool.get().await?;
        let row = conn
            .query_opt("SELECT * FROM clubs WHERE id = $1", &[&club_id])
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    pub async fn get_by_calendar_id(
        calendar_id: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, SyncError> {
        let conn = pool.get().await?;
        let row = conn
            .query_opt("SELECT * FROM clubs WHERE calendar_id = $1", &[&calendar_id])
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    pub async fn get_all(pool: &PgPool) -> Result<Vec<Self>, SyncError> {
        let conn = pool.get().await?;
        let rows = conn
            .query("SELECT * FROM clubs ORDER BY club_name", &[])
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    /// Clubs with a calendar bound, the candidates for batch syncing.
    pub async fn get_bound(pool: &PgPool) -> Result<Vec<Self>, SyncError> {
        let conn = pool.get().await?;
        let rows = conn
            .query(
                "SELECT * FROM clubs WHERE calendar_id IS NOT NULL ORDER BY club_name",
                &[],
            )
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "INSERT INTO clubs (id, club_name, description, approved) \
             VALUES ($1, $2, $3, $4)",
            &[&self.id, &self.club_name, &self.description, &self.approved],
        )
        .await?;
        Ok(())
    }

    pub async fn set_approved(club_id: Uuid, approved: bool, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "UPDATE clubs SET approved = $2 WHERE id = $1",
            &[&club_id, &approved],
        )
        .await?;
        Ok(())
    }

    /// Optimistic write of the calendar binding. The sync token is reset so
    /// the next sync of the (possibly different) calendar starts fresh.
    pub async fn set_calendar_binding(
        club_id: Uuid,
        calendar_id: &str,
        calendar_name: Option<&str>,
        account_id: Uuid,
        pool: &PgPool,
    ) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "UPDATE clubs SET calendar_id = $2, calendar_name = $3, \
             calendar_account_id = $4, calendar_sync_token = NULL WHERE id = $1",
            &[&club_id, &calendar_id, &calendar_name, &account_id],
        )
        .await?;
        Ok(())
    }

    /// Roll the binding back to the unbound state.
    pub async fn clear_calendar_binding(club_id: Uuid, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "UPDATE clubs SET calendar_id = NULL, calendar_name = NULL, \
             calendar_account_id = NULL, calendar_sync_token = NULL WHERE id = $1",
            &[&club_id],
        )
        .await?;
        Ok(())
    }

    pub async fn clear_sync_token(club_id: Uuid, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "UPDATE clubs SET calendar_sync_token = NULL WHERE id = $1",
            &[&club_id],
        )
        .await?;
        Ok(())
    }

    pub async fn set_sync_token<C: GenericClient>(
        club_id: Uuid,
        sync_token: Option<&str>,
        conn: &C,
    ) -> Result<(), SyncError> {
        conn.execute(
            "UPDATE clubs SET calendar_sync_token = $2 WHERE id = $1",
            &[&club_id, &sync_token],
        )
        .await?;
        Ok(())
    }
}

/// A linked Google account whose stored refresh credential authenticates
/// calendar access for the clubs bound to it.
#[derive(Clone, Debug)]
pub struct GoogleAccount {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: StackString,
    pub refresh_token: Option<StackString>,
}

impl GoogleAccount {
    fn from_row(row: &Row) -> Result<Self, SyncError> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            email: row.try_get("email")?,
            refresh_token: row.try_get("refresh_token")?,
        })
    }

    pub async fn get_by_id(account_id: Uuid, pool: &PgPool) -> Result<Option<Self>, SyncError> {
        let conn = pool.get().await?;
        let row = conn
            .query_opt("SELECT * FROM google_accounts WHERE id = $1", &[&account_id])
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "INSERT INTO google_accounts (id, user_id, email, refresh_token) \
             VALUES ($1, $2, $3, $4)",
            &[&self.id, &self.user_id, &self.email, &self.refresh_token],
        )
        .await?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub email: StackString,
    pub name: Option<StackString>,
}

impl User {
    fn from_row(row: &Row) -> Result<Self, SyncError> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
        })
    }

    pub async fn get_by_id(user_id: Uuid, pool: &PgPool) -> Result<Option<Self>, SyncError> {
        let conn = pool.get().await?;
        let row = conn
            .query_opt("SELECT * FROM users WHERE id = $1", &[&user_id])
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "INSERT INTO users (id, email, name) VALUES ($1, $2, $3)",
            &[&self.id, &self.email, &self.name],
        )
        .await?;
        Ok(())
    }
}

/// One club event. Rows with `google = true` mirror the bound calendar and
/// use the provider's event id as primary key; local rows get generated
/// ids. The provider-only columns stay null on local rows.
#[derive(Clone, Debug)]
pub struct ClubEvent {
    pub id: StackString,
    pub club_id: Uuid,
    pub title: StackString,
    pub description: Option<StackString>,
    pub location: Option<StackString>,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    pub google: bool,
    pub recurrence: Option<Vec<StackString>>,
    pub recurrence_id: Option<StackString>,
    pub etag: Option<StackString>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ClubEvent {
    fn from_row(row: &Row) -> Result<Self, SyncError> {
        Ok(Self {
            id: row.try_get("id")?,
            club_id: row.try_get("club_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            location: row.try_get("location")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            google: row.try_get("google")?,
            recurrence: row.try_get("recurrence")?,
            recurrence_id: row.try_get("recurrence_id")?,
            etag: row.try_get("etag")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn get_by_id(event_id: &str, pool: &PgPool) -> Result<Option<Self>, SyncError> {
        let conn = pool.get().await?;
        let row = conn
            .query_opt("SELECT * FROM events WHERE id = $1", &[&event_id])
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    pub async fn get_by_club(
        club_id: Uuid,
        min_time: OffsetDateTime,
        max_time: OffsetDateTime,
        pool: &PgPool,
    ) -> Result<Vec<Self>, SyncError> {
        let conn = pool.get().await?;
        let rows = conn
            .query(
                "SELECT * FROM events WHERE club_id = $1 \
                 AND start_time >= $2 AND start_time <= $3 ORDER BY start_time",
                &[&club_id, &min_time, &max_time],
            )
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    /// Upcoming events of approved clubs, for the directory agenda.
    pub async fn get_agenda(
        min_time: OffsetDateTime,
        max_time: OffsetDateTime,
        pool: &PgPool,
    ) -> Result<Vec<Self>, SyncError> {
        let conn = pool.get().await?;
        let rows = conn
            .query(
                "SELECT e.* FROM events e JOIN clubs c ON c.id = e.club_id \
                 WHERE c.approved AND e.start_time >= $1 AND e.start_time <= $2 \
                 ORDER BY e.start_time",
                &[&min_time, &max_time],
            )
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    /// Incremental-sync cancellation: registrations first, then the rows.
    /// The join table references `users` as well, so there is no FK cascade
    /// to lean on.
    pub async fn delete_by_ids<C: GenericClient>(
        club_id: Uuid,
        event_ids: &[StackString],
        conn: &C,
    ) -> Result<u64, SyncError> {
        conn.execute(
            "DELETE FROM event_registrations WHERE event_id = ANY($1)",
            &[&event_ids],
        )
        .await?;
        let deleted = conn
            .execute(
                "DELETE FROM events WHERE club_id = $1 AND id = ANY($2)",
                &[&club_id, &event_ids],
            )
            .await?;
        Ok(deleted)
    }

    /// Full-reset purge of everything mirrored from the provider.
    pub async fn delete_google_for_club<C: GenericClient>(
        club_id: Uuid,
        conn: &C,
    ) -> Result<u64, SyncError> {
        conn.execute(
            "DELETE FROM event_registrations er USING events e \
             WHERE er.event_id = e.id AND e.club_id = $1 AND e.google",
            &[&club_id],
        )
        .await?;
        let deleted = conn
            .execute(
                "DELETE FROM events WHERE club_id = $1 AND google",
                &[&club_id],
            )
            .await?;
        Ok(deleted)
    }

    /// Local event removal (and its registrations).
    pub async fn delete(&self, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "DELETE FROM event_registrations WHERE event_id = $1",
            &[&self.id],
        )
        .await?;
        conn.execute("DELETE FROM events WHERE id = $1", &[&self.id])
            .await?;
        Ok(())
    }
}

/// Insertable event row; `upsert` implements the reconciliation write. The
/// provider can omit previously-sent fields on incremental updates, so
/// every mutable column merges through COALESCE against the stored value.
#[derive(Clone, Debug)]
pub struct InsertClubEvent {
    pub id: StackString,
    pub club_id: Uuid,
    pub title: StackString,
    pub description: Option<StackString>,
    pub location: Option<StackString>,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    pub google: bool,
    pub recurrence: Option<Vec<StackString>>,
    pub recurrence_id: Option<StackString>,
    pub etag: Option<StackString>,
}

impl InsertClubEvent {
    pub async fn insert(&self, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        self.insert_conn(&**conn).await
    }

    pub async fn insert_conn<C: GenericClient>(&self, conn: &C) -> Result<(), SyncError> {
        conn.execute(
            "INSERT INTO events (id, club_id, title, description, location, \
             start_time, end_time, google, recurrence, recurrence_id, etag) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            &[
                &self.id,
                &self.club_id,
                &self.title,
                &self.description,
                &self.location,
                &self.start_time,
                &self.end_time,
                &self.google,
                &self.recurrence,
                &self.recurrence_id,
                &self.etag,
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn upsert<C: GenericClient>(&self, conn: &C) -> Result<(), SyncError> {
        conn.execute(
            "INSERT INTO events (id, club_id, title, description, location, \
             start_time, end_time, google, recurrence, recurrence_id, etag) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO UPDATE SET \
                 title = COALESCE(EXCLUDED.title, events.title), \
                 description = COALESCE(EXCLUDED.description, events.description), \
                 location = COALESCE(EXCLUDED.location, events.location), \
                 start_time = COALESCE(EXCLUDED.start_time, events.start_time), \
                 end_time = COALESCE(EXCLUDED.end_time, events.end_time), \
                 recurrence = COALESCE(EXCLUDED.recurrence, events.recurrence), \
                 recurrence_id = COALESCE(EXCLUDED.recurrence_id, events.recurrence_id), \
                 etag = COALESCE(EXCLUDED.etag, events.etag), \
                 updated_at = now()",
            &[
                &self.id,
                &self.club_id,
                &self.title,
                &self.description,
                &self.location,
                &self.start_time,
                &self.end_time,
                &self.google,
                &self.recurrence,
                &self.recurrence_id,
                &self.etag,
            ],
        )
        .await?;
        Ok(())
    }
}

/// A user's registration for an event.
#[derive(Clone, Debug)]
pub struct EventRegistration {
    pub event_id: StackString,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
}

impl EventRegistration {
    fn from_row(row: &Row) -> Result<Self, SyncError> {
        Ok(Self {
            event_id: row.try_get("event_id")?,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn get_by_event(event_id: &str, pool: &PgPool) -> Result<Vec<Self>, SyncError> {
        let conn = pool.get().await?;
        let rows = conn
            .query(
                "SELECT * FROM event_registrations WHERE event_id = $1",
                &[&event_id],
            )
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    pub async fn register(event_id: &str, user_id: Uuid, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "INSERT INTO event_registrations (event_id, user_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
            &[&event_id, &user_id],
        )
        .await?;
        Ok(())
    }

    pub async fn unregister(event_id: &str, user_id: Uuid, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "DELETE FROM event_registrations WHERE event_id = $1 AND user_id = $2",
            &[&event_id, &user_id],
        )
        .await?;
        Ok(())
    }
}

/// Active push-notification subscription, keyed by the provider channel id.
#[derive(Clone, Debug)]
pub struct WebhookChannel {
    pub channel_id: StackString,
    pub resource_id: StackString,
    pub token: StackString,
    pub expiration: OffsetDateTime,
    pub club_id: Uuid,
}

impl WebhookChannel {
    fn from_row(row: &Row) -> Result<Self, SyncError> {
        Ok(Self {
            channel_id: row.try_get("channel_id")?,
            resource_id: row.try_get("resource_id")?,
            token: row.try_get("token")?,
            expiration: row.try_get("expiration")?,
            club_id: row.try_get("club_id")?,
        })
    }

    pub async fn get_by_channel_id(
        channel_id: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, SyncError> {
        let conn = pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT * FROM webhook_channels WHERE channel_id = $1",
                &[&channel_id],
            )
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    pub async fn get_by_club(club_id: Uuid, pool: &PgPool) -> Result<Vec<Self>, SyncError> {
        let conn = pool.get().await?;
        let rows = conn
            .query(
                "SELECT * FROM webhook_channels WHERE club_id = $1",
                &[&club_id],
            )
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    pub async fn get_expiring_before(
        cutoff: OffsetDateTime,
        pool: &PgPool,
    ) -> Result<Vec<Self>, SyncError> {
        let conn = pool.get().await?;
        let rows = conn
            .query(
                "SELECT * FROM webhook_channels WHERE expiration <= $1 ORDER BY expiration",
                &[&cutoff],
            )
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "INSERT INTO webhook_channels (channel_id, resource_id, token, expiration, club_id) \
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &self.channel_id,
                &self.resource_id,
                &self.token,
                &self.expiration,
                &self.club_id,
            ],
        )
        .await?;
        Ok(())
    }

    /// The local row goes away regardless of whether the provider-side stop
    /// succeeded; the channel expires upstream on its own.
    pub async fn delete(channel_id: &str, pool: &PgPool) -> Result<(), SyncError> {
        let conn = pool.get().await?;
        conn.execute(
            "DELETE FROM webhook_channels WHERE channel_id = $1",
            &[&channel_id],
        )
        .await?;
        Ok(())
    }
}
