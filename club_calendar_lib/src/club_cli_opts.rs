use anyhow::{format_err, Error};
use clap::{Parser, Subcommand};
use time::{macros::format_description, Date, Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    calendar_sync::CalendarSync,
    config::Config,
    models::{Club, ClubEvent, GoogleAccount, User},
    pgpool::PgPool,
    run_migrations,
};

fn parse_date(s: &str) -> Result<Date, String> {
    Date::parse(s, format_description!("[year]-[month]-[day]")).map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug)]
pub enum ClubCalendarActions {
    /// Apply pending database migrations
    RunMigrations,
    /// Create a club record
    CreateClub {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        /// Create the club pre-approved
        #[arg(long)]
        approved: bool,
    },
    /// Approve a club so its events show up in the agenda
    ApproveClub {
        #[arg(short, long)]
        club_id: Uuid,
    },
    /// Record a linked google account and its refresh credential
    CreateGoogleAccount {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        refresh_token: Option<String>,
        #[arg(short, long)]
        user_id: Option<Uuid>,
    },
    /// Create a user record
    CreateUser {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List all clubs
    ListClubs,
    /// List events of a single club
    ListEvents {
        #[arg(short, long)]
        club_id: Uuid,
        /// Earliest date to consider (defaults to 1 week in the past)
        #[arg(long, value_parser = parse_date)]
        min_date: Option<Date>,
        /// Latest date to consider (defaults to 2 weeks from today)
        #[arg(long, value_parser = parse_date)]
        max_date: Option<Date>,
    },
    /// Print the upcoming agenda across all approved clubs
    Agenda,
    /// Bind a calendar to a club, sync it and register for push updates
    EventSync {
        #[arg(short, long)]
        club_id: Uuid,
        #[arg(long)]
        calendar_id: Option<String>,
        #[arg(long)]
        calendar_name: Option<String>,
        #[arg(short, long)]
        account_id: Option<Uuid>,
    },
    /// Sync a single club's bound calendar
    Sync {
        #[arg(short, long)]
        club_id: Uuid,
        /// Ignore the stored sync token and replace everything
        #[arg(short, long)]
        full: bool,
    },
    /// Sync every club with a bound calendar
    SyncAll {
        #[arg(short, long)]
        full: bool,
    },
    /// Register a push-notification channel for a club
    Watch {
        #[arg(short, long)]
        club_id: Uuid,
    },
    /// Stop a push-notification channel
    StopWatch {
        #[arg(short, long)]
        channel_id: String,
    },
    /// Re-subscribe channels that expire soon
    RenewWebhooks {
        #[arg(long, default_value_t = 24)]
        within_hours: i64,
    },
}

#[derive(Parser, Debug)]
pub struct ClubCalendarCliOpts {
    #[command(subcommand)]
    action: Option<ClubCalendarActions>,
}

impl ClubCalendarCliOpts {
    pub async fn parse_opts() -> Result<(), Error> {
        let opts = Self::parse();
        let action = opts.action.unwrap_or(ClubCalendarActions::Agenda);

        let config = Config::init_config()?;
        let pool = PgPool::new(&config.database_url, config.n_db_workers)?;
        let cal_sync = CalendarSync::new(config, pool);

        match action {
            ClubCalendarActions::RunMigrations => {
                run_migrations(&cal_sync.pool).await?;
                println!("migrations applied");
            }
            ClubCalendarActions::CreateClub {
                name,
                description,
                approved,
            } => {
                let club = Club {
                    id: Uuid::new_v4(),
                    club_name: name.into(),
                    description: description.map(Into::into),
                    approved,
                    calendar_id: None,
                    calendar_name: None,
                    calendar_account_id: None,
                    calendar_sync_token: None,
                };
                club.insert(&cal_sync.pool).await?;
                println!("created club {}", club.id);
            }
            ClubCalendarActions::ApproveClub { club_id } => {
                Club::set_approved(club_id, true, &cal_sync.pool).await?;
                println!("approved club {club_id}");
            }
            ClubCalendarActions::CreateGoogleAccount {
                email,
                refresh_token,
                user_id,
            } => {
                let account = GoogleAccount {
                    id: Uuid::new_v4(),
                    user_id,
                    email: email.into(),
                    refresh_token: refresh_token.map(Into::into),
                };
                account.insert(&cal_sync.pool).await?;
                println!("created google account {}", account.id);
            }
            ClubCalendarActions::CreateUser { email, name } => {
                let user = User {
                    id: Uuid::new_v4(),
                    email: email.into(),
                    name: name.map(Into::into),
                };
                user.insert(&cal_sync.pool).await?;
                println!("created user {}", user.id);
            }
            ClubCalendarActions::ListClubs => {
                for club in Club::get_all(&cal_sync.pool).await? {
                    println!(
                        "{} {} approved={} calendar={}",
                        club.id,
                        club.club_name,
                        club.approved,
                        club.calendar_id.as_deref().map(|v| &**v).unwrap_or("-")
                    );
                }
            }
            ClubCalendarActions::ListEvents {
                club_id,
                min_date,
                max_date,
            } => {
                let tz = cal_sync.config.default_time_zone;
                let min_time = min_date.map_or_else(
                    || OffsetDateTime::now_utc() - Duration::weeks(1),
                    |d| tz.local_midnight(d),
                );
                let max_time = max_date.map_or_else(
                    || OffsetDateTime::now_utc() + Duration::weeks(2),
                    |d| tz.local_midnight(d),
                );
                for event in
                    ClubEvent::get_by_club(club_id, min_time, max_time, &cal_sync.pool).await?
                {
                    print_event(&event);
                }
            }
            ClubCalendarActions::Agenda => {
                let min_time = OffsetDateTime::now_utc() - Duration::days(1);
                let max_time = OffsetDateTime::now_utc() + Duration::weeks(2);
                for event in ClubEvent::get_agenda(min_time, max_time, &cal_sync.pool).await? {
                    print_event(&event);
                }
            }
            ClubCalendarActions::EventSync {
                club_id,
                calendar_id,
                calendar_name,
                account_id,
            } => {
                let outcome = cal_sync
                    .event_sync(
                        club_id,
                        calendar_id.map(Into::into),
                        calendar_name.map(Into::into),
                        account_id,
                    )
                    .await?;
                println!("{outcome:?}");
            }
            ClubCalendarActions::Sync { club_id, full } => {
                let club = Club::get_by_id(club_id, &cal_sync.pool)
                    .await?
                    .ok_or_else(|| format_err!("club {club_id} not found"))?;
                let gcal = cal_sync.gcal_for_club(&club).await?;
                let report = cal_sync.sync_calendar(club_id, full, &gcal).await?;
                println!(
                    "upserted {} deleted {} skipped {} reset {}",
                    report.upserted, report.deleted, report.skipped, report.reset
                );
            }
            ClubCalendarActions::SyncAll { full } => {
                for line in cal_sync.run_syncing(full).await? {
                    println!("{line}");
                }
            }
            ClubCalendarActions::Watch { club_id } => {
                let club = Club::get_by_id(club_id, &cal_sync.pool)
                    .await?
                    .ok_or_else(|| format_err!("club {club_id} not found"))?;
                let gcal = cal_sync.gcal_for_club(&club).await?;
                let outcome = cal_sync.watch_calendar(club_id, &gcal).await?;
                println!(
                    "watching via channel {} until {}",
                    outcome.channel_id, outcome.expiration
                );
            }
            ClubCalendarActions::StopWatch { channel_id } => {
                cal_sync.teardown_channel(&channel_id).await?;
                println!("stopped channel {channel_id}");
            }
            ClubCalendarActions::RenewWebhooks { within_hours } => {
                for line in cal_sync
                    .renew_webhooks(Duration::hours(within_hours))
                    .await?
                {
                    println!("{line}");
                }
            }
        }

        Ok(())
    }
}

fn print_event(event: &ClubEvent) {
    println!(
        "{} {} {} {}",
        event.start_time,
        event.end_time,
        event.title,
        event.location.as_deref().map(|v| &**v).unwrap_or("")
    );
}
