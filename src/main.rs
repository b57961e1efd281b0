use anyhow::Error;

use club_calendar_lib::club_cli_opts::ClubCalendarCliOpts;

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();
    ClubCalendarCliOpts::parse_opts().await
}
