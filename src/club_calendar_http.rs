use anyhow::Error;

use club_calendar_http::app::start_app;

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();
    start_app().await.map_err(Into::into)
}
