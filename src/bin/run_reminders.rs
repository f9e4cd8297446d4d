//! Runs one reminder batch and exits.
//!
//! For deployments with several API instances: leave the in-process scheduler off and
//! call this from a single external cron instead.
//!
//! ```text
//! run_reminders tomorrow|today|followup
//! ```

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ysk_clinic_api::config::Config;
use ysk_clinic_api::db::Database;
use ysk_clinic_api::db_storage::ClinicStorage;
use ysk_clinic_api::models::clinic_today;
use ysk_clinic_api::notifications::NotificationManager;
use ysk_clinic_api::reminder_scheduler::{JobRun, ReminderJob, ReminderScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ysk_clinic_api=info,run_reminders=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let job: ReminderJob = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: run_reminders <tomorrow|today|followup>"))?
        .parse()
        .map_err(anyhow::Error::msg)?;

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;
    let notifications = Arc::new(NotificationManager::from_config(&config)?);
    let scheduler = ReminderScheduler::new(Arc::new(ClinicStorage::new(db.pool)), notifications);

    match scheduler.trigger(job, clinic_today()).await? {
        JobRun::Completed(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        JobRun::Skipped { job } => println!("{} batch already running, skipped", job.as_str()),
    }

    Ok(())
}
