use std::env;
use std::sync::Arc;

use chrono::Utc;
use outbox_deduplication::{
    CleanupMetrics, CleanupSettings, LoggingCriticalError, OutboxCleaner, OutboxStorage,
    RetentionPolicy, SqlxOutboxPersister,
};
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!("  outbox-cleaner run <DATABASE_URL> <ENDPOINT>");
    eprintln!("  outbox-cleaner purge-once <DATABASE_URL> <ENDPOINT>");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        usage();
    }

    let settings = CleanupSettings::from_env();
    let db_url = &args[2];
    let endpoint = args[3].as_str();

    match args[1].as_str() {
        "run" => {
            let pool = PgPool::connect(db_url).await?;
            let persister = Arc::new(SqlxOutboxPersister::new(pool, endpoint));
            let mut cleaner = OutboxCleaner::new(persister, Arc::new(LoggingCriticalError))
                .with_metrics(CleanupMetrics::new(endpoint));

            cleaner.start(&settings)?;
            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
            cleaner.stop().await;
        }
        "purge-once" => {
            let policy = RetentionPolicy::resolve(&settings)?;
            let pool = PgPool::connect(db_url).await?;
            let persister = SqlxOutboxPersister::new(pool, endpoint);
            let cutoff = policy.cutoff(Utc::now());
            let count = persister.remove_entries_older_than(cutoff).await?;
            println!("Removed {} outbox records dispatched before {}", count, cutoff);
        }
        _ => usage(),
    }

    Ok(())
}
