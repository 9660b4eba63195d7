use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use mlm_referrals::repositories::{MemoryStore, PgStore, Store};
use mlm_referrals::{services, settings};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Overrides `server.listen` from the config file.
    #[arg(short, long)]
    listen: Option<String>,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_logging(&args.log4rs)?;
    log::info!("Starting MLM referral service.");

    let mut settings = settings::Settings::new(&args.config)
        .with_context(|| format!("Could not load config file {}.", args.config))?;
    if let Some(listen) = args.listen {
        settings.server.listen = listen;
    }

    let store: Arc<dyn Store> = match &settings.postgres {
        Some(postgres) => {
            let conn = PgPoolOptions::new()
                .max_connections(postgres.max_connections)
                .connect(&postgres.url)
                .await
                .context("Could not connect to database.")?;

            let store = PgStore::new(conn);
            store
                .run_migrations()
                .await
                .context("Could not run migrations.")?;
            log::info!("Connected to PostgreSQL.");
            Arc::new(store)
        }
        None => {
            log::warn!("No [postgres] section configured, keeping data in memory.");
            Arc::new(MemoryStore::new())
        }
    };

    services::start_services(store, settings).await
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
