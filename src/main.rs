use std::sync::Arc;
use anyhow::Context;
use bb8_postgres::bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use bb8_postgres::tokio_postgres::NoTls;
use clap::Parser;
use dotenv::dotenv;
use tracing::info;
use crate::config::Config;
use crate::controller::AppState;
use crate::repositories::postgres_repo::PostgresConnectionRepo;
use crate::services::notification::EmailOutbox;
use crate::services::payment::CheckoutClient;

pub mod config;
pub mod controller;
pub mod helpers;
pub mod models;
pub mod repositories;
pub mod services;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::parse();
    info!("Starting traveler cargo backend in {} mode", config.environment);

    let manager = PostgresConnectionManager::new_from_stringlike(&config.database_url, NoTls)
        .context("Invalid DATABASE_URL")?;
    let postgres_connection = Pool::builder()
        .max_size(config.database_pool_size)
        .build(manager)
        .await
        .context("Failed to build postgres connection pool")?;
    PostgresConnectionRepo::new(postgres_connection.clone())
        .bootstrap_schema()
        .await?;

    let payment_gateway = Arc::new(CheckoutClient::new(&config)?);
    let notifier = Arc::new(EmailOutbox::start(&config)?);

    controller::serve(AppState {
        postgres_connection,
        config: Arc::new(config),
        payment_gateway,
        notifier,
    }).await
}
