/* src/main.rs */

use anyhow::Result;
use dotenvy::dotenv;
use fancy_log::{LogLevel, set_log_level};
use lazy_motd::lazy_motd;
use std::env;
use tollgate::server;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let log_level = match level.to_lowercase().as_str() {
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    };
    set_log_level(log_level);
    lazy_motd!();

    server::run().await
}
