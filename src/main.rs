use clap::Parser;
use futuresbot::config::load_trader_configs;
use futuresbot::logger::{self, LogTag};
use futuresbot::trader::TraderManager;

/// AI-driven crypto perpetual futures trading engine
#[derive(Parser)]
#[command(name = "futuresbot", version, about)]
struct Args {
    /// Path to the trader configuration file (JSON array of traders)
    #[arg(short, long, default_value = "traders.json")]
    config: String,

    /// Directory for per-trader decision journals
    #[arg(long, default_value = "decision_logs")]
    journal_dir: String,
}

#[tokio::main]
async fn main() {
    logger::init();
    let args = Args::parse();

    let configs = match load_trader_configs(&args.config) {
        Ok(configs) => configs,
        Err(err) => {
            logger::error(LogTag::Config, &format!("cannot load {}: {}", args.config, err));
            std::process::exit(1);
        }
    };
    if configs.is_empty() {
        logger::error(LogTag::Config, "no traders configured");
        std::process::exit(1);
    }

    let manager = TraderManager::with_journal_root(&args.journal_dir);
    for config in configs {
        let id = config.id.clone();
        if let Err(err) = manager.start(config).await {
            logger::error(LogTag::Trader, &format!("failed to start '{}': {}", id, err));
        }
    }

    let running = manager.running_ids().await;
    if running.is_empty() {
        logger::error(LogTag::Trader, "no traders running, exiting");
        std::process::exit(1);
    }
    logger::info(
        LogTag::System,
        &format!("{} trader(s) running: {}", running.len(), running.join(", ")),
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        logger::error(LogTag::System, &format!("signal handler failed: {}", err));
    }
    logger::info(LogTag::System, "shutting down");
    manager.stop_all().await;
    logger::flush();
}
