//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `monitor <url>` -- watch a payment page until a terminal outcome
//! - `recharge` -- run the full portal flow, then monitor the payment
//! - `serve` -- expose the flow and monitor over HTTP
//! - `config show|get|set|path` -- read/write configuration
//! - `version` -- print build/version info

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

/// Portal recharge automation and payment-completion monitoring.
#[derive(Parser, Debug)]
#[command(
    name = "paywatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "paywatch — portal recharge automation and payment monitoring"
)]
pub struct Cli {
    /// Path to the configuration file (default: the user config dir).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch a payment page until it reaches a terminal outcome.
    Monitor {
        /// Gateway payment URL to open and watch.
        url: String,

        /// Max seconds to wait (default: from config).
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Append the event log to this JSONL file.
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Run the full recharge flow, then monitor the payment.
    Recharge {
        /// Portal login phone number.
        #[arg(long)]
        username: String,

        /// Portal account password.
        #[arg(long)]
        password: String,

        /// Number to recharge (may equal the login number).
        #[arg(long)]
        beneficiary: String,

        /// Recharge amount, for the card-payment variant.
        #[arg(long)]
        amount: Option<u32>,

        /// Scratch-card code, for the voucher variant.
        #[arg(long)]
        voucher_code: Option<String>,

        /// Max seconds to wait for the payment (default: from config).
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Start the HTTP API server.
    Serve {
        /// Port to listen on (default: from config).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Read or write configuration values.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the fully loaded configuration as JSON.
    Show,

    /// Print a specific configuration value by dot-notation path.
    Get {
        /// Dot-notation key (e.g. "monitor.timeoutSeconds").
        key: String,
    },

    /// Set a configuration value and write to disk.
    Set {
        /// Dot-notation key (e.g. "webdriver.endpoint").
        key: String,

        /// Value to set (interpreted as JSON; bare strings allowed).
        value: String,
    },

    /// Print the resolved configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

use crate::captcha::{CaptchaOracle, VisionOracle};
use crate::config;
use crate::driver::webdriver::{WebDriverFactory, WebDriverSession};
use crate::events::EventLog;
use crate::flow::{self, RechargeRequest};
use crate::logging;
use crate::monitor::PaymentMonitor;
use crate::server::{self, AppState};

/// Run the parsed CLI; returns the process exit code.
pub async fn run(cli: Cli) -> u8 {
    let path = cli.config.clone().unwrap_or_else(config::default_path);

    match cli.command {
        Command::Config(command) => handle_config(command, &path),
        Command::Version => {
            handle_version();
            0
        }
        command => {
            let cfg = match config::load(&path) {
                Ok(cfg) => cfg,
                Err(err) => {
                    eprintln!("error: {}", err);
                    return 2;
                }
            };
            logging::init(&cfg.logging);
            match command {
                Command::Monitor {
                    url,
                    timeout,
                    events,
                } => handle_monitor(cfg, url, timeout, events).await,
                Command::Recharge {
                    username,
                    password,
                    beneficiary,
                    amount,
                    voucher_code,
                    timeout,
                } => {
                    let request = RechargeRequest {
                        username,
                        password,
                        beneficiary,
                        amount,
                        voucher_code,
                    };
                    handle_recharge(cfg, request, timeout).await
                }
                Command::Serve { port } => handle_serve(cfg, port).await,
                // Config and Version are handled above.
                _ => unreachable!("subcommand already dispatched"),
            }
        }
    }
}

async fn handle_monitor(
    mut cfg: config::Config,
    url: String,
    timeout: Option<u64>,
    events: Option<PathBuf>,
) -> u8 {
    if let Some(timeout) = timeout {
        cfg.monitor.timeout_seconds = timeout;
    }

    let mut driver = match WebDriverSession::connect(&cfg.webdriver).await {
        Ok(driver) => driver,
        Err(err) => {
            eprintln!("error: {}", err);
            return 2;
        }
    };

    let mut monitor = PaymentMonitor::new(cfg.monitor, cfg.classifier);
    if let Some(path) = events {
        match EventLog::with_sink(&path) {
            Ok(log) => monitor = monitor.with_event_log(log),
            Err(err) => {
                eprintln!("error: cannot open {}: {}", path.display(), err);
                return 2;
            }
        }
    }

    let report = monitor.run(&mut driver, &url).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report.outcome).unwrap_or_default()
    );
    u8::from(!report.outcome.is_success())
}

async fn handle_recharge(
    mut cfg: config::Config,
    request: RechargeRequest,
    timeout: Option<u64>,
) -> u8 {
    if let Some(timeout) = timeout {
        cfg.monitor.timeout_seconds = timeout;
    }
    if request.amount.is_none() && request.voucher_code.is_none() {
        eprintln!("error: either --amount or --voucher-code is required");
        return 2;
    }

    let factory = WebDriverFactory::new(cfg.webdriver.clone());
    let oracle: Option<Arc<dyn CaptchaOracle>> = match VisionOracle::new(cfg.captcha.clone()) {
        Ok(oracle) => Some(Arc::new(oracle)),
        Err(err) => {
            tracing::warn!(error = %err, "captcha oracle unavailable");
            None
        }
    };

    let report = flow::recharge_and_monitor(&factory, oracle.as_deref(), &request, &cfg).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).unwrap_or_default()
    );
    u8::from(!report.success)
}

async fn handle_serve(mut cfg: config::Config, port: Option<u16>) -> u8 {
    if let Some(port) = port {
        cfg.server.port = port;
    }

    let factory = Arc::new(WebDriverFactory::new(cfg.webdriver.clone()));
    let oracle: Option<Arc<dyn CaptchaOracle>> = match VisionOracle::new(cfg.captcha.clone()) {
        Ok(oracle) => Some(Arc::new(oracle)),
        Err(err) => {
            tracing::warn!(error = %err, "captcha oracle unavailable");
            None
        }
    };

    let state = Arc::new(AppState::new(cfg, factory, oracle));
    match server::serve(state).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err);
            2
        }
    }
}

fn handle_config(command: ConfigCommand, path: &std::path::Path) -> u8 {
    match command {
        ConfigCommand::Show => match config::load(path) {
            Ok(cfg) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&cfg).unwrap_or_default()
                );
                0
            }
            Err(err) => {
                eprintln!("error: {}", err);
                2
            }
        },
        ConfigCommand::Get { key } => match config::load(path) {
            Ok(cfg) => match config::get_value(&cfg, &key) {
                Ok(value) => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&value).unwrap_or_default()
                    );
                    0
                }
                Err(err) => {
                    eprintln!("error: {}", err);
                    1
                }
            },
            Err(err) => {
                eprintln!("error: {}", err);
                2
            }
        },
        ConfigCommand::Set { key, value } => {
            let mut cfg = match config::load(path) {
                Ok(cfg) => cfg,
                Err(err) => {
                    eprintln!("error: {}", err);
                    return 2;
                }
            };
            if let Err(err) = config::set_value(&mut cfg, &key, &value) {
                eprintln!("error: {}", err);
                return 1;
            }
            if let Err(err) = config::save(&cfg, path) {
                eprintln!("error: {}", err);
                return 2;
            }
            0
        }
        ConfigCommand::Path => {
            println!("{}", path.display());
            0
        }
    }
}

fn handle_version() {
    println!(
        "paywatch {} ({} {})",
        env!("CARGO_PKG_VERSION"),
        env!("PAYWATCH_GIT_HASH"),
        env!("PAYWATCH_BUILD_DATE")
    );
}
