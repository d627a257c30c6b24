//! `inolink-cli` – the inolink shell.
//!
//! 1. Loads `~/.inolink/config.toml` (writing the defaults on first run) and
//!    applies `INOLINK_*` overrides.
//! 2. Opens the configured port, or the built-in simulated board for `sim`.
//! 3. Drops the user into an interactive shell with slash-commands
//!    (`/read`, `/start`, `/stop`, `/led`, `/chart`, `/export`, `/help`).
//! 4. Intercepts Ctrl-C to stop polling, close the port, and exit.

mod app;
mod config;
mod repl;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use inolink_runtime::telemetry::{self, LogFormat};
use tracing::{error, warn};

use crate::app::App;

fn main() -> ExitCode {
    // Spans are exported by a simple (synchronous) exporter, so tracing can
    // come up before the Tokio runtime.
    let _guard = telemetry::init_tracing("inolink", LogFormat::from_env());

    print_banner();

    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    print!("\n  Opening {} … ", cfg.port.bold());
    std::io::stdout().flush().ok();
    let app = match rt.block_on(App::connect(&cfg)) {
        Ok(app) => {
            println!("{}", "connected".green());
            app
        }
        Err(e) => {
            println!("{}", "failed".red());
            println!("  {}", e);
            if !cfg.is_simulated() {
                println!("  Try {} to list ports, or set port = \"sim\".", "/ports".bold());
            }
            return ExitCode::FAILURE;
        }
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // While a command is running the line editor is not reading the
    // terminal, so SIGINT lands here instead of in the editor.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let poller = Arc::clone(app.controller.poller());
        let handle = rt.handle().clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – stopping …".yellow().bold());
            shutdown.store(true, Ordering::SeqCst);
            let poller = Arc::clone(&poller);
            handle.spawn(async move {
                poller.stop().await;
            });
        }) {
            warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    println!("  Polling {} every {}.", cfg.feature.bold(), cfg.interval.bold());
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&rt, &app, &cfg.feature, shutdown);

    rt.block_on(app.shutdown());
    println!("{}", "  ✓ Port closed.".green());
    ExitCode::SUCCESS
}

fn print_banner() {
    println!();
    println!("{}", r#"   _             ___       __    "#.bold().cyan());
    println!("{}", r#"  (_)__  ___   / (_)__   / /__  "#.bold().cyan());
    println!("{}", r#" / / _ \/ _ \ / / / _ \ /  '_/  "#.bold().cyan());
    println!("{}", r#"/_/_//_/\___//_/_/_//_//_/\_\   "#.bold().cyan());
    println!();
    println!("  {} {}", "inolink".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Arduino instrument shell");
    println!();
}
