#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `flowbench`: command-line front end of the heated-flow bench.

mod cli;
mod error_fmt;
mod export;
mod observer;
mod rt;
mod run;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bench_core::{Observer, TracingObserver};
use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::observer::JsonLinesObserver;
use crate::run::{Control, RtOpts, RunOpts};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(err) = real_main(cli) {
        tracing::error!(error = %format!("{err:#}"), "flowbench failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let cfg = bench_config::load_file(&cli.config)?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    match cli.cmd {
        Commands::PrintConfig => {
            let text = if cli.json {
                serde_json::to_string_pretty(&cfg)?
            } else {
                toml::to_string_pretty(&cfg).wrap_err("render config")?
            };
            println!("{text}");
        }
        Commands::SelfCheck => {
            let check = run::self_check(&cfg, cli.simulate)?;
            if cli.json {
                println!("{}", check.to_json());
            } else {
                check.print_human();
            }
        }
        Commands::Run {
            duty,
            pid,
            setpoint,
            flow,
            duration_s,
            csv,
            rt,
            rt_prio,
            rt_lock,
            rt_cpu,
        } => {
            let control = match (duty, setpoint) {
                (Some(duty), _) => Control::Manual { duty },
                (None, Some(setpoint)) if pid => Control::Pid { setpoint },
                _ => eyre::bail!("either --duty or --pid --setpoint is required"),
            };
            let duration = duration_s
                .map(|s| {
                    Duration::try_from_secs_f64(s)
                        .map_err(|_| eyre::eyre!("--duration-s must be a non-negative number"))
                })
                .transpose()?;
            let opts = RunOpts {
                control,
                flow_slm: flow,
                duration,
                csv,
                rt: RtOpts {
                    enabled: rt,
                    prio: rt_prio,
                    lock: rt_lock,
                    cpu: rt_cpu,
                },
            };

            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let flag = shutdown.clone();
                ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                    .wrap_err("install Ctrl-C handler")?;
            }

            let observer: Arc<dyn Observer> = if cli.json {
                Arc::new(JsonLinesObserver::new(std::io::stdout()))
            } else {
                Arc::new(TracingObserver)
            };
            let setup = run::build_setup(&cfg, cli.simulate, observer)?;
            let summary = run::run(&setup, &opts, &shutdown)?;
            if cli.json {
                println!("{}", summary.to_json());
            } else {
                summary.print_human();
            }
        }
    }
    Ok(())
}

/// Console logs go to stderr so stdout stays machine-readable.
fn init_tracing(json: bool, level: &str, logging: &bench_config::Logging) -> eyre::Result<()> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };

    let file = match &logging.file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {}", path.display()))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let file_filter = EnvFilter::new(logging.level.as_deref().unwrap_or("info"));
            Some(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(file_filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| eyre::eyre!("init tracing: {e}"))
}
