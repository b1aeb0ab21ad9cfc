// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::select;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use logship::agent::Agent;
use logship::checkpoint::CheckpointStore;
use logship::config::{Config, LogFormat};
use logship::follower::{FileFollower, FollowerConfig};
use logship::router::{Router, RouterConfig};
use logship::sinks::{BlackholeSink, HttpNdjsonConfig, HttpNdjsonSink, Sink};

#[derive(Debug, Parser)]
#[command(name = "logship", version, about = "Log tailing agent with checkpointed delivery")]
struct Arguments {
    /// Path to the configuration file
    #[arg(default_value = "logship.conf")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let config = match Config::load(&opt.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::from(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("ERROR: {}", e);
        return ExitCode::from(1);
    }

    let _logger = match setup_logging(&config.log_level, config.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    info!(config = %opt.config.display(), "starting logship");

    let mut agent = match build_agent(&config) {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "initialization failed");
            return ExitCode::from(1);
        }
    };

    // The checkpoint decides where we resume; a damaged one is fatal and is
    // never overwritten here.
    if let Err(e) = agent.start() {
        error!(error = %e, "checkpoint load failed");
        return ExitCode::from(1);
    }

    match run_agent(agent) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "agent failed");
            ExitCode::from(1)
        }
    }
}

fn build_agent(config: &Config) -> Result<Agent, Box<dyn Error + Send + Sync>> {
    let sink: Arc<dyn Sink> = if config.sink_url.trim().is_empty() {
        let name = if config.sink_name.is_empty() {
            "blackhole"
        } else {
            config.sink_name.as_str()
        };
        info!(sink = name, "no sink url configured, using blackhole sink");
        Arc::new(BlackholeSink::new(name))
    } else {
        let name = if config.sink_name.is_empty() {
            "ndjson".to_string()
        } else {
            config.sink_name.clone()
        };
        Arc::new(HttpNdjsonSink::new(HttpNdjsonConfig {
            name,
            url: config.sink_url.clone(),
            timeout: config.sink_timeout,
            assume_durable_on_2xx: config.sink_assume_durable,
        })?)
    };

    let sink_name = sink.name().to_string();
    let mut router = Router::new(RouterConfig {
        ack_policy: config.ack_policy,
        primary_sink_name: Some(sink_name.clone()),
        default_sink_names: vec![sink_name],
        rules: Vec::new(),
    });
    router.add_sink(sink);
    router.validate()?;

    let follower = FileFollower::new(
        &config.input_path,
        FollowerConfig {
            poll_interval: config.poll_interval,
            rotate_settle_time: config.rotate_settle_time,
            max_read_bytes: config.max_read_bytes,
        },
    );
    let store = CheckpointStore::new(&config.checkpoint_path);

    Ok(Agent::new(
        follower,
        router,
        store,
        config.labels.clone(),
        config.poll_interval,
    ))
}

/// The runtime exists only to wait for signals; the agent ticks on its own
/// OS thread and checks the token between ticks.
#[tokio::main]
async fn run_agent(mut agent: Agent) -> Result<(), Box<dyn Error + Send + Sync>> {
    let cancel = CancellationToken::new();
    let agent_cancel = cancel.clone();
    let handle = std::thread::spawn(move || agent.run(agent_cancel));

    signal_wait().await;
    info!("shutdown signal received, finishing current tick");
    cancel.cancel();

    if handle.join().is_err() {
        return Err("agent thread panicked".into());
    }
    Ok(())
}

async fn signal_wait() {
    let mut sig_term = sig(SignalKind::terminate());
    let mut sig_int = sig(SignalKind::interrupt());

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

fn sig(kind: SignalKind) -> Signal {
    signal(kind).expect("unable to install signal handler")
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_level: &str, log_format: LogFormat) -> std::io::Result<LoggerGuard> {
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    if log_format == LogFormat::Json {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking_writer);

        let subscriber = Registry::default()
            .with(EnvFilter::new(log_level))
            .with(json_layer);
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .compact();

        let subscriber = Registry::default()
            .with(EnvFilter::new(log_level))
            .with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    }

    Ok(guard)
}
