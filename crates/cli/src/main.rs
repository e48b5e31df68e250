//! `jobwire` -- invoke a job on a remote worker from the command line.
//!
//! Opens one WebSocket connection to the worker, sends the job (or
//! `--repeat` concurrent copies of it) and prints one JSON line per
//! outcome on stdout. Logs go to stderr.
//!
//! # Environment variables
//!
//! | Variable                       | Required | Default                         | Description                         |
//! |--------------------------------|----------|---------------------------------|-------------------------------------|
//! | `JOBWIRE_URL`                  | no       | `ws://localhost:3000/websocket` | Worker WebSocket endpoint           |
//! | `JOBWIRE_CONNECT_TIMEOUT_SECS` | no       | `10`                            | Handshake timeout                   |
//! | `JOBWIRE_INVOKE_TIMEOUT_SECS`  | no       | --                              | Per-invocation timeout              |
//! | `JOBWIRE_KEEPALIVE_SECS`       | no       | --                              | Ping interval while connected       |
//!
//! Command-line flags take precedence over the environment.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use jobwire_client::{ClientConfig, InvocationClient};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "jobwire")]
#[command(about = "Invoke a named job on a remote worker")]
struct Args {
    /// Job name (at most 8 bytes)
    job: String,

    /// Job parameters as a JSON object
    #[arg(default_value = "{}")]
    params: String,

    /// Worker WebSocket URL (overrides JOBWIRE_URL)
    #[arg(long)]
    url: Option<String>,

    /// Seconds to wait for each result (overrides JOBWIRE_INVOKE_TIMEOUT_SECS)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Number of concurrent invocations to issue over the one connection
    #[arg(long, default_value_t = 1)]
    repeat: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobwire=info,jobwire_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::from_env().context("Invalid configuration")?;
    if let Some(url) = args.url {
        config.url = url;
    }
    if let Some(secs) = args.timeout_secs {
        config.invoke_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    let params: Value =
        serde_json::from_str(&args.params).context("PARAMS must be valid JSON")?;

    tracing::info!(
        url = %config.url,
        job = %args.job,
        repeat = args.repeat,
        "Starting jobwire",
    );

    let client = InvocationClient::new(config);
    client
        .connect()
        .await
        .with_context(|| format!("Could not reach worker at {}", client.config().url))?;

    let calls = (0..args.repeat).map(|index| {
        let client = &client;
        let job = args.job.as_str();
        let params = params.clone();
        async move { (index, client.invoke(job, params).await) }
    });
    let outcomes = futures::future::join_all(calls).await;

    let mut failed = 0;
    for (index, outcome) in outcomes {
        let line = match outcome {
            Ok(result) => json!({"index": index, "status": "success", "result": result}),
            Err(e) => {
                failed += 1;
                json!({"index": index, "status": "error", "message": e.to_string()})
            }
        };
        println!("{line}");
    }

    client.close();

    if failed > 0 {
        bail!("{failed} of {} invocations failed", args.repeat);
    }
    Ok(())
}
