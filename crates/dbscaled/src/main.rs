//! dbscaled — one-step vertical scaling for clustered databases.
//!
//! Each invocation takes at most one trigger off the scaling queue, moves
//! the named instance (or, for a writer, its peer reader followed by a
//! failover) one class up, refreshes its alarms, and reports the result to
//! the chat webhooks.
//!
//! # Usage
//!
//! ```text
//! dbscaled check-config
//! dbscaled run --fixture cloud.toml
//! dbscaled simulate --fixture scenario.toml --polling-config fast.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dbscale_core::{PollingConfig, ScalerConfig};
use dbscale_engine::sim::{Notification, RecordingNotifier, SimCloud};
use dbscale_engine::{Collaborators, Notifier, Orchestrator, Outcome};

mod fixture;
mod notify;

use fixture::Fixture;
use notify::WebhookNotifier;

const DEFAULT_LOG_FILTER: &str = "info,dbscaled=debug,dbscale=debug";

#[derive(Parser)]
#[command(
    name = "dbscaled",
    about = "Vertical scaling for clustered databases",
    version,
    propagate_version = true
)]
struct Cli {
    /// TOML file with a [polling] table overriding poll intervals and deadlines.
    #[arg(long, global = true, env = "DBSCALE_POLLING_CONFIG")]
    polling_config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one invocation with environment configuration against a
    /// fixture-backed simulated cloud (no real instance is modified).
    ///
    /// Configuration and webhook notifications are real. The database,
    /// metrics, and queue control planes are the simulated ones loaded from
    /// the fixture file, so this is a dry run of the production flow.
    Run {
        #[arg(long)]
        fixture: PathBuf,
    },
    /// Validate the environment configuration and print it.
    CheckConfig,
    /// Run one invocation entirely against a simulated environment.
    ///
    /// Settings come from the fixture; notifications are printed instead
    /// of sent.
    Simulate {
        #[arg(long)]
        fixture: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let polling = load_polling(cli.polling_config.as_deref())?;

    match cli.command {
        Command::Run { fixture } => run(&fixture, polling).await,
        Command::CheckConfig => check_config(polling),
        Command::Simulate { fixture } => simulate(&fixture, polling).await,
    }
}

fn load_polling(path: Option<&Path>) -> Result<Option<PollingConfig>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let polling = PollingConfig::from_file(path)
        .with_context(|| format!("failed to load polling config {}", path.display()))?;
    info!(path = %path.display(), ?polling, "polling overrides loaded");
    Ok(Some(polling))
}

/// Load the configuration through `lookup`, reporting failures to the
/// alerts hook when that hook is itself available.
async fn load_config<F>(
    lookup: F,
    client: &Client,
    polling: Option<PollingConfig>,
) -> Result<ScalerConfig>
where
    F: Fn(&str) -> Option<String>,
{
    match ScalerConfig::from_lookup(&lookup) {
        Ok(config) => Ok(match polling {
            Some(polling) => config.with_polling(polling),
            None => config,
        }),
        Err(e) => {
            error!(error = %e, "invalid configuration");
            match notify::report_config_error(client, &lookup, &e).await {
                Ok(true) => info!("configuration alert sent"),
                Ok(false) => {}
                Err(notify_err) => error!(error = %notify_err, "failed to send configuration alert"),
            }
            Err(e).context("failed to load configuration from the environment")
        }
    }
}

async fn run(fixture: &Path, polling: Option<PollingConfig>) -> Result<()> {
    let config = load_config(|key| std::env::var(key).ok(), &Client::new(), polling).await?;
    let cloud = Arc::new(Fixture::load(fixture)?.build());
    let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(&config));

    info!(queue = %config.queue_url, environment = %config.environment, "dbscaled starting");
    let mut orchestrator = Orchestrator::new(config, collaborators(&cloud, notifier));
    match orchestrator.invoke().await? {
        Outcome::Idle => info!("nothing to do"),
        Outcome::Scaled(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn check_config(polling: Option<PollingConfig>) -> Result<()> {
    let config = ScalerConfig::from_env().context("invalid configuration")?;
    let config = match polling {
        Some(polling) => config.with_polling(polling),
        None => config,
    };
    let summary = json!({
        "instance_name_prefix": config.instance_name_prefix,
        "environment": config.environment,
        "queue_url": config.queue_url,
        "ratios": config.ratios,
        "polling": {
            "start_interval": format!("{:?}", config.polling.start_interval),
            "start_deadline": format!("{:?}", config.polling.start_deadline),
            "settle_interval": format!("{:?}", config.polling.settle_interval),
            "settle_deadline": format!("{:?}", config.polling.settle_deadline),
        },
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn simulate(path: &Path, polling: Option<PollingConfig>) -> Result<()> {
    let fixture = Fixture::load(path)?;
    let mut config = fixture.config();
    if let Some(polling) = polling {
        config = config.with_polling(polling);
    }
    let environment = config.environment.clone();

    let cloud = Arc::new(fixture.build());
    let notifier = Arc::new(RecordingNotifier::new());
    let mut orchestrator = Orchestrator::new(config, collaborators(&cloud, notifier.clone()));

    let result = orchestrator.invoke().await;

    let notifications: Vec<_> = notifier
        .sent()
        .iter()
        .map(|n| match n {
            Notification::Success(report) => notify::success_payload(report, &environment),
            Notification::Failure { title, error } => {
                notify::failure_payload(title, error, &environment)
            }
        })
        .collect();
    let outcome = match &result {
        Ok(Outcome::Idle) => json!({ "status": "idle" }),
        Ok(Outcome::Scaled(report)) => json!({ "status": "scaled", "report": report }),
        Err(e) => json!({ "status": "failed", "error": e.chain(), "retryable": e.is_retryable() }),
    };
    let summary = json!({
        "outcome": outcome,
        "stages": orchestrator.history().iter().map(|s| format!("{s:?}")).collect::<Vec<_>>(),
        "notifications": notifications,
        "pending_messages": cloud.pending_messages(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    result.map(|_| ()).context("simulated invocation failed")
}

fn collaborators(cloud: &Arc<SimCloud>, notifier: Arc<dyn Notifier>) -> Collaborators {
    Collaborators {
        queue: cloud.clone(),
        database: cloud.clone(),
        metrics: cloud.clone(),
        notifier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;

    use dbscale_core::config::{ENV_ALERTS_HOOK, ENV_ENVIRONMENT, ENV_INSTANCE_PREFIX};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one webhook request; returns its lowercased head and JSON body.
    async fn capture_one(listener: TcpListener) -> (String, serde_json::Value) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
        let length: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .map(|v| v.trim().parse().unwrap())
            .unwrap();
        while buf.len() < head_end + length {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before body");
            buf.extend_from_slice(&chunk[..n]);
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let body = serde_json::from_slice(&buf[head_end..head_end + length]).unwrap();
        (head, body)
    }

    #[tokio::test]
    async fn config_error_is_posted_to_alerts_hook() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hook = format!("http://{}/hooks/alerts", listener.local_addr().unwrap());
        let server = tokio::spawn(capture_one(listener));

        let env = HashMap::from([
            (ENV_ALERTS_HOOK, hook),
            (ENV_ENVIRONMENT, "staging".to_string()),
        ]);
        let err = load_config(|k| env.get(k).cloned(), &Client::new(), None)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains(ENV_INSTANCE_PREFIX));

        let (head, body) = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("no alert received")
            .unwrap();
        assert!(head.starts_with("post /hooks/alerts "), "{head}");
        assert!(head.contains("x-custom-header: aws-sns"), "{head}");

        let attachment = &body["attachments"][0];
        assert_eq!(body["username"], notify::USERNAME);
        assert_eq!(body["icon_url"], notify::ICON_URL);
        assert_eq!(attachment["color"], "#FF0000");
        assert_eq!(attachment["fields"][0]["title"], notify::CONFIG_ERROR_TITLE);
        assert_eq!(attachment["fields"][1]["title"], "Error Message");
        let message = attachment["fields"][1]["value"].as_str().unwrap();
        assert!(message.contains(ENV_INSTANCE_PREFIX), "{message}");
        assert_eq!(attachment["fields"][2]["value"], "staging");
    }

    #[tokio::test]
    async fn config_error_without_hook_is_not_posted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let env = HashMap::from([(ENV_ENVIRONMENT, "staging".to_string())]);
        let err = load_config(|k| env.get(k).cloned(), &Client::new(), None)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains(ENV_INSTANCE_PREFIX));

        let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err(), "unexpected webhook connection");
    }

    #[test]
    fn run_help_states_the_cloud_is_simulated() {
        use clap::CommandFactory;

        let cli = Cli::command();
        let run = cli.find_subcommand("run").unwrap();
        let about = run.get_about().unwrap().to_string();
        assert!(about.contains("simulated cloud"), "{about}");
        let long = run.get_long_about().unwrap().to_string();
        assert!(long.contains("dry run"), "{long}");
    }

    #[tokio::test]
    async fn valid_config_applies_polling_overrides() {
        let env = HashMap::from([
            ("RDSMultitenantDBInstanceNamePrefix", "rds-db".to_string()),
            ("Environment", "test".to_string()),
            ("MattermostNotificationsHook", "http://127.0.0.1:9/ok".to_string()),
            ("MattermostAlertsHook", "http://127.0.0.1:9/alert".to_string()),
            ("QueueURL", "sim://queue".to_string()),
            ("MemoryCacheProportion", "0.2".to_string()),
            ("ConnectionsSafetyPercentage", "0.8".to_string()),
            ("MemoryConnectionsDivider", "100".to_string()),
        ]);
        let polling = PollingConfig {
            start_interval: Duration::from_secs(1),
            ..PollingConfig::default()
        };
        let config = load_config(|k| env.get(k).cloned(), &Client::new(), Some(polling))
            .await
            .unwrap();
        assert_eq!(config.polling, polling);
        assert_eq!(config.instance_name_prefix, "rds-db");
    }

    #[test]
    fn parses_subcommands_and_global_flags() {
        let cli = Cli::try_parse_from([
            "dbscaled",
            "simulate",
            "--fixture",
            "scenario.toml",
            "--log-json",
            "--polling-config",
            "fast.toml",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.polling_config, Some(PathBuf::from("fast.toml")));
        assert!(matches!(cli.command, Command::Simulate { ref fixture } if fixture == Path::new("scenario.toml")));

        let cli = Cli::try_parse_from(["dbscaled", "check-config"]).unwrap();
        assert!(matches!(cli.command, Command::CheckConfig));

        assert!(Cli::try_parse_from(["dbscaled", "run"]).is_err());
        assert!(Cli::try_parse_from(["dbscaled"]).is_err());
    }

    #[test]
    fn polling_overrides_from_file() {
        assert_eq!(load_polling(None).unwrap(), None);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[polling]\nstart_interval = \"1s\"").unwrap();
        let polling = load_polling(Some(file.path())).unwrap().unwrap();
        assert_eq!(polling.start_interval, std::time::Duration::from_secs(1));
        assert_eq!(polling.settle_deadline, PollingConfig::default().settle_deadline);

        assert!(load_polling(Some(Path::new("/nonexistent/polling.toml"))).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn simulate_scales_reader_from_fixture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[settings]
instance_name_prefix = "rds-db-multitenant"

[[clusters]]
id = "c1"
members = [
    { id = "rds-db-multitenant-a", class = "db.r5.large", writer = true },
    { id = "rds-db-multitenant-b", class = "db.r5.large" },
]

[[triggers]]
instance = "rds-db-multitenant-b"
"#,
        )
        .unwrap();

        simulate(file.path(), None).await.unwrap();
    }

    #[tokio::test]
    async fn simulate_reports_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[[clusters]]
id = "c1"
members = [{ id = "db-a", class = "db.r5.24xlarge" }]

[[triggers]]
instance = "db-a"
"#,
        )
        .unwrap();

        let err = simulate(file.path(), None).await.unwrap_err();
        assert!(format!("{err:#}").contains("maximum usable size reached"));
    }
}
