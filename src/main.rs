use anyhow::{bail, Context, Result};
use clap::Parser;
use glass_scout::{Agent, AgentConfig, BrowserConfig, ChromiumComputer, GeminiClient, GeminiConfig, JsonFileSink};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Drive a website toward a natural-language goal.
#[derive(Parser)]
#[command(name = "glass-scout")]
#[command(version)]
struct Cli {
    /// URL to start at (prompted for when omitted)
    #[arg(long, env = "SCOUT_URL")]
    url: Option<String>,

    /// What the agent should do (prompted for when omitted)
    #[arg(long, env = "SCOUT_GOAL")]
    goal: Option<String>,

    /// Step ceiling for the run
    #[arg(long, default_value_t = 10)]
    max_steps: usize,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,

    /// User agent override
    #[arg(long, env = "SCOUT_USER_AGENT")]
    user_agent: Option<String>,

    /// Where the collected results are written
    #[arg(long, default_value = "agent_results.json")]
    output: PathBuf,
}

fn ask(question: &str) -> Result<String> {
    print!("{question}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim().to_string();
    if answer.is_empty() {
        bail!("no answer given");
    }
    Ok(answer)
}

fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let url = match cli.url {
        Some(url) => url,
        None => ask("Enter the URL to start at (e.g. https://wikipedia.org): ")?,
    };
    let url = normalize_url(&url);
    let goal = match cli.goal {
        Some(goal) => goal,
        None => ask("What should I do? ")?,
    };

    let reasoner = GeminiClient::new(GeminiConfig::default()).context("reasoning service setup")?;
    let computer = ChromiumComputer::launch(BrowserConfig {
        headless: cli.headless,
        user_agent: cli.user_agent,
        ..Default::default()
    })
    .await
    .context("browser launch")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            on_interrupt.cancel();
        }
    });

    let cfg = AgentConfig { max_steps: cli.max_steps, ..Default::default() };
    let agent = Agent::new(computer, reasoner, JsonFileSink::new(&cli.output), cfg).with_cancellation(cancel);
    let result = agent.run(&goal, &url).await;

    if let Err(err) = agent.into_computer().close().await {
        warn!(error = %err, "browser did not close cleanly");
    }

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            error!(error = %err, "run could not start");
            std::process::exit(1);
        }
    };
    println!(
        "{} after {} steps, {} items collected{}",
        report.reason,
        report.steps.len(),
        report.scraped_items(),
        if report.persisted { format!(", saved to {}", cli.output.display()) } else { String::new() }
    );
    std::process::exit(report.exit_code());
}
