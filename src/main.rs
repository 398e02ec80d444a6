//! Interactive terminal chat over a bounded conversation memory

use anyhow::Context;
use conversation_context::config::{Config, LogFormat};
use conversation_context::context::{ConversationManager, TiktokenEstimator, TokenEstimator};
use conversation_context::metrics::METRICS;
use conversation_context::OpenAiCompletionClient;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config";
const EXIT_WORDS: [&str; 3] = ["exit", "quit", "close"];

fn is_exit_command(line: &str) -> bool {
    let line = line.trim();
    EXIT_WORDS.iter().any(|word| line.eq_ignore_ascii_case(word))
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn prompt() -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "You: ")?;
    stdout.flush()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("CONVERSE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(Some(&config_path)).context("failed to load configuration")?;
    init_tracing(&config);

    let estimator: Arc<dyn TokenEstimator> = Arc::new(
        TiktokenEstimator::for_model(&config.tokenizer.model)
            .context("failed to initialize tokenizer")?,
    );
    let service = Arc::new(
        OpenAiCompletionClient::new(&config.completion)
            .context("failed to create completion client")?,
    );
    let mut manager = ConversationManager::new(&config, service, estimator)?;

    info!(
        "Chatting with {} (strategy {:?}); type exit, quit or close to leave",
        config.completion.model, config.strategy
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if is_exit_command(&line) {
            break;
        }

        print!("AI:  ");
        std::io::stdout().flush()?;

        let mut on_chunk = |chunk: &str| {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        };

        match manager.run_turn(&line, &mut on_chunk).await {
            Ok(report) => {
                println!("\n");
                info!(
                    "Memory at {} tokens after evicting {} turns",
                    report.ledger_total,
                    report.eviction.evicted.len()
                );
                if let Err(e) = manager.check_budget(&report) {
                    error!("{}", e);
                    eprintln!("error: {}", e);
                }
            }
            Err(e) => {
                println!();
                error!("Turn failed: {}", e);
                eprintln!("error: {}", e);
            }
        }
    }

    manager.shutdown();
    debug!("Session metrics:\n{}", METRICS.export_prometheus());
    Ok(())
}
