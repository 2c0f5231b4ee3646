//! Asks the analytics assistant one question and streams the answer.

use std::io::Write as _;
use std::process::ExitCode;

use analytics_chat_stream::prelude::*;
use analytics_chat_stream::{JoinPrefixes, ResponseMetadata, smart_append};
use anyhow::Context as _;
use clap::Parser;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "analytics-chat",
    about = "Ask the analytics assistant and stream the answer"
)]
struct Cli {
    /// Backend origin; overrides ANALYTICS_CHAT_BASE_URL.
    #[arg(long)]
    base_url: Option<String>,
    /// Continue an existing conversation.
    #[arg(long)]
    conversation: Option<String>,
    /// Print status updates to stderr.
    #[arg(long)]
    show_status: bool,
    /// Print the finished assistant message as JSON instead of streaming text.
    #[arg(long)]
    json: bool,
    /// Question to ask.
    #[arg(required = true)]
    query: Vec<String>,
}

/// Writes streamed fragments to stdout with the same join rules the message
/// aggregator applies.
struct Printer {
    printed: String,
    prefixes: JoinPrefixes,
    show_status: bool,
    quiet: bool,
}

impl Printer {
    fn new(prefixes: JoinPrefixes, show_status: bool, quiet: bool) -> Self {
        Self {
            printed: String::new(),
            prefixes,
            show_status,
            quiet,
        }
    }
}

impl SessionCallbacks for Printer {
    fn on_status(&mut self, text: &str) {
        if self.show_status {
            eprintln!("[{text}]");
        }
    }

    fn on_chunk(&mut self, text: &str) {
        if self.quiet {
            return;
        }
        let joined = smart_append(&self.printed, text, &self.prefixes);
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(joined[self.printed.len()..].as_bytes());
        let _ = stdout.flush();
        self.printed = joined;
    }

    fn on_done(&mut self, _metadata: &ResponseMetadata) {
        if !self.quiet && !self.printed.is_empty() {
            println!();
        }
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig, StreamError> {
    match &cli.base_url {
        Some(url) => ClientConfig::new(url.clone()).apply_env(),
        None => ClientConfig::from_env(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    analytics_chat_stream::init_observability();
    let cli = Cli::parse();

    let config = load_config(&cli).context("loading client configuration")?;
    debug!(event = "cli.config_loaded", domain = "cli", url = %config.stream_url());
    let engine = StreamEngine::from_config(&config).context("building the stream engine")?;
    let mut notices = engine.subscribe();

    let interrupt = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.stop();
        }
    });

    let mut chat = ChatController::new(engine, config.clone());
    if let Some(id) = &cli.conversation {
        chat.navigate(Some(ConversationId::new(id.clone())));
    }

    let query = cli.query.join(" ");
    let stream = chat.submit(&query).context("starting the stream")?;
    let mut printer = Printer::new(config.join_prefixes.clone(), cli.show_status, cli.json);
    let state = chat.run(stream, &mut printer).await;

    while let Ok(notice) = notices.try_recv() {
        if let Notice::ConversationCreated(summary) = notice {
            eprintln!("new conversation {} ({})", summary.id, summary.title);
        }
    }

    if let Some(TranscriptEntry::Assistant(reply)) = chat.transcript().last() {
        if cli.json {
            println!("{}", serde_json::to_string_pretty(reply)?);
        } else {
            for result in &reply.results {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
        }
    }

    Ok(match state {
        SessionState::Completed => ExitCode::SUCCESS,
        SessionState::Cancelled => {
            eprintln!("cancelled");
            ExitCode::from(130)
        }
        _ => {
            if let Some(error) = chat.last_error() {
                eprintln!("error: {error}");
            }
            ExitCode::FAILURE
        }
    })
}
