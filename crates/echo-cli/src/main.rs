//! `echo`: talk with a language model from the terminal.
//!
//! The microphone decides when you have stopped talking and when you talk
//! over the assistant. Transcripts come from stdin, one line per utterance.

mod cli;
mod config;
mod line_recognizer;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use echo_voice::local::{CpalCapturer, RodioPlayer};
use echo_voice::providers::{HttpSynthesizer, OpenAiChatModel};
use echo_voice::{
    ChatModel, ConversationEvent, ConversationOrchestrator, ConversationTurn, Role,
    SessionDevices, SessionState, SpeechSynthesizer, VoiceConfig, VoiceError,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::Cli;
use crate::line_recognizer::LineRecognizer;

fn main() -> anyhow::Result<()> {
    // Load .env before clap reads the environment.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = config::load(&cli)?;
    if cli.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(run(config))
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "info,echo_voice=debug,echo=debug"
    } else {
        "warn,echo_voice=info,echo=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .ok();
}

async fn run(config: VoiceConfig) -> anyhow::Result<()> {
    if config.model.api_key.is_none() {
        info!("No API key configured; requests go out unauthenticated");
    }
    let model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(config.model.clone())?);
    let synthesizer: Arc<dyn SpeechSynthesizer> =
        Arc::new(HttpSynthesizer::new(&config.synthesis)?);
    let devices = SessionDevices {
        recognizer: Box::new(LineRecognizer::stdin()),
        capturer: Box::new(CpalCapturer::new()),
        player: Box::new(RodioPlayer::open().context("Failed to open the speaker")?),
    };

    let (mut orchestrator, mut events) = ConversationOrchestrator::new(config, model, synthesizer);
    orchestrator
        .start_session(devices)
        .await
        .context("Failed to start the conversation")?;
    eprintln!("Listening. Type what you say, then pause. Ctrl-C to quit.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                render(&event);
                if event == ConversationEvent::StateChanged(SessionState::Inactive) {
                    break;
                }
            }
        }
    }

    match orchestrator.stop_session().await {
        Ok(()) | Err(VoiceError::NotActive) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn render(event: &ConversationEvent) {
    match event {
        ConversationEvent::UtteranceRendered(turn) => println!("{}", format_turn(turn)),
        ConversationEvent::Error(message) => eprintln!("error: {message}"),
        ConversationEvent::TurnDiscarded => eprintln!("(reply discarded)"),
        ConversationEvent::StateChanged(state) => debug!(?state, "State changed"),
        ConversationEvent::AudioLevel(_) => {}
    }
}

fn format_turn(turn: &ConversationTurn) -> String {
    let speaker = match turn.role {
        Role::User => "you",
        Role::Assistant => "echo",
    };
    if turn.complete {
        format!("{speaker}: {}", turn.content)
    } else if turn.content.is_empty() {
        format!("{speaker}: (interrupted)")
    } else {
        format!("{speaker}: {} (interrupted)", turn.content)
    }
}
