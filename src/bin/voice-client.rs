//! Terminal client for the relay.
//!
//! Sends a recorded audio file (`--audio`), a single prompt (`--prompt`), or
//! every line read from stdin, and prints replies as they stream in.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_relay::client::{ConversationView, HttpBackend, Message, Phase, TurnOutcome, VoiceSession};
use voice_relay::conversation::{OutputStyle, Role};

#[derive(Debug, Parser)]
#[command(name = "voice-client", version, about = "Talk to a voice-relay server")]
struct Args {
    /// Relay base URL
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Answer style: short or long
    #[arg(long, default_value_t = OutputStyle::Short)]
    style: OutputStyle,

    /// Recorded utterance to transcribe and ask about
    #[arg(long)]
    audio: Option<PathBuf>,

    /// MIME type of the recording
    #[arg(long, default_value = "audio/webm")]
    mime: String,

    /// Ask a single typed question and exit
    #[arg(long, conflicts_with = "audio")]
    prompt: Option<String>,
}

/// Prints new text as it arrives instead of redrawing the conversation.
#[derive(Debug, Default)]
struct TerminalView {
    /// Messages fully printed
    printed: usize,
    /// Text of the streaming tail already printed
    partial: String,
    /// Label of the streaming tail already printed
    labelled: bool,
}

impl TerminalView {
    fn label(role: Role) -> &'static str {
        match role {
            Role::User => "you",
            Role::Assistant => "assistant",
        }
    }
}

impl ConversationView for TerminalView {
    fn render(&mut self, messages: &[Message]) {
        let mut out = std::io::stdout().lock();
        // the store evicted from the front
        if self.printed > messages.len() {
            self.printed = messages.len();
            self.partial.clear();
            self.labelled = false;
        }

        for message in &messages[self.printed..] {
            if !self.labelled {
                let _ = write!(out, "{}: ", Self::label(message.role));
                self.labelled = true;
            }

            let content = &message.content;
            if let Some(rest) = content.strip_prefix(self.partial.as_str()) {
                let _ = write!(out, "{}", rest);
            } else {
                // streamed text was replaced by an apology
                let _ = write!(out, "\n{}: {}", Self::label(message.role), content);
            }

            if message.is_streaming {
                self.partial.clone_from(content);
                break;
            }
            let _ = writeln!(out);
            self.printed += 1;
            self.partial.clear();
            self.labelled = false;
        }

        let _ = out.flush();
    }

    fn phase_changed(&mut self, phase: Phase) {
        debug!(%phase, "Session phase");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let backend = HttpBackend::new(&args.server)?;
    let mut session = VoiceSession::new(backend, TerminalView::default()).with_style(args.style);

    if let Some(path) = &args.audio {
        let audio = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        session.start_recording()?;
        report(session.finish_recording(audio, &args.mime).await?);
        return Ok(());
    }

    if let Some(prompt) = &args.prompt {
        report(session.ask(prompt).await?);
        return Ok(());
    }

    info!(server = %args.server, style = %args.style, "Reading prompts from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        report(session.ask(&line).await?);
    }
    Ok(())
}

fn report(outcome: TurnOutcome) {
    match outcome {
        TurnOutcome::Answered => {}
        TurnOutcome::EmptyUtterance => info!("Nothing to ask"),
        TurnOutcome::TranscriptionFailed(reason) => warn!(%reason, "Transcription failed"),
        TurnOutcome::CompletionFailed => warn!("Reply failed"),
    }
}

/// Logs go to stderr so stdout carries only the conversation.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_relay=info,voice_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
