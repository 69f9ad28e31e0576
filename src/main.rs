use std::process::ExitCode;
use std::sync::Arc;

use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use talkback::chat::{CredentialSource, OpenAiChatClient};
use talkback::session::{Conversation, Role};
use talkback::store::{SqliteStore, VoicePreferences};
use talkback::voice::{
    Availability, MutedSpeech, NoTranscription, SpeechOutput, TranscriptionSource, VoiceStatus,
};
use talkback::{Collaborators, Config, LocalStorage, SessionController, SessionEvent, db};

/// Talkback - talk to a chat model and hear it answer
#[derive(Parser)]
#[command(name = "talkback", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice features (typed chat only)
    #[arg(long, env = "TALKBACK_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat (default)
    Chat {
        /// Continue a stored conversation
        #[arg(short, long)]
        resume: Option<String>,
    },
    /// List stored conversations
    History,
    /// Show or reset cumulative token usage
    Usage {
        /// Reset the counter to zero
        #[arg(long)]
        reset: bool,
    },
    /// Show or change speech rate and pitch
    Voice {
        /// Speaking rate (0.1 - 1.0, 0.5 is normal)
        #[arg(long)]
        rate: Option<f64>,
        /// Pitch multiplier (0.5 - 2.0)
        #[arg(long)]
        pitch: Option<f64>,
        /// Restore the defaults
        #[arg(long, conflicts_with_all = ["rate", "pitch"])]
        reset: bool,
    },
    /// Store the API key used for chat and voice requests
    SetKey {
        /// API key; pass "" to clear
        key: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,talkback=info",
        1 => "info,talkback=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.disable_voice);
    tracing::debug!(?config, "loaded configuration");

    let pool = db::init(config.db_path())?;
    let storage = LocalStorage::new(Arc::new(SqliteStore::new(pool)));

    match cli.command.unwrap_or(Command::Chat { resume: None }) {
        Command::Chat { resume } => chat(&config, storage, resume.as_deref()).await,
        Command::History => {
            print_history(&storage);
            Ok(())
        }
        Command::Usage { reset } => usage(&storage, reset),
        Command::Voice { rate, pitch, reset } => voice(&storage, rate, pitch, reset),
        Command::SetKey { key } => {
            storage.credentials().set_api_key(&key)?;
            println!("API key {}", if key.trim().is_empty() { "cleared" } else { "saved" });
            Ok(())
        }
    }
}

/// Interactive chat loop
async fn chat(config: &Config, storage: LocalStorage, resume: Option<&str>) -> anyhow::Result<()> {
    let credential = storage
        .credentials()
        .into_source(config.openai_api_key.clone());
    let client = OpenAiChatClient::new(
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.timeout,
        Arc::clone(&credential),
    )?;
    let (transcription, speech) = voice_collaborators(config, credential);

    let mut controller = SessionController::new(Collaborators {
        client: Arc::new(client),
        transcription,
        speech,
        storage: storage.clone(),
    });

    if let Some(id) = resume {
        let Some(conversation) = storage.conversations().find(id) else {
            anyhow::bail!("no stored conversation with id {id}");
        };
        controller.select_past_conversation(&conversation);
    }

    tracing::info!(model = %config.llm.model, "talkback ready");
    print_conversation(&controller);
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut controller, &storage, line.trim()) {
                    break;
                }
            }
            Some(event) = controller.next_event() => print_event(&event),
        }
    }

    Ok(())
}

/// Apply one line of input; returns `false` to quit
fn handle_line(controller: &mut SessionController, storage: &LocalStorage, line: &str) -> bool {
    let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
    let arg = arg.trim();

    let outcome = match command {
        "" => Ok(()),
        "/quit" | "/exit" => return false,
        "/help" => {
            print_help();
            Ok(())
        }
        "/new" => {
            controller.start_new_conversation();
            print_conversation(controller);
            Ok(())
        }
        "/record" => controller.begin_recording().map(|()| println!("(listening, /stop to finish)")),
        "/stop" => controller.end_recording(),
        "/send" => controller.dispatch_message(),
        "/history" => {
            print_history(storage);
            Ok(())
        }
        "/resume" => {
            match storage.conversations().find(arg) {
                Some(conversation) => {
                    controller.select_past_conversation(&conversation);
                    print_conversation(controller);
                }
                None => println!("! no stored conversation with id {arg}"),
            }
            Ok(())
        }
        "/say" => match arg.parse::<usize>().ok().and_then(|n| {
            controller.state().turns.get(n.checked_sub(1)?).map(|t| t.id().to_string())
        }) {
            Some(id) => controller.speak_turn(&id),
            None => {
                println!("! usage: /say <turn number>");
                Ok(())
            }
        },
        "/usage" => {
            print_usage(storage);
            Ok(())
        }
        _ if command.starts_with('/') => {
            println!("! unknown command {command}, try /help");
            Ok(())
        }
        _ => controller.send_text(line),
    };

    if let Err(e) = outcome {
        println!("! {e}");
    }
    true
}

#[cfg(feature = "audio")]
fn voice_collaborators(
    config: &Config,
    credential: CredentialSource,
) -> (Arc<dyn TranscriptionSource>, Arc<dyn SpeechOutput>) {
    use talkback::voice::{
        AudioCapture, SpeechToText, StreamingTranscriber, SynthesizedSpeech, TextToSpeech,
        microphone_input,
    };

    if !config.voice.enabled {
        return disabled_voice(Availability::Denied);
    }

    let stt = SpeechToText::with_base_url(
        &config.llm.base_url,
        Arc::clone(&credential),
        config.voice.stt_model.clone(),
    );
    let status = VoiceStatus {
        recognition: if stt.has_credential() {
            Availability::Authorized
        } else {
            Availability::NotDetermined
        },
        audio: match AudioCapture::new() {
            Ok(_) => Availability::Authorized,
            Err(e) => {
                tracing::warn!(error = %e, "microphone unavailable");
                Availability::Denied
            }
        },
    };

    let transcription: Arc<dyn TranscriptionSource> = if status.is_enabled() {
        Arc::new(StreamingTranscriber::new(
            Arc::new(stt),
            microphone_input(),
            config.voice.partial_interval,
            status,
        ))
    } else {
        Arc::new(NoTranscription::new(status))
    };
    tracing::debug!(
        partial_interval = ?config.voice.partial_interval,
        enabled = status.is_enabled(),
        "voice input configured"
    );

    let tts = TextToSpeech::new_openai(
        credential,
        config.voice.tts_voice.clone(),
        config.voice.tts_model.clone(),
    );
    let speech: Arc<dyn SpeechOutput> = match SynthesizedSpeech::new(tts) {
        Ok(speech) => Arc::new(speech),
        Err(e) => {
            tracing::warn!(error = %e, "speech output unavailable");
            Arc::new(MutedSpeech)
        }
    };

    (transcription, speech)
}

#[cfg(not(feature = "audio"))]
fn voice_collaborators(
    config: &Config,
    _credential: CredentialSource,
) -> (Arc<dyn TranscriptionSource>, Arc<dyn SpeechOutput>) {
    if config.voice.enabled {
        tracing::info!("built without the audio feature, voice is unavailable");
        disabled_voice(Availability::Restricted)
    } else {
        disabled_voice(Availability::Denied)
    }
}

fn disabled_voice(
    availability: Availability,
) -> (Arc<dyn TranscriptionSource>, Arc<dyn SpeechOutput>) {
    let status = VoiceStatus {
        recognition: availability,
        audio: availability,
    };
    (Arc::new(NoTranscription::new(status)), Arc::new(MutedSpeech))
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::TranscriptUpdated { text, is_final } => {
            if *is_final {
                println!("you (voice): {text}  [/send to send]");
            } else {
                println!("  ... {text}");
            }
        }
        SessionEvent::RecordingStopped { error } => match error {
            Some(e) => println!("! recording failed: {e}"),
            None => println!("(recording stopped)"),
        },
        SessionEvent::ReplyReceived(turn) => println!("{}: {}", turn.role(), turn.text()),
        SessionEvent::DispatchFailed(e) => println!("! not sent: {e}"),
        SessionEvent::StaleReplyDiscarded { .. } => {}
    }
}

fn print_conversation(controller: &SessionController) {
    let state = controller.state();
    println!("== {} ({}) ==", state.date_label(), state.conversation_id);
    for (n, turn) in state.turns.iter().enumerate() {
        match turn.role() {
            Role::System => println!("[{}] {}", n + 1, turn.text().replace('\n', " | ")),
            role => println!("[{}] {role}: {}", n + 1, turn.text()),
        }
    }
}

fn print_history(storage: &LocalStorage) {
    let conversations = storage.conversations().list();
    if conversations.is_empty() {
        println!("no stored conversations");
        return;
    }

    for conversation in &conversations {
        println!("{}", history_line(conversation));
    }
}

fn history_line(conversation: &Conversation) -> String {
    format!(
        "{}  {}  {}",
        conversation.conversation_id,
        conversation
            .updated_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M"),
        conversation.title().unwrap_or("(no user turns)")
    )
}

fn print_usage(storage: &LocalStorage) {
    let usage = storage.usage();
    println!(
        "{} tokens used (about ${:.4})",
        usage.total(),
        usage.estimated_cost()
    );
}

fn usage(storage: &LocalStorage, reset: bool) -> anyhow::Result<()> {
    if reset {
        storage.usage().reset()?;
    }
    print_usage(storage);
    Ok(())
}

fn voice(
    storage: &LocalStorage,
    rate: Option<f64>,
    pitch: Option<f64>,
    reset: bool,
) -> anyhow::Result<()> {
    let preferences = if reset {
        VoicePreferences::reset(storage)?
    } else {
        let mut preferences = VoicePreferences::load(storage);
        if let Some(rate) = rate {
            preferences = preferences.with_rate(rate);
        }
        if let Some(pitch) = pitch {
            preferences = preferences.with_pitch(pitch);
        }
        if rate.is_some() || pitch.is_some() {
            preferences.save(storage)?;
        }
        preferences
    };

    println!("rate {:.2}, pitch {:.2}", preferences.rate, preferences.pitch);
    Ok(())
}

fn print_help() {
    println!("Type a message and press enter to send it.");
    println!("  /record   start voice input      /stop     stop voice input");
    println!("  /send     send voice input       /say N    speak turn N again");
    println!("  /new      new conversation       /history  stored conversations");
    println!("  /resume ID                       /usage    token usage");
    println!("  /quit");
}
