use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use live_voice::core::live::{EventKind, LiveClient, LiveEvent, OUTPUT_SAMPLE_RATE, Part, callback};
use live_voice::core::playback::{AudioSink, AudioStreamer, WavFileSink};
use live_voice::core::rag::{
    Embedder, GeminiEmbedder, GeminiEmbedderConfig, HashingEmbedder, OutboundRewriter,
    RagDocument, RagRewriter, RagService,
};
use live_voice::core::transcription::{
    GeminiTranscriber, GeminiTranscriberConfig, Transcriber, WhisperTranscriber,
    WhisperTranscriberConfig,
};
use live_voice::config::TranscriptionProvider;
use live_voice::{ClientConfig, LiveSession};

/// Live voice client for Gemini-Live-style services
#[derive(Parser, Debug)]
#[command(name = "live-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one prompt, play or record the reply, print the session record
    Chat {
        /// Prompt sent as the first user turn
        #[arg(short = 'p', long = "prompt", default_value = "Hello")]
        prompt: String,

        /// Text files added to the knowledge base
        #[arg(short = 'd', long = "document", value_name = "FILE")]
        documents: Vec<PathBuf>,

        /// Scope the knowledge base to this patient id
        #[arg(long = "patient")]
        patient: Option<String>,

        /// Write the reply audio to a WAV file instead of the speakers
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,

        /// Embed documents locally instead of calling the embedding API
        #[arg(long = "offline-embeddings")]
        offline_embeddings: bool,

        /// Give up waiting for the reply after this many seconds
        #[arg(long = "wait-secs", default_value_t = 30)]
        wait_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(&config_path)?
    } else {
        ClientConfig::from_env()?
    };

    match cli.command {
        Commands::Chat {
            prompt,
            documents,
            patient,
            output,
            offline_embeddings,
            wait_secs,
        } => {
            let options = ChatOptions {
                prompt,
                documents,
                patient,
                output,
                offline_embeddings,
                wait: Duration::from_secs(wait_secs),
            };
            chat(config, options).await
        }
    }
}

struct ChatOptions {
    prompt: String,
    documents: Vec<PathBuf>,
    patient: Option<String>,
    output: Option<PathBuf>,
    offline_embeddings: bool,
    wait: Duration,
}

async fn chat(config: ClientConfig, options: ChatOptions) -> anyhow::Result<()> {
    let api_key = config.require_gemini_api_key()?.to_string();

    let client = Arc::new(LiveClient::new(config.live_endpoint()));
    client.on(
        EventKind::Log,
        callback(|event| async move {
            if let LiveEvent::Log(log) = event {
                debug!(kind = %log.kind, payload = %log.payload, "live event");
            }
        }),
    );

    let mut builder = LiveSession::builder(client.clone())
        .kind(config.session_kind)
        .transcriber(build_transcriber(&config, &api_key)?);

    if let Some(sink) = build_sink(&config, options.output.as_ref())? {
        builder = builder.streamer(Arc::new(AudioStreamer::new(sink, OUTPUT_SAMPLE_RATE)));
    }

    if !options.documents.is_empty() {
        let rewriter = build_rewriter(&config, &api_key, &options).await?;
        builder = builder.rewriter(rewriter);
    }
    if let Some(patient) = &options.patient {
        builder = builder.metadata("patient_id", patient.clone());
    }

    let session = builder.build();

    // Wake up when the model finishes its reply.
    let reply_done = Arc::new(Notify::new());
    let notify = reply_done.clone();
    client.on(
        EventKind::TurnComplete,
        callback(move |_| {
            let notify = notify.clone();
            async move { notify.notify_one() }
        }),
    );

    session.connect(config.to_live_config()).await?;
    info!("Connected, sending prompt");
    session.send(vec![Part::text(options.prompt)]).await?;

    if tokio::time::timeout(options.wait, reply_done.notified())
        .await
        .is_err()
    {
        warn!("No complete reply within {:?}", options.wait);
    }

    let record = session.finish(None).await;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn build_transcriber(config: &ClientConfig, api_key: &str) -> anyhow::Result<Arc<dyn Transcriber>> {
    let transcriber: Arc<dyn Transcriber> = match config.transcription_provider {
        TranscriptionProvider::Gemini => {
            let mut transcriber_config = GeminiTranscriberConfig::new(api_key);
            transcriber_config.base_url = config.api_base_url.clone();
            transcriber_config.model = config.transcription_model.clone();
            Arc::new(GeminiTranscriber::new(transcriber_config)?)
        }
        TranscriptionProvider::Whisper => {
            let openai_key = config
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY is required for Whisper transcription")?;
            Arc::new(WhisperTranscriber::new(WhisperTranscriberConfig::new(openai_key))?)
        }
    };
    Ok(transcriber)
}

fn build_sink(
    config: &ClientConfig,
    output: Option<&PathBuf>,
) -> anyhow::Result<Option<Arc<dyn AudioSink>>> {
    if let Some(path) = output {
        let sink = WavFileSink::create(path, config.playback_sample_rate)?;
        return Ok(Some(Arc::new(sink)));
    }

    #[cfg(feature = "playback-cpal")]
    let sink: Option<Arc<dyn AudioSink>> = {
        use live_voice::core::playback::{CpalSink, DEFAULT_FRAME_SIZE};
        Some(Arc::new(CpalSink::new(
            config.playback_sample_rate,
            DEFAULT_FRAME_SIZE,
        )))
    };

    #[cfg(not(feature = "playback-cpal"))]
    let sink: Option<Arc<dyn AudioSink>> = {
        warn!("Built without playback-cpal and no --output given, reply audio is not played");
        None
    };

    Ok(sink)
}

async fn build_rewriter(
    config: &ClientConfig,
    api_key: &str,
    options: &ChatOptions,
) -> anyhow::Result<Arc<dyn OutboundRewriter>> {
    let embedder: Arc<dyn Embedder> = if options.offline_embeddings {
        Arc::new(HashingEmbedder::default())
    } else {
        let mut embedder_config = GeminiEmbedderConfig::new(api_key);
        embedder_config.base_url = config.api_base_url.clone();
        embedder_config.model = config.embedding_model.clone();
        Arc::new(GeminiEmbedder::new(embedder_config)?)
    };

    let rag = Arc::new(
        RagService::new(embedder)
            .with_splitter(config.splitter()?)
            .with_top_k(config.rag_top_k),
    );

    let mut documents = Vec::with_capacity(options.documents.len());
    for path in &options.documents {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read document {}", path.display()))?;
        documents.push(RagDocument::new(content).with_metadata("source", path.display().to_string()));
    }

    let rewriter = match &options.patient {
        Some(patient) => {
            let scoped = rag.scoped("patient_id", patient.clone());
            scoped.add_documents(documents);
            scoped.initialize().await?;
            RagRewriter::new(Arc::new(scoped), config.rag_top_k)
        }
        None => {
            rag.add_documents(documents);
            rag.initialize().await?;
            RagRewriter::new(rag, config.rag_top_k)
        }
    };
    Ok(Arc::new(rewriter))
}
