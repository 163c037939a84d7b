use std::io::Write;
use std::sync::Arc;

use ractor::Actor;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use engine::actors::{CoachAgent, CoachAgentArguments, CoachAgentMsg};
use engine::config::CoachConfig;
use engine::embeddings::{Embedder, FastEmbedder};
use engine::llm::{LanguageModel, OllamaClient};
use engine::retrieval::seed::seed_collection;
use engine::retrieval::{Retriever, VectorIndex};
use shared_types::{Message, TurnEvent};

fn load_env_file() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            match dotenvy::from_path(&candidate) {
                Ok(_) => {
                    tracing::info!(path = %candidate.display(), "Loaded environment from .env");
                }
                Err(e) => {
                    tracing::warn!(
                        path = %candidate.display(),
                        error = %e,
                        "Failed to load .env file"
                    );
                }
            }
            return;
        }

        if !current.pop() {
            break;
        }
    }

    tracing::info!(
        cwd = %cwd.display(),
        "No .env file found in current directory or ancestors; using process environment only"
    );
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load .env values early so endpoint/model settings are available
    // everywhere. Search the current directory and ancestors so running from
    // `engine/` still picks up a repo-root `.env`.
    load_env_file();

    tracing::info!("Starting coach conversation engine");

    let config = CoachConfig::from_env();

    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        std::fs::create_dir_all(parent).expect("Failed to create data directory");
    }

    let index = VectorIndex::open(&config.db_path).expect("Failed to open vector index");
    tracing::info!(db = %config.db_path, "Vector index ready");

    let embedder: Arc<dyn Embedder> = Arc::new(
        FastEmbedder::new(&config.embed_cache_dir).expect("Failed to initialize embedding model"),
    );

    match seed_collection(
        embedder.as_ref(),
        &index,
        &config.collection,
        &config.dataset_path,
    )
    .await
    {
        Ok(report) if report.already_seeded => {
            tracing::info!(collection = %config.collection, "Knowledge base already seeded");
        }
        Ok(report) => {
            tracing::info!(
                indexed = report.indexed,
                skipped = report.skipped,
                "Knowledge base seeded"
            );
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Seeding failed; retrieval will answer from whatever the index holds"
            );
        }
    }

    let retriever = Arc::new(Retriever::new(
        Arc::clone(&embedder),
        index.clone(),
        config.collection.clone(),
    ));
    let llm: Arc<dyn LanguageModel> = Arc::new(
        OllamaClient::new(
            config.ollama_url.clone(),
            config.model.clone(),
            config.sampling,
            config.connect_timeout,
            config.request_timeout,
        )
        .expect("Failed to build model client"),
    );

    let (agent, _handle) = Actor::spawn(
        None,
        CoachAgent,
        CoachAgentArguments {
            agent_id: format!("coach:{}", ulid::Ulid::new()),
            retriever,
            llm,
        },
    )
    .await
    .expect("Failed to spawn CoachAgent");

    println!("💪 Coach Sportif IA — pose tes questions sur l'entraînement, la nutrition ou la prévention des blessures.");
    println!("(Ctrl-D pour quitter)\n");

    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        history.push(Message::user(question));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let TurnEvent::Fragment { text } = event {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
            }
        });

        let result = ractor::call!(agent, |reply| CoachAgentMsg::RunTurn {
            history: history.clone(),
            progress_tx: Some(tx),
            reply,
        });

        let _ = printer.await;
        println!();

        match result {
            Ok(Ok(turn)) => {
                if !turn.recommendations.is_empty() {
                    println!("\n📹 Vidéos recommandées :");
                    let mut recommendations: Vec<_> = turn.recommendations.values().collect();
                    recommendations.sort_by(|a, b| a.id.cmp(&b.id));
                    for rec in recommendations {
                        println!("  - {} — {}", rec.title, rec.video_url);
                    }
                }
                println!("({:.1} s)\n", turn.elapsed_ms as f64 / 1000.0);
                if let Some(message) = turn.message {
                    history.push(message);
                }
            }
            Ok(Err(e)) => {
                eprintln!("⚠️  {e}");
                // Leave the question in the history; the next turn can retry.
            }
            Err(e) => {
                eprintln!("⚠️  agent unreachable: {e}");
                break;
            }
        }
    }

    Ok(())
}
