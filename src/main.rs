use std::path::Path;

use clap::Parser;
use docqa::{
    BgeReranker,
    ConfigDb,
    DataDir,
    EmbeddingDb,
    Error,
    Pipeline,
    Result,
    SentenceEmbedder,
    Settings,
    chat,
    generation::{self, Generator},
    pipeline::IndexReport,
    reranker::RankedPassage,
    settings,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{AskArgs, ChatArgs, Cli, Command, ConfigAction, SearchArgs};

type DefaultPipeline =
    Pipeline<SentenceEmbedder, BgeReranker, Box<dyn Generator>>;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCQA_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match &cli.command {
        Command::Ask(args) => cmd_ask(&cli, &data_dir, &config_db, args)?,
        Command::Chat(args) => cmd_chat(&cli, &data_dir, &config_db, args)?,
        Command::Search(args) => {
            cmd_search(&cli, &data_dir, &config_db, args)?
        }
        Command::Config { action } => match action {
            ConfigAction::Show { json } => {
                config_show(&cli, &config_db, *json)?
            }
            ConfigAction::Set { key, value } => {
                config_set(&config_db, key, value)?
            }
            ConfigAction::Unset { key } => config_unset(&config_db, key)?,
        },
        Command::Status(args) => {
            cmd_status(&cli, &data_dir, &config_db, args.json)?
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn resolve_settings(cli: &Cli, config_db: &ConfigDb) -> Result<Settings> {
    Settings::resolve(Some(config_db), &cli.setting_overrides())
}

fn build_pipeline(
    cli: &Cli,
    data_dir: &DataDir,
    config_db: &ConfigDb,
) -> Result<DefaultPipeline> {
    let settings = resolve_settings(cli, config_db)?;
    let embedder = SentenceEmbedder::new(settings.embedding_model.clone());
    let reranker = BgeReranker::new(settings.reranker_model.clone());
    let generator = generation::from_settings(&settings)?;
    tracing::debug!(generator = %generator.describe(), "configured pipeline");

    let mut pipeline = Pipeline::new(settings, embedder, reranker, generator)
        .recursive(cli.recursive)
        .show_progress(!cli.quiet);
    if !cli.no_cache {
        pipeline =
            pipeline.with_cache(EmbeddingDb::open(&data_dir.embeddings_db())?);
    }
    Ok(pipeline)
}

fn index(pipeline: &mut DefaultPipeline, docs: &Path) -> Result<IndexReport> {
    let report = pipeline.index_directory(docs)?;
    if report.chunks == 0 {
        tracing::warn!(
            dir = %docs.display(),
            "no text found; answers will have no context"
        );
    }
    Ok(report)
}

fn passages_json(
    passages: &[RankedPassage],
    sources: &[String],
) -> serde_json::Value {
    passages
        .iter()
        .zip(sources)
        .map(|(p, source)| {
            serde_json::json!({
                "source": source,
                "text": p.text,
                "score": p.score,
                "retrieval_rank": p.retrieval_rank,
            })
        })
        .collect()
}

fn print_passages(passages: &[RankedPassage], sources: &[String]) {
    if passages.is_empty() {
        println!("No passages found.");
    }
    for (i, (p, source)) in passages.iter().zip(sources).enumerate() {
        println!("--- {} {source} (score: {:.3}) ---", i + 1, p.score);
        println!("{}", p.text.trim_end());
    }
}

fn cmd_ask(
    cli: &Cli,
    data_dir: &DataDir,
    config_db: &ConfigDb,
    args: &AskArgs,
) -> Result<()> {
    let mut pipeline = build_pipeline(cli, data_dir, config_db)?;
    index(&mut pipeline, &args.docs)?;
    let answer = pipeline.ask(&args.question)?;

    if args.json {
        let out = serde_json::json!({
            "question": args.question,
            "answer": answer.text,
            "prompt": answer.prompt,
            "passages": passages_json(&answer.passages, &answer.sources),
        });
        println!("{out}");
    } else {
        if args.show_context {
            print_passages(&answer.passages, &answer.sources);
            println!();
        }
        println!("{}", answer.text);
    }
    Ok(())
}

fn cmd_search(
    cli: &Cli,
    data_dir: &DataDir,
    config_db: &ConfigDb,
    args: &SearchArgs,
) -> Result<()> {
    let mut pipeline = build_pipeline(cli, data_dir, config_db)?;
    index(&mut pipeline, &args.docs)?;
    let retrieval = pipeline.context_for(&args.question)?;

    if args.json {
        let out = serde_json::json!({
            "question": args.question,
            "passages": passages_json(&retrieval.passages, &retrieval.sources),
        });
        println!("{out}");
    } else {
        print_passages(&retrieval.passages, &retrieval.sources);
    }
    Ok(())
}

fn cmd_chat(
    cli: &Cli,
    data_dir: &DataDir,
    config_db: &ConfigDb,
    args: &ChatArgs,
) -> Result<()> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();

    let docs = match &args.docs {
        Some(docs) => docs.clone(),
        None => match chat::prompt_docs_dir(&mut input, &mut output)? {
            Some(docs) => docs,
            None => return Ok(()),
        },
    };

    let mut pipeline = build_pipeline(cli, data_dir, config_db)?;
    index(&mut pipeline, &docs)?;
    let answered = chat::run(&mut pipeline, &mut input, &mut output)?;
    tracing::debug!(answered, "chat finished");
    Ok(())
}

fn config_show(cli: &Cli, config_db: &ConfigDb, json: bool) -> Result<()> {
    let settings = resolve_settings(cli, config_db)?;
    let entries = settings.entries();

    if json {
        let map: serde_json::Map<String, serde_json::Value> = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
            .collect();
        println!("{}", serde_json::Value::Object(map));
    } else {
        for (key, value) in &entries {
            println!("{key}\t{value}");
        }
    }
    Ok(())
}

/// Check that the stored settings stay valid after setting `key` to
/// `value`, or removing it when `value` is `None`.
fn check_stored_change(
    config_db: &ConfigDb,
    key: &str,
    value: Option<&str>,
) -> Result<()> {
    let mut check = Settings::default();
    for (stored_key, stored_value) in config_db.list_settings()? {
        if stored_key != key {
            check.apply(&stored_key, &stored_value)?;
        }
    }
    if let Some(value) = value {
        check.apply(key, value)?;
    }
    check.validate()
}

fn config_set(config_db: &ConfigDb, key: &str, value: &str) -> Result<()> {
    check_stored_change(config_db, key, Some(value))?;
    config_db.set_setting(key, value)?;
    println!("Set {key} = {value}");
    Ok(())
}

fn config_unset(config_db: &ConfigDb, key: &str) -> Result<()> {
    if config_db.get_setting(key)?.is_none() {
        return Err(Error::NotFound {
            kind: "setting",
            name: key.to_string(),
        });
    }
    check_stored_change(config_db, key, None)?;
    config_db.remove_setting(key)?;
    println!("Unset {key}");
    Ok(())
}

fn cmd_status(
    cli: &Cli,
    data_dir: &DataDir,
    config_db: &ConfigDb,
    json: bool,
) -> Result<()> {
    let settings = resolve_settings(cli, config_db)?;
    let cached = EmbeddingDb::open(&data_dir.embeddings_db())?.len()?;
    let generator = generation::from_settings(&settings)?;

    if json {
        let out = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "data_dir_source": data_dir.source().to_string(),
            "embedding_model": settings.embedding_model,
            "reranker_model": settings.reranker_model,
            "llm": generator.describe(),
            "backend": settings.backend.to_string(),
            "language": settings.language,
            "cached_embeddings": cached,
        });
        println!("{out}");
    } else {
        println!(
            "Data directory: {} (from {})",
            data_dir.root().display(),
            data_dir.source()
        );
        println!("Embedding model: {}", settings.embedding_model);
        println!("Reranker model: {}", settings.reranker_model);
        println!("Language model: {}", generator.describe());
        println!("Answer language: {}", settings.language);
        println!("Cached embeddings: {cached}");
        if settings.backend == settings::Backend::Local {
            println!("Quantization: {}", settings.quantization);
        }
    }
    Ok(())
}
