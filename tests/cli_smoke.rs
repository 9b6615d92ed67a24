use std::{
    path::{Path, PathBuf},
    process::{Command, Output},
};

use docqa::ConfigDb;

fn docqa_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_docqa") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("docqa");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}

fn run(
    data_dir: &Path,
    args: &[&str],
) -> Result<Output, Box<dyn std::error::Error>> {
    let output = Command::new(docqa_bin()?)
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env_remove("DOCQA_DATA_DIR")
        .env_remove("DOCQA_LANGUAGE")
        .env_remove("DOCQA_BACKEND")
        .env_remove("DOCQA_LLM_MODEL")
        .env_remove("DOCQA_EMBEDDING_MODEL")
        .env_remove("DOCQA_RERANKER_MODEL")
        .env_remove("DOCQA_LLM_BASE_URL")
        .env("DOCQA_LOG", "off")
        .output()?;
    Ok(output)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn config_set_show_unset() -> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;

    let set = run(tempdir.path(), &["config", "set", "language", "English"])?;
    assert!(set.status.success());

    let show = run(tempdir.path(), &["config", "show", "--json"])?;
    assert!(show.status.success());
    let settings: serde_json::Value = serde_json::from_slice(&show.stdout)?;
    assert_eq!(settings["language"], "English");
    assert_eq!(settings["retrieve_k"], "25");
    assert_eq!(settings["rerank_top_n"], "3");

    let unset = run(tempdir.path(), &["config", "unset", "language"])?;
    assert!(unset.status.success());

    let show = run(tempdir.path(), &["config", "show"])?;
    assert!(stdout(&show).contains("language\tFrench"));

    let again = run(tempdir.path(), &["config", "unset", "language"])?;
    assert!(!again.status.success());
    Ok(())
}

#[test]
fn config_rejects_bad_values() -> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;

    let unknown = run(tempdir.path(), &["config", "set", "colour", "blue"])?;
    assert!(!unknown.status.success());

    let bad = run(tempdir.path(), &["config", "set", "chunk_size", "huge"])?;
    assert!(!bad.status.success());

    let db = ConfigDb::open(&tempdir.path().join("config.redb"))?;
    assert!(db.list_settings()?.is_empty());
    Ok(())
}

#[test]
fn config_set_checks_against_stored_settings()
-> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;

    // Valid only together with the stored chunk size.
    let size = run(tempdir.path(), &["config", "set", "chunk_size", "2000"])?;
    assert!(size.status.success());
    let overlap =
        run(tempdir.path(), &["config", "set", "chunk_overlap", "1500"])?;
    assert!(overlap.status.success());

    // Would leave the overlap larger than the chunk size.
    let shrink = run(tempdir.path(), &["config", "set", "chunk_size", "100"])?;
    assert!(!shrink.status.success());
    let unset = run(tempdir.path(), &["config", "unset", "chunk_size"])?;
    assert!(!unset.status.success());

    let show = run(tempdir.path(), &["config", "show", "--json"])?;
    assert!(show.status.success());
    let settings: serde_json::Value = serde_json::from_slice(&show.stdout)?;
    assert_eq!(settings["chunk_size"], "2000");
    assert_eq!(settings["chunk_overlap"], "1500");

    let status = run(tempdir.path(), &["status"])?;
    assert!(status.status.success());
    Ok(())
}

#[test]
fn flags_override_persisted_settings() -> Result<(), Box<dyn std::error::Error>>
{
    let tempdir = tempfile::tempdir()?;
    run(tempdir.path(), &["config", "set", "language", "English"])?;

    let show = run(
        tempdir.path(),
        &["--language", "German", "config", "show", "--json"],
    )?;
    let settings: serde_json::Value = serde_json::from_slice(&show.stdout)?;
    assert_eq!(settings["language"], "German");
    Ok(())
}

#[test]
fn status_reports_data_dir_and_models() -> Result<(), Box<dyn std::error::Error>>
{
    let tempdir = tempfile::tempdir()?;

    let output = run(tempdir.path(), &["status", "--json"])?;
    assert!(output.status.success());

    let status: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(
        status["data_dir"].as_str(),
        Some(tempdir.path().to_string_lossy().as_ref())
    );
    assert_eq!(status["data_dir_source"], "--data-dir");
    assert_eq!(
        status["embedding_model"],
        "sentence-transformers/all-MiniLM-L6-v2"
    );
    assert_eq!(status["reranker_model"], "BAAI/bge-reranker-large");
    assert_eq!(status["cached_embeddings"], 0);
    Ok(())
}

#[test]
fn ask_on_missing_directory_fails() -> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    let missing = tempdir.path().join("nope");

    let output = run(
        tempdir.path(),
        &["ask", "anything?", "--docs", missing.to_str().unwrap()],
    )?;
    assert!(!output.status.success());
    Ok(())
}
