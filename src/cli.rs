use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use docqa::settings::Backend;

#[derive(Debug, Parser)]
#[command(
    name = "docqa",
    version,
    about = "Ask questions about a directory of documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Recompute every embedding instead of reusing cached vectors
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Also load documents from sub-directories
    #[arg(long, global = true)]
    pub recursive: bool,

    /// Which language model backend answers
    #[arg(long, value_enum, global = true)]
    pub backend: Option<Backend>,

    /// Language the answer should be written in
    #[arg(long, global = true)]
    pub language: Option<String>,

    /// Sentence embedding model ID or local model directory
    #[arg(long, global = true)]
    pub embedding_model: Option<String>,

    /// Cross-encoder reranker model ID or local model directory
    #[arg(long, global = true)]
    pub reranker_model: Option<String>,

    /// Language model ID, local directory, or .gguf file
    #[arg(long, global = true)]
    pub llm_model: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Settings given on the command line, as `(key, value)` overrides.
    pub fn setting_overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();
        if let Some(backend) = self.backend {
            overrides.push(("backend", backend.to_string()));
        }
        let strings = [
            ("language", &self.language),
            ("embedding_model", &self.embedding_model),
            ("reranker_model", &self.reranker_model),
            ("llm_model", &self.llm_model),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                overrides.push((key, value.clone()));
            }
        }
        overrides
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Answer one question from the documents in a directory
    Ask(AskArgs),
    /// Ask questions interactively until `exit`
    Chat(ChatArgs),
    /// Show the passages a question would be answered from
    Search(SearchArgs),
    /// Inspect and change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show data directory, cache and model information
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question to answer
    pub question: String,

    /// Directory holding the documents
    #[arg(short, long)]
    pub docs: PathBuf,

    /// Output the answer and its passages as JSON
    #[arg(long)]
    pub json: bool,

    /// Print the passages used as context before the answer
    #[arg(long)]
    pub show_context: bool,
}

// -- Chat --

#[derive(Debug, Parser)]
pub struct ChatArgs {
    /// Directory holding the documents (prompted for when omitted)
    #[arg(short, long)]
    pub docs: Option<PathBuf>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The question to retrieve passages for
    pub question: String,

    /// Directory holding the documents
    #[arg(short, long)]
    pub docs: PathBuf,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every resolved setting
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set {
        /// Setting name (see `docqa config show`)
        key: String,
        value: String,
    },
    /// Remove a persisted setting (revert to default)
    Unset { key: String },
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docqa",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_ask() {
        let cli = Cli::parse_from([
            "docqa",
            "ask",
            "What is Rust?",
            "--docs",
            "./docs",
            "--show-context",
        ]);
        match cli.command {
            Command::Ask(args) => {
                assert_eq!(args.question, "What is Rust?");
                assert_eq!(args.docs, PathBuf::from("./docs"));
                assert!(args.show_context);
                assert!(!args.json);
            }
            _ => panic!("expected ask command"),
        }
    }

    #[test]
    fn chat_docs_are_optional() {
        let cli = Cli::parse_from(["docqa", "chat"]);
        assert!(matches!(cli.command, Command::Chat(ChatArgs { docs: None })));
    }

    #[test]
    fn global_flags_become_overrides() {
        let cli = Cli::parse_from([
            "docqa",
            "search",
            "q",
            "--docs",
            ".",
            "--backend",
            "openai",
            "--language",
            "English",
            "--no-cache",
        ]);
        assert!(cli.no_cache);
        assert_eq!(
            cli.setting_overrides(),
            vec![
                ("backend", "openai".to_string()),
                ("language", "English".to_string()),
            ]
        );
    }

    #[test]
    fn ask_requires_docs() {
        assert!(Cli::try_parse_from(["docqa", "ask", "q"]).is_err());
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
