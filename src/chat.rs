//! The interactive question loop behind `docqa chat`.

use std::{
    io::{BufRead, Write},
    path::PathBuf,
};

use crate::{
    embedding::Embedder,
    error::Result,
    generation::Generator,
    pipeline::Pipeline,
    reranker::CrossEncoder,
};

pub const DOCS_PROMPT: &str = "Enter the path to the documents dir";
pub const QUERY_PROMPT: &str = "Type in your query (type 'exit' to quit):\n";
pub const EXIT_COMMAND: &str = "exit";

/// Read one line without its line terminator. `None` at end of input.
fn read_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

/// Ask for the documents directory. `None` if input ended first.
pub fn prompt_docs_dir<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> Result<Option<PathBuf>> {
    write!(output, "{DOCS_PROMPT}")?;
    output.flush()?;
    Ok(read_line(input)?.map(|line| PathBuf::from(line.trim())))
}

/// Answer questions read from `input` until the line `exit` or end of
/// input, returning how many questions were answered.
///
/// A failing question is reported on `output` and the loop moves on to
/// the next one.
pub fn run<R, W, E, C, G>(
    pipeline: &mut Pipeline<E, C, G>,
    input: &mut R,
    output: &mut W,
) -> Result<usize>
where
    R: BufRead,
    W: Write,
    E: Embedder,
    C: CrossEncoder,
    G: Generator,
{
    let mut answered = 0;
    loop {
        write!(output, "{QUERY_PROMPT}")?;
        output.flush()?;

        let Some(query) = read_line(input)? else {
            break;
        };
        if query == EXIT_COMMAND {
            break;
        }

        match pipeline.ask(&query) {
            Ok(answer) => {
                writeln!(output, "{}", answer.text)?;
                answered += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "question failed");
                writeln!(output, "Error: {e}")?;
            }
        }
    }
    Ok(answered)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        embedding::tests::HashEmbedder,
        generation::tests::EchoGenerator,
        reranker::tests::OverlapEncoder,
        settings::Settings,
    };

    fn indexed_pipeline(
        dir: &std::path::Path,
    ) -> Pipeline<HashEmbedder, OverlapEncoder, EchoGenerator> {
        std::fs::write(dir.join("a.txt"), "The sky is blue.").unwrap();
        let mut pipeline = Pipeline::new(
            Settings::default(),
            HashEmbedder::new(16),
            OverlapEncoder { calls: 0 },
            EchoGenerator {
                prompts: Vec::new(),
            },
        );
        pipeline.index_directory(dir).unwrap();
        pipeline
    }

    #[test]
    fn reads_docs_dir_without_newline() {
        let mut input = Cursor::new("/tmp/docs\n");
        let mut output = Vec::new();
        let dir = prompt_docs_dir(&mut input, &mut output).unwrap();
        assert_eq!(dir, Some(PathBuf::from("/tmp/docs")));
        assert_eq!(output, DOCS_PROMPT.as_bytes());
    }

    #[test]
    fn docs_dir_at_end_of_input() {
        let mut input = Cursor::new("");
        let mut output = Vec::new();
        assert_eq!(prompt_docs_dir(&mut input, &mut output).unwrap(), None);
    }

    #[test]
    fn loop_stops_at_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = indexed_pipeline(tmp.path());
        let mut input = Cursor::new("What colour is the sky?\nexit\nnever asked\n");
        let mut output = Vec::new();

        let answered = run(&mut pipeline, &mut input, &mut output).unwrap();
        assert_eq!(answered, 1);
        assert_eq!(pipeline.generator().prompts.len(), 1);

        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.matches(QUERY_PROMPT).count(), 2);
        assert!(text.contains("answered "));
    }

    #[test]
    fn loop_stops_at_end_of_input() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = indexed_pipeline(tmp.path());
        let mut input = Cursor::new("first?\r\nsecond?");
        let mut output = Vec::new();

        assert_eq!(run(&mut pipeline, &mut input, &mut output).unwrap(), 2);
    }

    #[test]
    fn failed_question_does_not_end_the_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pipeline = indexed_pipeline(tmp.path());
        let mut input = Cursor::new("\nIs the sky blue?\nexit\n");
        let mut output = Vec::new();

        let answered = run(&mut pipeline, &mut input, &mut output).unwrap();
        assert_eq!(answered, 1);
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Error: configuration error: question must not be empty"));
    }
}
