//! The instruction prompt sent to the language model.

/// Build the prompt asking the model to answer `question` from `context`
/// alone, in `language`.
///
/// The context is inserted verbatim; braces and other template-looking
/// characters in it are not interpreted.
///
/// # Examples
///
/// ```
/// let prompt = docqa::prompt::render("Paris is in France.", "Where is Paris?", "English");
/// assert!(prompt.starts_with("Answer the question based only on the context,\n Paris is in France."));
/// assert!(prompt.contains("Question: Where is Paris?"));
/// assert!(prompt.contains("Answer in English:"));
/// ```
pub fn render(context: &str, question: &str, language: &str) -> String {
    format!(
        "Answer the question based only on the context,\n {context} \n        \n        Question: {question} \n        Answer in {language}:\n        "
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_layout() {
        let prompt = render("CTX", "Q?", "French");
        assert_eq!(
            prompt,
            "Answer the question based only on the context,\n CTX \n        \n        Question: Q? \n        Answer in French:\n        "
        );
    }

    #[test]
    fn braces_in_context_are_literal() {
        let prompt = render("{question} {0}", "real", "French");
        assert!(prompt.contains(" {question} {0} \n"));
        assert!(prompt.contains("Question: real \n"));
    }

    #[test]
    fn empty_context_still_renders() {
        let prompt = render("", "Q?", "German");
        assert!(prompt.starts_with("Answer the question based only on the context,\n  \n"));
        assert!(prompt.ends_with("Answer in German:\n        "));
    }
}
