#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Model-response sanitization.
//!
//! Serving backends have known quirks: some echo the prompt back at the
//! start of the response, some wrap internal reasoning in markers, some
//! prepend meta-commentary. Every quirk handled here is listed explicitly so
//! new ones are added as named patterns rather than inline string surgery in
//! the orchestrator.

use std::sync::LazyLock;

use regex::Regex;

/// `<think>…</think>` reasoning blocks emitted by some serving stacks.
static THINK_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<think>.*?</think>").expect("think-block pattern is valid")
});

/// Bracketed thinking segments such as `[thinking: …]` or `[reasoning …]`.
static BRACKET_THINKING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\[\s*(?:thinking|reasoning|internal)[^\]]*\]")
        .expect("bracket-thinking pattern is valid")
});

/// Meta-commentary sentences that address the reader as a model.
static META_SENTENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*as an? (?:ai|language model)[^.!\n]*[.!]\s*")
        .expect("meta-sentence pattern is valid")
});

/// Three-or-more consecutive newlines left behind by removals.
static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank-run pattern is valid"));

/// Strips an echoed copy of the prompt when the model repeats it verbatim at
/// the start of its response.
pub fn strip_echoed_prompt(response: &str, prompt: &str) -> String {
    let trimmed_prompt = prompt.trim();
    let trimmed_response = response.trim_start();

    if !trimmed_prompt.is_empty()
        && let Some(rest) = trimmed_response.strip_prefix(trimmed_prompt)
    {
        return rest.trim_start().to_string();
    }

    response.to_string()
}

/// Extracts the first balanced JSON object from the text, tolerating
/// extraneous prose before and after it.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Removes internal-reasoning artifacts and meta-commentary from free text
/// before it reaches a human reader.
pub fn scrub_artifacts(text: &str) -> String {
    let pass = THINK_BLOCK.replace_all(text, "");
    let pass = BRACKET_THINKING.replace_all(&pass, "");
    let pass = META_SENTENCE.replace_all(&pass, "");
    BLANK_RUNS.replace_all(&pass, "\n\n").trim().to_string()
}
