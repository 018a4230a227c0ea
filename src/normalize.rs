/// Recovers only the generated text from a Triton reply.
///
/// Some model configurations echo the prompt ahead of the completion and some
/// do not; an exact prompt prefix is removed when present.
pub fn normalize(raw_text: &str, prompt: &str) -> String {
    raw_text
        .strip_prefix(prompt)
        .unwrap_or(raw_text)
        .trim()
        .to_owned()
}
