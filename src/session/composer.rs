//! # Response Composer
//!
//! Invokes the text-generation capability with the persona instructions, a
//! most-recent window of the conversation, and the new utterance, then parses
//! the emotion directive out of the reply.
//!
//! ## The directive:
//! The persona prompt asks the model to lead every reply with `[emotion: x]`.
//! Models being models, the directive sometimes appears mid-text, repeated,
//! or with an off-vocabulary value. The parsing rules are therefore:
//! - the FIRST directive decides the emotion (case-insensitive tag)
//! - ALL directive occurrences are stripped from the visible text, along
//!   with the outer whitespace a leading or trailing directive leaves behind;
//!   interior spacing is preserved as-is
//! - absent or unrecognized values fall back to `neutral`
//! - if stripping leaves nothing, the original unstripped text is surfaced
//!   instead of a blank reply

use crate::capability::TextGenerator;
use crate::conversation::{Emotion, Message};
use crate::error::VoiceResult;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// A generated reply with its directive parsed out.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedReply {
    pub text: String,
    pub emotion: Emotion,
}

fn directive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\[emotion:\s*(\w+)\s*\]").expect("directive pattern compiles")
    })
}

/// Extract the emotion directive from raw generated text.
///
/// Pure function, isolated because regex extraction from free model output is
/// inherently brittle: every fallback rule lives here and nowhere else.
pub fn extract_emotion(raw: &str) -> ComposedReply {
    let pattern = directive_pattern();

    let emotion = pattern
        .captures(raw)
        .map(|caps| Emotion::parse_or_neutral(&caps[1]))
        .unwrap_or(Emotion::Neutral);

    // Trim what stripping a leading or trailing directive leaves behind, but
    // never touch interior spacing. Directive-free text passes through
    // unchanged, whitespace and all.
    let text = if pattern.is_match(raw) {
        let stripped = pattern.replace_all(raw, "");
        let stripped = stripped.trim();
        if stripped.is_empty() {
            // A reply that was nothing but directives would otherwise come
            // out blank; showing the raw text beats silently showing nothing.
            raw.to_string()
        } else {
            stripped.to_string()
        }
    } else {
        raw.to_string()
    };

    ComposedReply { text, emotion }
}

/// Ties the generation capability and the persona prompt together for one
/// session.
pub struct ResponseComposer {
    generator: Arc<dyn TextGenerator>,
    system_prompt: &'static str,
}

impl ResponseComposer {
    pub fn new(generator: Arc<dyn TextGenerator>, system_prompt: &'static str) -> Self {
        Self {
            generator,
            system_prompt,
        }
    }

    /// Generate a reply for `utterance` against the supplied history window
    /// (oldest-first). Failures surface as `GenerationFailed`; the caller
    /// decides what that means for the session.
    pub async fn compose(&self, history: &[Message], utterance: &str) -> VoiceResult<ComposedReply> {
        let raw = self
            .generator
            .generate(self.system_prompt, history, utterance)
            .await?;

        let reply = extract_emotion(&raw);
        debug!("Composed reply ({} chars, emotion {})", reply.text.len(), reply.emotion);
        Ok(reply)
    }
}
