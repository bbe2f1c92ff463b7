//! Localized greeting, system prompt, and fallback templates.
//!
//! The templates are assembled per session from the call context and handed
//! to the pipeline as plain strings; nothing below the controller knows
//! about languages.

use serde::{Deserialize, Serialize};

/// Languages the assistant can hold a call in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    English,
    Hindi,
}

impl Language {
    /// Parses a BCP-47-ish tag; unknown tags fall back to English.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "hi" | "hi-in" => Self::Hindi,
            _ => Self::English,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Hindi => "hi",
        }
    }
}

/// Per-call context the templates are filled from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContext {
    /// Name the assistant introduces itself with.
    pub app_name: String,
    /// Business the assistant speaks on behalf of.
    pub client_name: String,
    #[serde(default)]
    pub language: Language,
}

impl Default for CallContext {
    fn default() -> Self {
        Self {
            app_name: "Parlance".to_string(),
            client_name: "our team".to_string(),
            language: Language::English,
        }
    }
}

/// Greeting spoken at the start of the first reply, after the caller has
/// spoken first.
pub fn greeting(ctx: &CallContext) -> String {
    match ctx.language {
        Language::English => format!(
            "Hello! This is {} calling on behalf of {}. How can I help you today?",
            ctx.app_name, ctx.client_name
        ),
        Language::Hindi => format!(
            "नमस्ते! मैं {} की ओर से {} बोल रही हूँ। मैं आपकी कैसे मदद कर सकती हूँ?",
            ctx.client_name, ctx.app_name
        ),
    }
}

/// System prompt seeding the conversation history.
pub fn system_prompt(ctx: &CallContext) -> String {
    match ctx.language {
        Language::English => format!(
            "You are {app}, a voice assistant speaking with a customer of \
             {client} over a phone call. Keep replies short and conversational, \
             one or two sentences. Never use lists, markup, or emoji; your \
             words are spoken aloud. If you do not know something, say so and \
             offer to have someone follow up.",
            app = ctx.app_name,
            client = ctx.client_name,
        ),
        Language::Hindi => format!(
            "You are {app}, a voice assistant speaking with a customer of \
             {client} over a phone call. Reply only in conversational Hindi \
             written in Devanagari. Keep replies short, one or two sentences. \
             Never use lists, markup, or emoji; your words are spoken aloud.",
            app = ctx.app_name,
            client = ctx.client_name,
        ),
    }
}

/// Spoken when a turn's providers exhaust their retries.
pub fn fallback_reply(language: Language) -> String {
    match language {
        Language::English => {
            "Sorry, I am having a little trouble right now. Could you say that again?".to_string()
        }
        Language::Hindi => {
            "माफ़ कीजिए, अभी थोड़ी दिक्कत हो रही है। कृपया दोबारा कहिए।".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_language_tags_fall_back_to_english() {
        assert_eq!(Language::from_tag("en-US"), Language::English);
        assert_eq!(Language::from_tag("hi-IN"), Language::Hindi);
        assert_eq!(Language::from_tag("fr"), Language::English);
    }

    #[test]
    fn greeting_is_templated_with_the_call_context() {
        let ctx = CallContext {
            app_name: "Asha".to_string(),
            client_name: "Sunrise Clinic".to_string(),
            language: Language::English,
        };
        let text = greeting(&ctx);
        assert!(text.contains("Asha"));
        assert!(text.contains("Sunrise Clinic"));
    }

    #[test]
    fn hindi_fallback_is_hindi() {
        assert!(fallback_reply(Language::Hindi).contains("माफ़"));
    }
}
