//! Prompt construction for the answer composer.
//!
//! The composed prompt has five sections, in order:
//!
//! 1. the system instruction (assistant identity, product scope, formatting rules)
//! 2. a response-format template picked by [`classify_question`]
//! 3. the tail of the conversation history
//! 4. the context block, or [`NO_CONTEXT_FOUND`]
//! 5. the question, tagged with the effective version and question type
//!
//! Templates are plain string data; nothing here performs I/O.

use serde::{Deserialize, Serialize};

use crate::models::HistoryMessage;
use crate::product::ProductProfile;
use crate::version::VersionResolution;

/// Literal used as the context block when retrieval found nothing.
pub const NO_CONTEXT_FOUND: &str = "No relevant documentation context found.";

/// Extra instruction appended on the zero-context path.
pub const URL_SUPPRESSION_INSTRUCTION: &str = "This is general guidance; do not include any URLs or documentation links; state clearly at the opening that this is general guidance.";

/// Returned when the LLM fails on every attempt.
pub const APOLOGETIC_FALLBACK: &str = "I'm sorry, I wasn't able to generate a response right now. Please try again in a moment.";

/// Keyword-classified intent of a user question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    HowTo,
    Definition,
    Configuration,
    Example,
    Troubleshooting,
    Workflow,
    Integration,
    Monitoring,
    Administration,
    General,
}

/// Checked in order; the first type with a matching keyword wins.
const CLASSIFIER_RULES: &[(QuestionType, &[&str])] = &[
    (
        QuestionType::Troubleshooting,
        &[
            "error", "errors", "fail", "fails", "failed", "failing", "failure", "not working",
            "doesn't work", "does not work", "issue", "issues", "problem", "troubleshoot",
            "troubleshooting", "broken", "fix", "unable", "cannot", "can't", "stuck",
        ],
    ),
    (
        QuestionType::Example,
        &["example", "examples", "sample", "samples", "show me", "demonstrate", "demo"],
    ),
    (
        QuestionType::HowTo,
        &["how do", "how to", "how can", "how should", "steps", "step by step", "walk me through"],
    ),
    (
        QuestionType::Definition,
        &[
            "what is", "what are", "what's", "what does", "define", "definition", "meaning",
            "explain", "difference between",
        ],
    ),
    (
        QuestionType::Configuration,
        &[
            "configure", "configuring", "configuration", "config", "setting", "settings",
            "set up", "setup", "parameter", "parameters", "option", "options",
        ],
    ),
    (
        QuestionType::Workflow,
        &["workflow", "workflows", "automation", "automate", "runbook", "runbooks", "task", "tasks"],
    ),
    (
        QuestionType::Integration,
        &["integrate", "integration", "integrations", "connect", "connector", "api", "webhook", "plugin"],
    ),
    (
        QuestionType::Monitoring,
        &["monitor", "monitoring", "dashboard", "dashboards", "alert", "alerts", "metric", "metrics", "kpi", "kpis"],
    ),
    (
        QuestionType::Administration,
        &[
            "admin", "administration", "administrator", "user", "users", "permission",
            "permissions", "role", "roles", "license", "install", "installation", "upgrade",
        ],
    ),
];

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::HowTo => "how_to",
            QuestionType::Definition => "definition",
            QuestionType::Configuration => "configuration",
            QuestionType::Example => "example",
            QuestionType::Troubleshooting => "troubleshooting",
            QuestionType::Workflow => "workflow",
            QuestionType::Integration => "integration",
            QuestionType::Monitoring => "monitoring",
            QuestionType::Administration => "administration",
            QuestionType::General => "general",
        }
    }

    /// Prose guidance on how to shape the answer.
    pub fn template(&self) -> &'static str {
        match self {
            QuestionType::HowTo => "Answer with a short introduction followed by numbered steps. Put each action on its own step, name the exact screens and buttons, and finish with how the user can confirm it worked.",
            QuestionType::Definition => "Start with a one or two sentence definition. Then explain where the concept appears in the product and how it relates to neighbouring concepts.",
            QuestionType::Configuration => "Describe where the setting lives, list the relevant fields with their accepted values, and call out defaults and any restart or permission requirements.",
            QuestionType::Example => "Lead with a concrete example drawn from the documentation, then explain what each part of the example does and how to adapt it.",
            QuestionType::Troubleshooting => "Restate the symptom briefly, list the most likely causes first, and give a check and a fix for each. Mention where to find logs or error details.",
            QuestionType::Workflow => "Explain the purpose of the workflow, then walk through its stages in order, noting inputs, outputs and decision points.",
            QuestionType::Integration => "Explain what the integration connects, the prerequisites on both sides, and the configuration steps. Note authentication and data mapping concerns.",
            QuestionType::Monitoring => "Explain what can be observed, where it is displayed, and how to interpret the values. Mention thresholds or alerts the user can configure.",
            QuestionType::Administration => "Explain which role or permission is needed, where the administrative setting is found, and the effect of changing it on other users.",
            QuestionType::General => "Answer directly and concisely, then add supporting detail from the documentation where it helps.",
        }
    }
}

/// Classify a question by keyword.
///
/// ```rust
/// use rani_core::prompt::{classify_question, QuestionType};
///
/// assert_eq!(classify_question("What is a filter?"), QuestionType::Definition);
/// assert_eq!(classify_question("How do I create a workflow?"), QuestionType::HowTo);
/// ```
pub fn classify_question(question: &str) -> QuestionType {
    let lowered = question.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect();
    let padded = format!(" {} ", words.join(" "));

    CLASSIFIER_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| padded.contains(&format!(" {} ", k))))
        .map(|(qt, _)| *qt)
        .unwrap_or(QuestionType::General)
}

/// One chunk as it is shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    /// Absolute citation URL.
    pub source_url: String,
    pub page_title: Option<String>,
    pub header: Option<String>,
    pub score: f32,
    pub content: String,
}

/// Truncate to `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Render the context block. An empty slice renders [`NO_CONTEXT_FOUND`].
pub fn build_context_block(entries: &[ContextEntry], max_chars: usize) -> String {
    if entries.is_empty() {
        return NO_CONTEXT_FOUND.to_string();
    }
    let mut out = String::new();
    for (i, e) in entries.iter().enumerate() {
        let n = i + 1;
        out.push_str(&format!("--- Source {} ---\n", n));
        out.push_str(&format!("URL: {}\n", e.source_url));
        out.push_str(&format!(
            "Page: {}\n",
            e.page_title.as_deref().unwrap_or("Untitled")
        ));
        if let Some(h) = e.header.as_deref().filter(|h| !h.is_empty()) {
            out.push_str(&format!("Section: {}\n", h));
        }
        out.push_str(&format!("Relevance: {:.3}\n", e.score));
        out.push_str(&format!("Content:\n{}\n", truncate_chars(&e.content, max_chars)));
        out.push_str(&format!("--- End Source {} ---\n\n", n));
    }
    out.trim_end().to_string()
}

/// Render the last `turns` history messages, oldest first.
pub fn build_history_block(history: &[HistoryMessage], turns: usize) -> String {
    let start = history.len().saturating_sub(turns);
    history[start..]
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| format!("{}: {}", m.role.label(), m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn system_instruction(profile: &ProductProfile) -> String {
    format!(
        "You are RANI, the documentation assistant for {name}. Answer questions about {name} \
using the provided documentation context. Do not answer questions unrelated to {name}.\n\
\n\
Formatting rules:\n\
- Use **bold** for UI elements such as buttons, menus, tabs and field names.\n\
- Use `code` formatting for literal values, file names, commands and parameters.\n\
- Write navigation paths with > between steps, for example **Settings > Users > Roles**.\n\
- End every answer with a Sources: section listing the documentation pages you used.\n\
- Only cite fully-qualified absolute URLs (starting with https://, under {base}); never invent or shorten links.",
        name = profile.display_name,
        base = profile.base_url(),
    )
}

/// Everything needed to render one completion prompt.
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub profile: &'a ProductProfile,
    pub question: &'a str,
    pub question_type: QuestionType,
    pub effective_version: &'a str,
    pub context: &'a [ContextEntry],
    pub history: &'a [HistoryMessage],
    pub history_turns: usize,
    pub max_chars_per_chunk: usize,
}

/// Assemble the full prompt. An empty `context` selects the zero-context
/// variant, which carries [`URL_SUPPRESSION_INSTRUCTION`].
pub fn build_prompt(input: &PromptInput<'_>) -> String {
    let mut sections: Vec<String> = Vec::with_capacity(6);

    let mut system = system_instruction(input.profile);
    if input.context.is_empty() {
        system.push_str("\n\n");
        system.push_str(URL_SUPPRESSION_INSTRUCTION);
    }
    sections.push(system);

    sections.push(format!(
        "Response format ({}):\n{}",
        input.question_type.as_str(),
        input.question_type.template()
    ));

    let history = build_history_block(input.history, input.history_turns);
    if !history.is_empty() {
        sections.push(format!("Conversation history:\n{}", history));
    }

    sections.push(format!(
        "Documentation context:\n{}",
        build_context_block(input.context, input.max_chars_per_chunk)
    ));

    sections.push(format!(
        "User question ({} version {}, question type: {}):\n{}",
        input.profile.display_name,
        input.effective_version,
        input.question_type.as_str(),
        input.question.trim()
    ));

    sections.join("\n\n")
}

/// Prompt asking the model for comma-separated search terms.
pub fn expansion_prompt(question: &str, display_name: &str) -> String {
    format!(
        "You expand search queries for the {} documentation. Rewrite the question below as a \
single line of comma-separated search terms. Include the original question, singular and plural \
variants of key nouns, and product-specific synonyms. Return only the terms.\n\nQuestion: {}",
        display_name,
        question.trim()
    )
}

/// Clean a model's expansion output; `None` means "use the original".
pub fn parse_expansion(raw: &str) -> Option<String> {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())?
        .trim_matches(|c| c == '"' || c == '`');
    let terms: Vec<&str> = line
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return None;
    }
    Some(terms.join(", "))
}

/// Paragraph prepended to zero-context answers.
pub fn zero_context_disclaimer(display_name: &str) -> String {
    format!(
        "No exact matches found in {} documentation. This is a general response:\n\n",
        display_name
    )
}

/// Advisory sentences appended after the model's answer, in order.
pub fn version_advisories(resolution: &VersionResolution, latest: &str) -> Vec<String> {
    let mut out = Vec::new();
    if resolution.effective != latest {
        out.push(format!(
            "Note: this answer is based on version {} documentation; some features may differ in other versions.",
            resolution.effective
        ));
    }
    if resolution.is_unsupported() {
        let requested = resolution
            .requested
            .as_deref()
            .unwrap_or(resolution.normalized.as_str());
        out.push(format!(
            "Note: documentation for version {} is not available, so this answer uses the default version {}.",
            requested, resolution.effective
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::product::Product;

    fn entry(url: &str, content: &str) -> ContextEntry {
        ContextEntry {
            source_url: url.to_string(),
            page_title: Some("Filters".to_string()),
            header: Some("Overview".to_string()),
            score: 0.87654,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_classifier() {
        assert_eq!(classify_question("What is a filter?"), QuestionType::Definition);
        assert_eq!(classify_question("How do I add a user?"), QuestionType::HowTo);
        assert_eq!(classify_question("My workflow fails with an error"), QuestionType::Troubleshooting);
        assert_eq!(classify_question("Show me an example of a runbook"), QuestionType::Example);
        assert_eq!(classify_question("Configure SMTP settings"), QuestionType::Configuration);
        assert_eq!(classify_question("dashboard KPIs"), QuestionType::Monitoring);
        assert_eq!(classify_question("ServiceNow integration"), QuestionType::Integration);
        assert_eq!(classify_question("hello there"), QuestionType::General);
    }

    #[test]
    fn test_classifier_matches_whole_words() {
        assert_eq!(classify_question("rapid deployment"), QuestionType::General);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("héllo", 2), "hé...");
    }

    #[test]
    fn test_context_block_format() {
        let block = build_context_block(&[entry("https://help.resolve.io/pro/f.htm", "Body")], 800);
        assert!(block.starts_with("--- Source 1 ---"));
        assert!(block.contains("URL: https://help.resolve.io/pro/f.htm"));
        assert!(block.contains("Section: Overview"));
        assert!(block.contains("Relevance: 0.877"));
        assert!(block.ends_with("--- End Source 1 ---"));
    }

    #[test]
    fn test_empty_context_block() {
        assert_eq!(build_context_block(&[], 800), NO_CONTEXT_FOUND);
    }

    #[test]
    fn test_history_keeps_last_turns() {
        let history: Vec<HistoryMessage> = (0..8)
            .map(|i| HistoryMessage {
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("m{}", i),
            })
            .collect();
        let block = build_history_block(&history, 5);
        assert!(!block.contains("m2"));
        assert!(block.starts_with("Assistant: m3"));
        assert!(block.ends_with("Assistant: m7"));
    }

    #[test]
    fn test_prompt_section_order() {
        let profile = ProductProfile::from_preset(Product::Pro);
        let ctx = vec![entry("https://help.resolve.io/pro/f.htm", "A filter selects rows.")];
        let history = vec![HistoryMessage {
            role: Role::User,
            content: "hi".to_string(),
        }];
        let prompt = build_prompt(&PromptInput {
            profile: &profile,
            question: "What is a filter?",
            question_type: QuestionType::Definition,
            effective_version: "8-0",
            context: &ctx,
            history: &history,
            history_turns: 5,
            max_chars_per_chunk: 800,
        });
        let pos = |needle: &str| prompt.find(needle).unwrap();
        assert!(pos("You are RANI") < pos("Response format (definition)"));
        assert!(pos("Response format") < pos("Conversation history"));
        assert!(pos("Conversation history") < pos("--- Source 1 ---"));
        assert!(pos("--- Source 1 ---") < pos("version 8-0, question type: definition"));
        assert!(!prompt.contains(URL_SUPPRESSION_INSTRUCTION));
    }

    #[test]
    fn test_zero_context_prompt_suppresses_urls() {
        let profile = ProductProfile::from_preset(Product::Pro);
        let prompt = build_prompt(&PromptInput {
            profile: &profile,
            question: "What is a filter?",
            question_type: QuestionType::Definition,
            effective_version: "8-0",
            context: &[],
            history: &[],
            history_turns: 5,
            max_chars_per_chunk: 800,
        });
        assert!(prompt.contains(URL_SUPPRESSION_INSTRUCTION));
        assert!(prompt.contains(NO_CONTEXT_FOUND));
        assert!(!prompt.contains("Conversation history"));
    }

    #[test]
    fn test_parse_expansion() {
        assert_eq!(
            parse_expansion("filter, filters , row filter\n").as_deref(),
            Some("filter, filters, row filter")
        );
        assert_eq!(parse_expansion("  \n "), None);
        assert_eq!(parse_expansion(" , ,"), None);
    }

    #[test]
    fn test_advisories() {
        let profile = ProductProfile::from_preset(Product::Pro);
        let cat = &profile.catalog;

        let r = cat.resolve(Some("8-0"));
        assert!(version_advisories(&r, cat.latest_version()).is_empty());

        let r = cat.resolve(Some("7.9"));
        let adv = version_advisories(&r, cat.latest_version());
        assert_eq!(adv.len(), 1);
        assert!(adv[0].contains("some features may differ in other versions"));

        let r = cat.resolve(Some("9-9"));
        let adv = version_advisories(&r, cat.latest_version());
        assert_eq!(adv.len(), 1);
        assert!(adv[0].contains("9-9"));
        assert!(adv[0].contains("8-0"));
    }
}
