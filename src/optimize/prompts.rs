use std::path::Path;

use anyhow::{Context, Result};

use super::critic::Directive;

pub const INITIAL_CONTENT_FILE: &str = "initial_content_prompt.md";
pub const CRITIC_FILE: &str = "critical_prompt.md";
pub const OPTIMIZER_FILE: &str = "optimizer_prompt.md";

/// Placeholders: `{query}`, `{aio_text}`.
pub const INITIAL_CONTENT_PROMPT: &str = r#"You are an expert content writer.

Write an original, self-contained text that answers the search query below as completely as possible.
Use the reference overview only to understand what a good answer covers; do not copy it.

**Query:** "{query}"

**Reference overview:**
"{aio_text}"

Reply with the text only, no preamble."#;

/// Placeholders: `{query}`, `{benchmark_text}`, `{current_text}`.
pub const CRITIC_PROMPT: &str = r#"You are a strict relevance critic for search ranking.

A semantic ranker judges how relevant a text is to the query below. The benchmark text currently
ranks highest. Compare the candidate against the benchmark and explain what keeps the candidate
from ranking higher.

**Query:** "{query}"

**Benchmark text:**
"{benchmark_text}"

**Candidate text:**
"{current_text}"

Respond with JSON only, using exactly this shape:
{{
  "overall_critique": "one paragraph assessment",
  "improvement_directives": [
    {{ "directive_type": "coverage | precision | structure | terminology | other", "description": "one concrete change" }}
  ]
}}"#;

/// Placeholders: `{current_text}`, `{directives}`.
pub const OPTIMIZER_PROMPT: &str = r#"You are an expert editor. Rewrite the text below applying every directive.
Keep the language of the original text and keep it factual.

**Text:**
"{current_text}"

**Directives:**
{directives}

Reply with the rewritten text only."#;

/// The three prompt templates the optimizer fills in.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub initial_content: String,
    pub critic: String,
    pub optimizer: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            initial_content: INITIAL_CONTENT_PROMPT.to_string(),
            critic: CRITIC_PROMPT.to_string(),
            optimizer: OPTIMIZER_PROMPT.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Load all three templates from `dir`. Every file is required.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let read = |name: &str| {
            let path = dir.join(name);
            std::fs::read_to_string(&path)
                .with_context(|| format!("Missing prompt template {}", path.display()))
        };
        Ok(Self {
            initial_content: read(INITIAL_CONTENT_FILE)?,
            critic: read(CRITIC_FILE)?,
            optimizer: read(OPTIMIZER_FILE)?,
        })
    }

    pub fn initial_prompt(&self, query: &str, aio_text: &str) -> String {
        render(
            &self.initial_content,
            &[("query", query), ("aio_text", aio_text)],
        )
    }

    pub fn critic_prompt(&self, query: &str, benchmark_text: &str, current_text: &str) -> String {
        render(
            &self.critic,
            &[
                ("query", query),
                ("benchmark_text", benchmark_text),
                ("current_text", current_text),
            ],
        )
    }

    pub fn optimizer_prompt(&self, current_text: &str, directives: &[Directive]) -> String {
        let directives = flatten_directives(directives);
        render(
            &self.optimizer,
            &[("current_text", current_text), ("directives", &directives)],
        )
    }
}

/// One `- description` line per directive, in order.
pub fn flatten_directives(directives: &[Directive]) -> String {
    directives
        .iter()
        .map(|d| format!("- {}", d.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Single-pass `{name}` substitution. `{{` and `}}` are literal braces;
/// unknown placeholders are left untouched. Substituted values are never
/// re-scanned.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        if rest.starts_with("{{") {
            out.push('{');
            rest = &rest[2..];
        } else if rest.starts_with("}}") {
            out.push('}');
            rest = &rest[2..];
        } else if rest.starts_with('{') {
            let substituted = rest[1..].find('}').and_then(|close| {
                let name = &rest[1..1 + close];
                vars.iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (close, *value))
            });
            match substituted {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &rest[close + 2..];
                }
                None => {
                    out.push('{');
                    rest = &rest[1..];
                }
            }
        } else {
            out.push('}');
            rest = &rest[1..];
        }
    }

    out.push_str(rest);
    out
}
