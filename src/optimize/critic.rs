use serde::{Deserialize, Serialize};

/// One structured improvement requested by the critic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub directive_type: String,
    pub description: String,
}

/// Critic output. Both fields are required; there is no lenient fallback.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Critique {
    pub overall_critique: String,
    pub improvement_directives: Vec<Directive>,
}

#[derive(Debug, thiserror::Error)]
pub enum CriticError {
    #[error("critic response is not valid critique JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parse a critic response, tolerating only a surrounding ```json fence.
pub fn parse_critique(raw: &str) -> Result<Critique, CriticError> {
    let stripped = raw.trim().replace("```json", "").replace("```", "");
    Ok(serde_json::from_str(stripped.trim())?)
}
