//! Completion request body.

use serde::Deserialize;

use crate::error::ServerError;
use crate::session::GenerationRequest;

/// Body of `POST /completion/{persona}`.
///
/// Field names are camelCase; the snake_case names of the older chat server
/// are accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(alias = "max_new_tokens", alias = "max_output_tokens")]
    pub max_output_tokens: Option<usize>,
    pub temperature: Option<f32>,
    #[serde(alias = "top_p", alias = "nucleus_p")]
    pub nucleus_p: Option<f32>,
    #[serde(alias = "repetition_penalty")]
    pub repetition_penalty: Option<f32>,
    pub seed: Option<u64>,
}

impl CompletionRequest {
    pub fn into_request(self, persona: &str) -> Result<GenerationRequest, ServerError> {
        let mut request = GenerationRequest::new(persona, &self.prompt)?;
        request.max_output_tokens = self.max_output_tokens;
        request.temperature = self.temperature;
        request.nucleus_p = self.nucleus_p;
        request.repetition_penalty = self.repetition_penalty;
        request.seed = self.seed;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_camel_case_and_aliases() {
        let camel: CompletionRequest = serde_json::from_str(
            r#"{"prompt":"Hallo","maxOutputTokens":12,"nucleusP":0.5,"repetitionPenalty":1.1}"#,
        )
        .unwrap();
        let snake: CompletionRequest = serde_json::from_str(
            r#"{"prompt":"Hallo","max_new_tokens":12,"top_p":0.5,"repetition_penalty":1.1}"#,
        )
        .unwrap();
        for body in [camel, snake] {
            assert_eq!(body.max_output_tokens, Some(12));
            assert_eq!(body.nucleus_p, Some(0.5));
            assert_eq!(body.repetition_penalty, Some(1.1));
        }
    }

    #[test]
    fn missing_prompt_is_invalid() {
        let body: CompletionRequest = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            body.into_request("kant"),
            Err(ServerError::InvalidRequest(_))
        ));
    }
}
