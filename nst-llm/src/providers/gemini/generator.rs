//! Gemini content generation provider

use super::client::GeminiClient;
use super::types::{Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig};
use crate::prompt::{chapters_prompt, lesson_prompt, system_instruction};
use crate::ContentGenerator;
use async_trait::async_trait;
use nst_core::{
    Chapter, ChapterQuery, ContentRequest, GenerationError, GeneratorConfig, LessonContent,
    NstResult,
};
use serde_json::Value;

pub struct GeminiContentProvider {
    client: GeminiClient,
    model: String,
}

impl GeminiContentProvider {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_config(config: &GeneratorConfig) -> NstResult<Self> {
        Ok(Self::new(GeminiClient::new(config)?, config.model.clone()))
    }

    async fn complete(&self, language: nst_core::Language, prompt: String, temperature: f32) -> NstResult<String> {
        let request = GenerateContentRequest {
            contents: vec![Content::user(prompt)],
            system_instruction: Some(Content::system(system_instruction(language))),
            generation_config: Some(GenerationConfig::json(temperature)),
        };
        let response = self.client.generate_content(&self.model, &request).await?;
        extract_text(&response)
    }
}

fn extract_text(response: &GenerateContentResponse) -> NstResult<String> {
    if let Some(text) = response.text() {
        return Ok(text);
    }
    let reason = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.clone())
        .or_else(|| response.candidates.first().and_then(|c| c.finish_reason.clone()))
        .unwrap_or_else(|| "empty response".to_string());
    Err(GenerationError::InvalidResponse {
        provider: "gemini".to_string(),
        reason,
    }
    .into())
}

/// Strip a surrounding markdown code fence, if the model added one anyway.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Turn model output into a lesson payload.
///
/// JSON objects are used as-is; anything else is wrapped as `{"content": text}`.
/// Missing `title` is filled from the chapter, and the request's type and
/// language are recorded.
pub fn parse_lesson(text: &str, request: &ContentRequest) -> LessonContent {
    let mut payload = match serde_json::from_str::<Value>(strip_fence(text)) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = serde_json::Map::new();
            map.insert("content".to_string(), Value::String(text.trim().to_string()));
            map
        }
    };
    payload
        .entry("title")
        .or_insert_with(|| Value::String(request.chapter.title.clone()));
    payload.insert(
        "type".to_string(),
        Value::String(request.content_type.as_str().to_string()),
    );
    payload.insert(
        "language".to_string(),
        Value::String(request.language.as_str().to_string()),
    );
    LessonContent::new(Value::Object(payload))
}

pub fn parse_chapters(text: &str) -> NstResult<Vec<Chapter>> {
    let value: Value = serde_json::from_str(strip_fence(text)).map_err(|e| {
        GenerationError::InvalidResponse {
            provider: "gemini".to_string(),
            reason: format!("chapter list is not JSON: {}", e),
        }
    })?;
    // Accept a bare array or {"chapters": [...]}.
    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("chapters") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    let chapters: Vec<Chapter> = list
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .filter(|c: &Chapter| !c.id.trim().is_empty())
        .collect();
    if chapters.is_empty() {
        return Err(GenerationError::InvalidResponse {
            provider: "gemini".to_string(),
            reason: "no chapters in response".to_string(),
        }
        .into());
    }
    Ok(chapters)
}

#[async_trait]
impl ContentGenerator for GeminiContentProvider {
    async fn generate(&self, request: &ContentRequest) -> NstResult<LessonContent> {
        let text = self
            .complete(request.language, lesson_prompt(request), 0.4)
            .await?;
        Ok(parse_lesson(&text, request))
    }

    async fn list_chapters(&self, query: &ChapterQuery) -> NstResult<Vec<Chapter>> {
        let text = self
            .complete(query.language, chapters_prompt(query), 0.2)
            .await?;
        parse_chapters(&text)
    }

    fn provider_name(&self) -> &str {
        "gemini"
    }
}

impl std::fmt::Debug for GeminiContentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiContentProvider")
            .field("model", &self.model)
            .finish()
    }
}
