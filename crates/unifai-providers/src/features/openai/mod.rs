use crate::features::http_transport::service::decode;
use crate::features::http_transport::{default_transport, JsonHttpService};
use crate::standard::{
    ChatMessage, ChatResponse, ChatStreamChunk, EmbeddingItem, EmbeddingsResponse,
};
use crate::{credential_or_env, standardize};
use futures::future;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use unifai_core::adapter::{
    HandlerTable, Operation, ProviderAdapter, ProviderChunkStream, ProviderError, ProviderResult,
};
use unifai_core::error_table::{ErrorKind, ErrorTable};
use unifai_core::{CallArgs, CapabilityPath, Credentials, ProviderResponse, Result};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDINGS_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Embeddings {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f64>,
}

pub struct OpenAiAdapter {
    http: JsonHttpService,
}

impl OpenAiAdapter {
    pub fn with_service(http: JsonHttpService) -> Self {
        Self { http }
    }

    fn model<'a>(args: &'a CallArgs, fallback: &'a str) -> &'a str {
        args.get_str("model").unwrap_or(fallback)
    }

    fn chat_messages(args: &CallArgs) -> ProviderResult<(String, Vec<Value>)> {
        let text = args
            .get_str("text")
            .ok_or_else(|| ProviderError::with_status(400, "Missing 'text' parameter"))?
            .to_string();

        let mut messages = Vec::new();
        if let Some(system) = args.get_str("chatbot_global_action") {
            messages.push(json!({ "role": "system", "content": system }));
        }
        if let Some(history) = args.get("previous_history").and_then(Value::as_array) {
            for turn in history {
                let role = turn.get("role").and_then(Value::as_str).unwrap_or("user");
                let content = turn.get("message").and_then(Value::as_str).unwrap_or_default();
                messages.push(json!({ "role": role, "content": content }));
            }
        }
        messages.push(json!({ "role": "user", "content": text }));
        Ok((text, messages))
    }

    fn chat_body(args: &CallArgs, messages: Vec<Value>) -> Value {
        let mut body = json!({
            "model": Self::model(args, DEFAULT_CHAT_MODEL),
            "messages": messages,
        });
        for key in ["temperature", "max_tokens"] {
            if let Some(value) = args.get(key).filter(|v| !v.is_null()) {
                body[key] = value.clone();
            }
        }
        body
    }

    fn chat(&self, args: CallArgs) -> ProviderResult<ProviderResponse> {
        let (text, messages) = Self::chat_messages(&args)?;
        let original = self
            .http
            .post_json("chat/completions", Self::chat_body(&args, messages))?;

        let completion: Completion = decode(&original)?;
        let generated_text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::new("completion has no choices"))?;

        let standardized = ChatResponse {
            message: vec![
                ChatMessage {
                    role: "user".to_string(),
                    message: text,
                },
                ChatMessage {
                    role: "assistant".to_string(),
                    message: generated_text.clone(),
                },
            ],
            generated_text,
        };
        standardize(original, &standardized)
    }

    fn chat_stream(self: Arc<Self>, args: CallArgs) -> ProviderResult<ProviderChunkStream> {
        let (_, messages) = Self::chat_messages(&args)?;
        let mut body = Self::chat_body(&args, messages);
        body["stream"] = Value::Bool(true);

        let events = self.http.post_event_stream("chat/completions", body)?;
        let chunks = events.filter_map(|event| {
            future::ready(match event {
                Err(e) => Some(Err(e)),
                Ok(event) => match decode::<CompletionChunk>(&event) {
                    Err(e) => Some(Err(e)),
                    Ok(chunk) => chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content)
                        .filter(|text| !text.is_empty())
                        .map(|text| {
                            serde_json::to_value(ChatStreamChunk { text })
                                .map_err(|e| ProviderError::new(e.to_string()))
                        }),
                },
            })
        });
        Ok(Box::pin(chunks))
    }

    fn embeddings(&self, args: CallArgs) -> ProviderResult<ProviderResponse> {
        let texts: Vec<String> = match args.get("texts") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => args.get_str("text").map(|t| vec![t.to_string()]).unwrap_or_default(),
        };
        if texts.is_empty() {
            return Err(ProviderError::with_status(400, "Missing 'texts' parameter"));
        }

        let original = self.http.post_json(
            "embeddings",
            json!({
                "model": Self::model(&args, DEFAULT_EMBEDDINGS_MODEL),
                "input": texts,
            }),
        )?;

        let embeddings: Embeddings = decode(&original)?;
        let standardized = EmbeddingsResponse {
            items: embeddings
                .data
                .into_iter()
                .map(|row| EmbeddingItem {
                    embedding: row.embedding,
                })
                .collect(),
        };
        standardize(original, &standardized)
    }
}

impl ProviderAdapter for OpenAiAdapter {
    const NAME: &'static str = "openai";

    fn connect(credentials: Option<&Credentials>) -> Result<Self> {
        let api_key = credential_or_env(credentials, "api_key", API_KEY_ENV, Self::NAME)?;
        let base_url = credentials
            .and_then(|c| c.get("base_url"))
            .unwrap_or(DEFAULT_BASE_URL);

        let http = JsonHttpService::new(default_transport()?, base_url)
            .with_header("Authorization", format!("Bearer {api_key}"));
        Ok(Self::with_service(http))
    }

    fn register(table: &mut HandlerTable<Self>) {
        let chat = CapabilityPath::new("text", "chat");
        table
            .call(chat.clone(), Self::chat)
            .stream(chat, Self::chat_stream)
            .call(CapabilityPath::new("text", "embeddings"), Self::embeddings);
    }

    fn error_table() -> ErrorTable {
        ErrorTable::new()
            .on_status(401, ErrorKind::Configuration)
            .on_status(403, ErrorKind::Configuration)
            .on_message("maximum context length", ErrorKind::Validation)
            .on_status_for(Operation::Call, 400, ErrorKind::Validation)
            .on_status_for(Operation::Stream, 400, ErrorKind::Validation)
    }
}
