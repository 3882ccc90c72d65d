//! Standardized response shapes, one per capability. Every provider implementing a
//! capability returns the same type, and the recorded contracts mirror these structs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub message: String,
}

/// `text__chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub generated_text: String,
    pub message: Vec<ChatMessage>,
}

/// One streamed `text__chat` chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatStreamChunk {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingItem {
    pub embedding: Vec<f64>,
}

/// `text__embeddings`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub items: Vec<EmbeddingItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerSegment {
    pub segment: String,
    pub start_time: f64,
    pub end_time: f64,
    pub speaker: u32,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diarization {
    pub total_speakers: u32,
    pub entries: Vec<SpeakerSegment>,
}

/// `audio__speech_to_text_async`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechToTextResponse {
    pub text: String,
    pub diarization: Diarization,
}

/// `text__search__upload`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchUploadResponse {
    pub document_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub document_id: String,
    pub text: String,
    pub score: f64,
}

/// `text__search__search`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<SearchItem>,
}

/// `text__search__delete`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDeleteResponse {
    pub document_id: String,
    pub deleted: bool,
}

/// `text__summarize_async`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizeResponse {
    pub result: String,
}
