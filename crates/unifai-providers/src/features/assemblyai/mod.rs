use crate::features::http_transport::service::decode;
use crate::features::http_transport::{default_transport, JsonHttpService};
use crate::standard::{Diarization, SpeakerSegment, SpeechToTextResponse};
use crate::{credential_or_env, standardize};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use unifai_core::adapter::{
    HandlerTable, Operation, ProviderAdapter, ProviderError, ProviderResult,
};
use unifai_core::error_table::{ErrorKind, ErrorTable};
use unifai_core::{AsyncJobResponse, AsyncLaunchJob, CallArgs, CapabilityPath, Credentials, Result};
use tracing::debug;

pub const API_KEY_ENV: &str = "ASSEMBLYAI_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.assemblyai.com/v2";

#[derive(Debug, Deserialize)]
struct Transcript {
    id: String,
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    utterances: Option<Vec<Utterance>>,
}

#[derive(Debug, Deserialize)]
struct Utterance {
    speaker: String,
    text: String,
    start: u64,
    end: u64,
    confidence: f64,
}

/// Speaker labels are letters (`A`, `B`, ...); segments number them from 1 in order of appearance.
fn diarization(utterances: &[Utterance]) -> Diarization {
    let mut speakers: Vec<&str> = Vec::new();
    let entries = utterances
        .iter()
        .map(|u| {
            let index = match speakers.iter().position(|s| *s == u.speaker) {
                Some(i) => i,
                None => {
                    speakers.push(&u.speaker);
                    speakers.len() - 1
                }
            };
            SpeakerSegment {
                segment: u.text.clone(),
                start_time: u.start as f64 / 1000.0,
                end_time: u.end as f64 / 1000.0,
                speaker: index as u32 + 1,
                confidence: u.confidence,
            }
        })
        .collect();

    let total_speakers = utterances
        .iter()
        .map(|u| u.speaker.as_str())
        .collect::<BTreeSet<_>>()
        .len() as u32;

    Diarization {
        total_speakers,
        entries,
    }
}

pub struct AssemblyAiAdapter {
    http: JsonHttpService,
}

impl AssemblyAiAdapter {
    pub fn with_service(http: JsonHttpService) -> Self {
        Self { http }
    }

    fn launch_transcription(&self, args: CallArgs) -> ProviderResult<AsyncLaunchJob> {
        let file = args
            .file()
            .ok_or_else(|| ProviderError::with_status(400, "Missing audio file"))?;

        let mut body = json!({
            "audio_url": file.location,
            "speaker_labels": args.get("speakers").and_then(Value::as_bool).unwrap_or(true),
        });
        match args.get_str("language") {
            Some(language) => body["language_code"] = Value::from(language),
            None => body["language_detection"] = Value::Bool(true),
        }

        let original = self.http.post_json("transcript", body)?;
        let transcript: Transcript = decode(&original)?;
        debug!(job_id = %transcript.id, "Launched transcription");
        Ok(AsyncLaunchJob::new(transcript.id))
    }

    fn transcription_result(&self, provider_job_id: &str) -> ProviderResult<AsyncJobResponse> {
        let original = self.http.get_json(&format!("transcript/{provider_job_id}"))?;
        let transcript: Transcript = decode(&original)?;

        match transcript.status.as_str() {
            "queued" | "processing" => Ok(AsyncJobResponse::pending(provider_job_id, original)),
            "completed" => {
                let standardized = SpeechToTextResponse {
                    text: transcript.text.unwrap_or_default(),
                    diarization: diarization(transcript.utterances.as_deref().unwrap_or(&[])),
                };
                Ok(AsyncJobResponse::success(
                    provider_job_id,
                    standardize(original, &standardized)?,
                ))
            }
            "error" => {
                let message = transcript
                    .error
                    .unwrap_or_else(|| "transcription failed".to_string());
                Ok(AsyncJobResponse::failed(provider_job_id, message, original))
            }
            other => Err(ProviderError::new(format!(
                "unknown transcript status '{other}'"
            ))),
        }
    }
}

impl ProviderAdapter for AssemblyAiAdapter {
    const NAME: &'static str = "assemblyai";

    fn connect(credentials: Option<&Credentials>) -> Result<Self> {
        let api_key = credential_or_env(credentials, "api_key", API_KEY_ENV, Self::NAME)?;
        let base_url = credentials
            .and_then(|c| c.get("base_url"))
            .unwrap_or(DEFAULT_BASE_URL);

        let http = JsonHttpService::new(default_transport()?, base_url)
            .with_header("Authorization", api_key);
        Ok(Self::with_service(http))
    }

    fn register(table: &mut HandlerTable<Self>) {
        let speech_to_text = CapabilityPath::new("audio", "speech_to_text_async");
        table
            .launch_job(speech_to_text.clone(), Self::launch_transcription)
            .get_job_result(speech_to_text, Self::transcription_result);
    }

    fn error_table() -> ErrorTable {
        ErrorTable::new()
            .on_status(401, ErrorKind::Configuration)
            .on_status_for(Operation::GetJobResult, 404, ErrorKind::DeprecatedJobId)
            .on_message("transcript id not found", ErrorKind::DeprecatedJobId)
            .on_message("invalid transcript id", ErrorKind::DeprecatedJobId)
            .on_message("unsupported language", ErrorKind::Validation)
            .on_message("file does not appear to contain audio", ErrorKind::Validation)
    }
}
