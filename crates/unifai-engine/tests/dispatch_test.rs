use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use unifai_core::{CallArgs, CapabilityPath, CoreError, EnvelopeStatus, FileInput};
use unifai_engine::features::async_jobs::JobTracker;
use unifai_engine::shared::config::EngineConfig;
use unifai_engine::shared::types::{InvokeRequest, JobHandle};
use unifai_engine::Engine;

fn engine() -> Engine {
    let config = EngineConfig {
        fake_delay_ms: 5,
        poll_interval: Duration::from_millis(1),
        poll_max_wait: Duration::from_secs(5),
        ..EngineConfig::default()
    }
    .with_data_dir(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data"));
    Engine::from_config(config).unwrap()
}

fn chat() -> CapabilityPath {
    CapabilityPath::new("text", "chat")
}

fn speech_to_text() -> CapabilityPath {
    CapabilityPath::new("audio", "speech_to_text_async")
}

fn search(phase: &str) -> CapabilityPath {
    CapabilityPath::new("text", "search").with_phase(phase)
}

#[test]
fn test_fake_invoke_twice_returns_same_shape() {
    let engine = engine();
    let request = InvokeRequest::new(
        "openai",
        chat(),
        CallArgs::new().with("text", "What is the capital of France?"),
    )
    .fake(true);

    let first = engine.invoke(request.clone()).unwrap();
    let second = engine.invoke(request).unwrap();

    for envelope in [&first, &second] {
        assert_eq!(envelope.status, EnvelopeStatus::Success);
        assert_eq!(envelope.provider, "openai");
    }
    assert!(first.standardized_response["generated_text"].is_string());
    assert_eq!(
        first.standardized_response.as_object().unwrap().len(),
        second.standardized_response.as_object().unwrap().len()
    );
}

#[test]
fn test_fake_invoke_async_on_test_runtime() {
    let engine = engine();
    let request = InvokeRequest::new(
        "openai",
        CapabilityPath::new("text", "embeddings"),
        CallArgs::new().with("texts", json!(["hello"])),
    )
    .fake(true);

    let envelope = tokio_test::block_on(engine.invoke_async(request)).unwrap();
    assert!(envelope.standardized_response["items"].is_array());
}

#[test]
fn test_unknown_model_is_rejected() {
    let err = engine()
        .invoke(
            InvokeRequest::new("openai", chat(), CallArgs::new().with("model", "gpt-0")).fake(true),
        )
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_file_type_validation() {
    let engine = engine();
    let launch = |file: FileInput| {
        engine.launch_job(
            InvokeRequest::new("assemblyai", speech_to_text(), CallArgs::new().with_file(file))
                .fake(true),
        )
    };

    let err = launch(FileInput::new("holiday.png")).unwrap_err();
    assert!(matches!(err, CoreError::Validation(ref message) if message.contains("image/png")));

    assert!(launch(FileInput::new("meeting.mp3")).is_ok());
    assert!(launch(FileInput::new("https://cdn.example.com/call.wav?sig=abc")).is_ok());
    assert!(launch(FileInput::new("recording.unknownext")).is_ok());
}

#[test]
fn test_language_validation_on_live_local_search() {
    let engine = engine();
    let upload = engine
        .invoke(InvokeRequest::new(
            "local",
            search("upload"),
            CallArgs::new().with("texts", json!(["Rust is fast", "Bonjour le monde"])),
        ))
        .unwrap();
    assert_eq!(upload.standardized_response["document_ids"].as_array().unwrap().len(), 2);

    let query = |language: &str| {
        engine.invoke(InvokeRequest::new(
            "local",
            search("search"),
            CallArgs::new().with("query", "rust").with("language", language),
        ))
    };

    let found = query("EN-us-Latn").unwrap();
    assert!(found.standardized_response["items"]
        .as_array()
        .unwrap()
        .iter()
        .any(|item| item["text"] == "Rust is fast"));
    assert!(query("fr").is_ok());

    assert!(matches!(query("zz"), Err(CoreError::UnsupportedLanguage(_))));
    assert!(matches!(query("xx--"), Err(CoreError::LanguageFormat(_))));
}

#[test]
fn test_launched_job_reaches_one_terminal_state() {
    let engine = engine();
    let path = CapabilityPath::new("text", "summarize_async");
    let request = InvokeRequest::new(
        "local",
        path,
        CallArgs::new().with("text", "Rust has no garbage collector. It is fast."),
    );

    let job = engine.launch_job(request.clone()).unwrap();
    let handle = JobHandle::launched(&request, &job);
    let mut tracker = JobTracker::new(&handle);

    for _ in 0..8 {
        let envelope = engine.get_job_result(&handle).unwrap();
        assert_eq!(envelope.provider_job_id(), job.provider_job_id);
        tracker.record(&envelope).unwrap();
    }

    assert!(tracker.is_terminal());
    let first_terminal = tracker
        .observations()
        .iter()
        .position(|o| o.terminal)
        .unwrap();
    assert!(first_terminal > 0);
    assert!(tracker.observations()[first_terminal..].iter().all(|o| o.terminal));
}

#[test]
fn test_invalid_job_id_is_deprecated_never_pending() {
    let engine = engine();

    let request =
        InvokeRequest::new("assemblyai", speech_to_text(), CallArgs::new()).fake(true);
    engine.launch_job(request).unwrap();
    let fake = JobHandle::new("assemblyai", speech_to_text(), "not-a-job").fake(true);
    assert!(matches!(
        engine.get_job_result(&fake),
        Err(CoreError::DeprecatedJobId(_))
    ));

    let live = JobHandle::new("local", CapabilityPath::new("text", "summarize_async"), "not-a-job");
    assert!(matches!(
        engine.get_job_result(&live),
        Err(CoreError::DeprecatedJobId(_))
    ));
}

#[tokio::test]
async fn test_fake_job_polls_to_recorded_transcript() {
    let engine = engine();
    let request =
        InvokeRequest::new("assemblyai", speech_to_text(), CallArgs::new()).fake(true);
    let job = engine.launch_job(request.clone()).unwrap();

    let outcome = engine
        .poller()
        .poll_until_terminal(&JobHandle::launched(&request, &job))
        .await
        .unwrap();
    assert_eq!(outcome.observations.len(), 1);
    match outcome.envelope {
        unifai_core::AsyncEnvelope::Terminal { envelope, .. } => {
            assert_eq!(envelope.standardized_response["diarization"]["total_speakers"], 2);
        }
        other => panic!("expected terminal envelope, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fake_streaming_is_rejected() {
    let result = engine()
        .stream(InvokeRequest::new("openai", chat(), CallArgs::new()).fake(true))
        .await;
    assert!(matches!(result, Err(CoreError::Validation(_))));
}
