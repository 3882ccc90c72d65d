//! In-process provider with no network access.
//!
//! Backs a phased similarity search over an in-memory document store and a
//! summarization job table, so every operation kind can run offline.

use crate::standard::{
    SearchDeleteResponse, SearchItem, SearchResponse, SearchUploadResponse, SummarizeResponse,
};
use crate::standardize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::RwLock;
use tracing::debug;
use unifai_core::adapter::{HandlerTable, ProviderAdapter, ProviderError, ProviderResult};
use unifai_core::error_table::{ErrorKind, ErrorTable};
use unifai_core::{
    AsyncJobResponse, AsyncLaunchJob, CallArgs, CapabilityPath, CoreError, Credentials,
    ProviderResponse, Result,
};
use uuid::Uuid;

const DEFAULT_POLLS_TO_COMPLETE: u32 = 2;
const DEFAULT_TOP_K: usize = 5;
const DEFAULT_FINISHED_JOB_LIMIT: usize = 256;

#[derive(Debug, Clone)]
enum JobProgress {
    Running { polls_left: u32, summary: String },
    Done { summary: String },
}

/// Jobs by id. Finished ids are queued in completion order; past the limit
/// the oldest finished job is dropped and its id becomes unknown.
#[derive(Debug, Default)]
struct JobTable {
    jobs: HashMap<String, JobProgress>,
    finished: VecDeque<String>,
}

impl JobTable {
    fn finish(&mut self, job_id: &str, limit: usize) {
        self.finished.push_back(job_id.to_string());
        while self.finished.len() > limit.max(1) {
            let Some(evicted) = self.finished.pop_front() else {
                break;
            };
            self.jobs.remove(&evicted);
            debug!(job_id = %evicted, "Evicted finished local job");
        }
    }
}

/// Thread-safe in-memory documents and jobs.
pub struct LocalAdapter {
    documents: RwLock<BTreeMap<String, String>>,
    jobs: RwLock<JobTable>,
    polls_to_complete: u32,
    finished_job_limit: usize,
}

fn poisoned() -> ProviderError {
    ProviderError::new("local store lock poisoned")
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Leading sentence, or the first words when there is no sentence break.
fn summarize(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.find(['.', '!', '?']) {
        Some(end) => trimmed[..=end].to_string(),
        None => trimmed
            .split_whitespace()
            .take(20)
            .collect::<Vec<_>>()
            .join(" "),
    }
}

impl LocalAdapter {
    pub fn new(polls_to_complete: u32) -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            jobs: RwLock::new(JobTable::default()),
            polls_to_complete,
            finished_job_limit: DEFAULT_FINISHED_JOB_LIMIT,
        }
    }

    /// Number of finished jobs kept readable.
    pub fn with_finished_job_limit(mut self, limit: usize) -> Self {
        self.finished_job_limit = limit;
        self
    }

    fn upload(&self, args: CallArgs) -> ProviderResult<ProviderResponse> {
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

        let mut documents = self.documents.write().map_err(|_| poisoned())?;
        let document_ids: Vec<String> = texts
            .into_iter()
            .map(|text| {
                let id = Uuid::new_v4().to_string();
                documents.insert(id.clone(), text);
                id
            })
            .collect();

        let original = json!({ "stored": document_ids.len() });
        standardize(original, &SearchUploadResponse { document_ids })
    }

    fn search(&self, args: CallArgs) -> ProviderResult<ProviderResponse> {
        let query = args
            .get_str("query")
            .ok_or_else(|| ProviderError::with_status(400, "Missing 'query' parameter"))?;
        let top_k = args
            .get("top_k")
            .and_then(Value::as_u64)
            .map(|k| k as usize)
            .unwrap_or(DEFAULT_TOP_K);
        let query_tokens = tokens(query);

        let documents = self.documents.read().map_err(|_| poisoned())?;
        let mut items: Vec<SearchItem> = documents
            .iter()
            .filter_map(|(id, text)| {
                let doc_tokens = tokens(text);
                let shared = query_tokens.intersection(&doc_tokens).count();
                if shared == 0 {
                    return None;
                }
                let union = query_tokens.union(&doc_tokens).count();
                Some(SearchItem {
                    document_id: id.clone(),
                    text: text.clone(),
                    score: shared as f64 / union as f64,
                })
            })
            .collect();
        items.sort_by(|a, b| b.score.total_cmp(&a.score));
        items.truncate(top_k);

        let original = json!({ "query": query, "matches": items.len() });
        standardize(original, &SearchResponse { items })
    }

    fn delete(&self, args: CallArgs) -> ProviderResult<ProviderResponse> {
        let document_id = args
            .get_str("document_id")
            .ok_or_else(|| ProviderError::with_status(400, "Missing 'document_id' parameter"))?
            .to_string();

        let deleted = self
            .documents
            .write()
            .map_err(|_| poisoned())?
            .remove(&document_id)
            .is_some();

        standardize(
            json!({ "deleted": deleted }),
            &SearchDeleteResponse {
                document_id,
                deleted,
            },
        )
    }

    fn launch_summary(&self, args: CallArgs) -> ProviderResult<AsyncLaunchJob> {
        let text = args
            .get_str("text")
            .ok_or_else(|| ProviderError::with_status(400, "Missing 'text' parameter"))?;

        let job_id = Uuid::new_v4().to_string();
        let progress = JobProgress::Running {
            polls_left: self.polls_to_complete,
            summary: summarize(text),
        };
        self.jobs
            .write()
            .map_err(|_| poisoned())?
            .jobs
            .insert(job_id.clone(), progress);

        debug!(job_id = %job_id, "Queued local summary job");
        Ok(AsyncLaunchJob::new(job_id))
    }

    /// Each poll of a running job counts down; the job completes once the count reaches zero.
    fn summary_result(&self, provider_job_id: &str) -> ProviderResult<AsyncJobResponse> {
        let mut table = self.jobs.write().map_err(|_| poisoned())?;
        let Some(progress) = table.jobs.get_mut(provider_job_id) else {
            return Ok(AsyncJobResponse::deprecated(provider_job_id));
        };

        let summary = match progress {
            JobProgress::Running { polls_left, .. } if *polls_left > 0 => {
                *polls_left -= 1;
                return Ok(AsyncJobResponse::pending(
                    provider_job_id,
                    json!({ "status": "running", "polls_left": *polls_left }),
                ));
            }
            JobProgress::Running { summary, .. } => {
                let summary = std::mem::take(summary);
                *progress = JobProgress::Done {
                    summary: summary.clone(),
                };
                table.finish(provider_job_id, self.finished_job_limit);
                summary
            }
            JobProgress::Done { summary } => summary.clone(),
        };

        let response = standardize(
            json!({ "status": "done", "summary": summary }),
            &SummarizeResponse { result: summary },
        )?;
        Ok(AsyncJobResponse::success(provider_job_id, response))
    }
}

impl ProviderAdapter for LocalAdapter {
    const NAME: &'static str = "local";

    fn connect(credentials: Option<&Credentials>) -> Result<Self> {
        let polls = match credentials.and_then(|c| c.get("polls_to_complete")) {
            Some(raw) => raw.parse::<u32>().map_err(|e| {
                CoreError::Configuration(format!("invalid polls_to_complete '{raw}': {e}"))
            })?,
            None => DEFAULT_POLLS_TO_COMPLETE,
        };
        Ok(Self::new(polls))
    }

    fn register(table: &mut HandlerTable<Self>) {
        let search = CapabilityPath::new("text", "search");
        table
            .call(search.clone().with_phase("upload"), Self::upload)
            .call(search.clone().with_phase("search"), Self::search)
            .call(search.with_phase("delete"), Self::delete);

        let summarize = CapabilityPath::new("text", "summarize_async");
        table
            .launch_job(summarize.clone(), Self::launch_summary)
            .get_job_result(summarize, Self::summary_result);
    }

    fn error_table() -> ErrorTable {
        ErrorTable::new().on_status(400, ErrorKind::Validation)
    }
}
