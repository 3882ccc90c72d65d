//! Typed registration of provider capabilities.
//!
//! An adapter lists the operations it implements in a [`HandlerTable`] keyed by
//! capability path and operation kind. Only registered handlers exist, so the
//! registry never has to guess which operations an adapter really provides.

use crate::error_table::ErrorTable;
use crate::{
    AsyncJobResponse, AsyncLaunchJob, CallArgs, CapabilityPath, CoreError, Credentials,
    ProviderResponse, Result,
};
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Call,
    Stream,
    LaunchJob,
    GetJobResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey {
    pub path: CapabilityPath,
    pub operation: Operation,
}

impl OperationKey {
    pub fn new(path: CapabilityPath, operation: Operation) -> Self {
        Self { path, operation }
    }
}

/// Raw failure reported by an adapter, before provider-specific classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {status})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Chunks as produced by an adapter.
pub type ProviderChunkStream = Pin<Box<dyn Stream<Item = ProviderResult<Value>> + Send>>;

/// Chunks after error classification, as handed to callers.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

pub enum Handler<A> {
    Call(fn(&A, CallArgs) -> ProviderResult<ProviderResponse>),
    Stream(fn(Arc<A>, CallArgs) -> ProviderResult<ProviderChunkStream>),
    LaunchJob(fn(&A, CallArgs) -> ProviderResult<AsyncLaunchJob>),
    GetJobResult(fn(&A, &str) -> ProviderResult<AsyncJobResponse>),
}

impl<A> Clone for Handler<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Handler<A> {}

impl<A> Handler<A> {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Call(_) => Operation::Call,
            Self::Stream(_) => Operation::Stream,
            Self::LaunchJob(_) => Operation::LaunchJob,
            Self::GetJobResult(_) => Operation::GetJobResult,
        }
    }
}

pub struct HandlerTable<A> {
    handlers: BTreeMap<OperationKey, Handler<A>>,
}

impl<A> Default for HandlerTable<A> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<A> HandlerTable<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call(
        &mut self,
        path: CapabilityPath,
        handler: fn(&A, CallArgs) -> ProviderResult<ProviderResponse>,
    ) -> &mut Self {
        self.insert(path, Handler::Call(handler))
    }

    pub fn stream(
        &mut self,
        path: CapabilityPath,
        handler: fn(Arc<A>, CallArgs) -> ProviderResult<ProviderChunkStream>,
    ) -> &mut Self {
        self.insert(path, Handler::Stream(handler))
    }

    pub fn launch_job(
        &mut self,
        path: CapabilityPath,
        handler: fn(&A, CallArgs) -> ProviderResult<AsyncLaunchJob>,
    ) -> &mut Self {
        self.insert(path, Handler::LaunchJob(handler))
    }

    pub fn get_job_result(
        &mut self,
        path: CapabilityPath,
        handler: fn(&A, &str) -> ProviderResult<AsyncJobResponse>,
    ) -> &mut Self {
        self.insert(path, Handler::GetJobResult(handler))
    }

    fn insert(&mut self, path: CapabilityPath, handler: Handler<A>) -> &mut Self {
        self.handlers
            .insert(OperationKey::new(path, handler.operation()), handler);
        self
    }

    pub fn get(&self, key: &OperationKey) -> Option<Handler<A>> {
        self.handlers.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &OperationKey> {
        self.handlers.keys()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Checks that every path registers a coherent set of operations:
    /// async paths need both job handlers and nothing else, sync paths need a call.
    pub fn validate(&self, provider: &str) -> Result<()> {
        if self.handlers.is_empty() {
            return Err(CoreError::Configuration(format!(
                "provider '{provider}' registers no capabilities"
            )));
        }

        let mut by_path: BTreeMap<&CapabilityPath, BTreeSet<Operation>> = BTreeMap::new();
        for key in self.handlers.keys() {
            by_path.entry(&key.path).or_default().insert(key.operation);
        }

        for (path, operations) in by_path {
            if path.is_async() {
                let launch = operations.contains(&Operation::LaunchJob);
                let result = operations.contains(&Operation::GetJobResult);
                if !launch || !result || operations.len() != 2 {
                    return Err(CoreError::Configuration(format!(
                        "provider '{provider}': async capability {path} must register exactly a launch and a result handler"
                    )));
                }
            } else {
                if operations.contains(&Operation::LaunchJob)
                    || operations.contains(&Operation::GetJobResult)
                {
                    return Err(CoreError::Configuration(format!(
                        "provider '{provider}': job handlers registered on synchronous capability {path}"
                    )));
                }
                if !operations.contains(&Operation::Call) {
                    return Err(CoreError::Configuration(format!(
                        "provider '{provider}': capability {path} has no call handler"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// A provider integration. Implementors own their credentials and HTTP client.
pub trait ProviderAdapter: Send + Sync + Sized + 'static {
    const NAME: &'static str;

    /// Builds an instance, using `credentials` when given and the adapter's defaults otherwise.
    fn connect(credentials: Option<&Credentials>) -> Result<Self>;

    fn register(table: &mut HandlerTable<Self>);

    fn error_table() -> ErrorTable {
        ErrorTable::new()
    }
}

/// A connected adapter with its handler table, erased over the adapter type.
pub trait BoundAdapter: Send + Sync {
    fn provider(&self) -> &str;

    fn call(&self, path: &CapabilityPath, args: CallArgs) -> Result<ProviderResponse>;

    fn stream(&self, path: &CapabilityPath, args: CallArgs) -> Result<ChunkStream>;

    fn launch_job(&self, path: &CapabilityPath, args: CallArgs) -> Result<AsyncLaunchJob>;

    fn get_job_result(&self, path: &CapabilityPath, provider_job_id: &str)
        -> Result<AsyncJobResponse>;
}

struct Bound<A> {
    instance: Arc<A>,
    table: Arc<HandlerTable<A>>,
    errors: Arc<ErrorTable>,
}

impl<A: ProviderAdapter> Bound<A> {
    fn handler(&self, path: &CapabilityPath, operation: Operation) -> Result<Handler<A>> {
        self.table
            .get(&OperationKey::new(path.clone(), operation))
            .ok_or_else(|| unsupported(A::NAME, path, operation))
    }
}

fn unsupported(provider: &str, path: &CapabilityPath, operation: Operation) -> CoreError {
    CoreError::Configuration(format!(
        "provider '{provider}' does not implement {operation:?} for {path}"
    ))
}

impl<A: ProviderAdapter> BoundAdapter for Bound<A> {
    fn provider(&self) -> &str {
        A::NAME
    }

    fn call(&self, path: &CapabilityPath, args: CallArgs) -> Result<ProviderResponse> {
        match self.handler(path, Operation::Call)? {
            Handler::Call(f) => f(self.instance.as_ref(), args)
                .map_err(|e| self.errors.classify(A::NAME, Operation::Call, e)),
            _ => Err(unsupported(A::NAME, path, Operation::Call)),
        }
    }

    fn stream(&self, path: &CapabilityPath, args: CallArgs) -> Result<ChunkStream> {
        match self.handler(path, Operation::Stream)? {
            Handler::Stream(f) => {
                let chunks = f(Arc::clone(&self.instance), args)
                    .map_err(|e| self.errors.classify(A::NAME, Operation::Stream, e))?;
                let errors = Arc::clone(&self.errors);
                Ok(Box::pin(chunks.map(move |chunk| {
                    chunk.map_err(|e| errors.classify(A::NAME, Operation::Stream, e))
                })))
            }
            _ => Err(unsupported(A::NAME, path, Operation::Stream)),
        }
    }

    fn launch_job(&self, path: &CapabilityPath, args: CallArgs) -> Result<AsyncLaunchJob> {
        match self.handler(path, Operation::LaunchJob)? {
            Handler::LaunchJob(f) => f(self.instance.as_ref(), args)
                .map_err(|e| self.errors.classify(A::NAME, Operation::LaunchJob, e)),
            _ => Err(unsupported(A::NAME, path, Operation::LaunchJob)),
        }
    }

    fn get_job_result(
        &self,
        path: &CapabilityPath,
        provider_job_id: &str,
    ) -> Result<AsyncJobResponse> {
        match self.handler(path, Operation::GetJobResult)? {
            Handler::GetJobResult(f) => f(self.instance.as_ref(), provider_job_id)
                .map_err(|e| self.errors.classify(A::NAME, Operation::GetJobResult, e)),
            _ => Err(unsupported(A::NAME, path, Operation::GetJobResult)),
        }
    }
}

type Connector = dyn Fn(Option<&Credentials>) -> Result<Arc<dyn BoundAdapter>> + Send + Sync;

/// Registry entry for one adapter type: its declared operations and a way to connect it.
#[derive(Clone)]
pub struct ProviderEntry {
    name: &'static str,
    operations: Vec<OperationKey>,
    connector: Arc<Connector>,
}

impl ProviderEntry {
    pub fn of<A: ProviderAdapter>() -> Result<Self> {
        let mut table = HandlerTable::<A>::new();
        A::register(&mut table);
        table.validate(A::NAME)?;

        let operations: Vec<OperationKey> = table.keys().cloned().collect();
        let table = Arc::new(table);
        let errors = Arc::new(A::error_table());

        let connector = move |credentials: Option<&Credentials>| -> Result<Arc<dyn BoundAdapter>> {
            let instance = A::connect(credentials)?;
            Ok(Arc::new(Bound {
                instance: Arc::new(instance),
                table: Arc::clone(&table),
                errors: Arc::clone(&errors),
            }))
        };

        Ok(Self {
            name: A::NAME,
            operations,
            connector: Arc::new(connector),
        })
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn operations(&self) -> &[OperationKey] {
        &self.operations
    }

    pub fn paths(&self) -> BTreeSet<CapabilityPath> {
        self.operations.iter().map(|key| key.path.clone()).collect()
    }

    pub fn implements(&self, path: &CapabilityPath, operation: Operation) -> bool {
        self.operations
            .iter()
            .any(|key| key.operation == operation && &key.path == path)
    }

    pub fn connect(&self, credentials: Option<&Credentials>) -> Result<Arc<dyn BoundAdapter>> {
        (self.connector)(credentials)
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("name", &self.name)
            .field("operations", &self.operations)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error_table::ErrorKind;
    use crate::AsyncJobState;

    pub(crate) struct EchoAdapter {
        prefix: String,
    }

    impl EchoAdapter {
        fn echo(&self, args: CallArgs) -> ProviderResult<ProviderResponse> {
            let text = args
                .get_str("text")
                .ok_or_else(|| ProviderError::with_status(400, "missing text"))?;
            Ok(ProviderResponse::new(
                serde_json::json!({ "raw": text }),
                serde_json::json!({ "text": format!("{}{}", self.prefix, text) }),
            ))
        }

        fn echo_stream(self: Arc<Self>, args: CallArgs) -> ProviderResult<ProviderChunkStream> {
            let words: Vec<ProviderResult<Value>> = args
                .get_str("text")
                .unwrap_or_default()
                .split_whitespace()
                .map(|w| Ok(serde_json::json!({ "delta": w })))
                .collect();
            Ok(Box::pin(futures::stream::iter(words)))
        }

        fn launch(&self, _args: CallArgs) -> ProviderResult<AsyncLaunchJob> {
            Ok(AsyncLaunchJob::new("job-1"))
        }

        fn result(&self, job_id: &str) -> ProviderResult<AsyncJobResponse> {
            if job_id == "job-1" {
                Ok(AsyncJobResponse::pending(job_id, Value::Null))
            } else {
                Err(ProviderError::with_status(404, "no such job"))
            }
        }
    }

    impl ProviderAdapter for EchoAdapter {
        const NAME: &'static str = "echo";

        fn connect(credentials: Option<&Credentials>) -> Result<Self> {
            Ok(Self {
                prefix: credentials
                    .and_then(|c| c.get("prefix"))
                    .unwrap_or("")
                    .to_string(),
            })
        }

        fn register(table: &mut HandlerTable<Self>) {
            table
                .call(CapabilityPath::new("text", "echo"), Self::echo)
                .stream(CapabilityPath::new("text", "echo"), Self::echo_stream)
                .launch_job(CapabilityPath::new("text", "echo_async"), Self::launch)
                .get_job_result(CapabilityPath::new("text", "echo_async"), Self::result);
        }

        fn error_table() -> ErrorTable {
            ErrorTable::new()
                .on_status(400, ErrorKind::Validation)
                .on_status_for(Operation::GetJobResult, 404, ErrorKind::DeprecatedJobId)
        }
    }

    #[test]
    fn test_entry_lists_registered_operations() {
        let entry = ProviderEntry::of::<EchoAdapter>().unwrap();
        assert_eq!(entry.name(), "echo");
        assert_eq!(entry.operations().len(), 4);
        assert_eq!(entry.paths().len(), 2);
        assert!(entry.implements(&CapabilityPath::new("text", "echo"), Operation::Stream));
        assert!(!entry.implements(&CapabilityPath::new("text", "echo"), Operation::LaunchJob));
    }

    #[test]
    fn test_connect_uses_credential_overrides() {
        let entry = ProviderEntry::of::<EchoAdapter>().unwrap();
        let adapter = entry
            .connect(Some(&Credentials::new().with("prefix", ">> ")))
            .unwrap();

        let response = adapter
            .call(
                &CapabilityPath::new("text", "echo"),
                CallArgs::new().with("text", "hi"),
            )
            .unwrap();
        assert_eq!(response.standardized_response["text"], ">> hi");
    }

    #[test]
    fn test_provider_errors_are_classified() {
        let adapter = ProviderEntry::of::<EchoAdapter>()
            .unwrap()
            .connect(None)
            .unwrap();
        let path = CapabilityPath::new("text", "echo");

        let err = adapter.call(&path, CallArgs::new()).unwrap_err();
        assert!(err.is_validation());

        let async_path = CapabilityPath::new("text", "echo_async");
        let err = adapter.get_job_result(&async_path, "nope").unwrap_err();
        assert!(matches!(err, CoreError::DeprecatedJobId(_)));

        let pending = adapter.get_job_result(&async_path, "job-1").unwrap();
        assert_eq!(pending.state, AsyncJobState::Pending);
    }

    #[test]
    fn test_unregistered_operation_is_configuration_error() {
        let adapter = ProviderEntry::of::<EchoAdapter>()
            .unwrap()
            .connect(None)
            .unwrap();
        let err = adapter
            .launch_job(&CapabilityPath::new("text", "echo"), CallArgs::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_stream_yields_chunks_in_order() {
        let adapter = ProviderEntry::of::<EchoAdapter>()
            .unwrap()
            .connect(None)
            .unwrap();
        let stream = adapter
            .stream(
                &CapabilityPath::new("text", "echo"),
                CallArgs::new().with("text", "one two three"),
            )
            .unwrap();

        let chunks: Vec<Value> = futures::executor::block_on(stream.collect::<Vec<_>>())
            .into_iter()
            .map(|c| c.unwrap())
            .collect();
        let deltas: Vec<&str> = chunks.iter().filter_map(|c| c["delta"].as_str()).collect();
        assert_eq!(deltas, vec!["one", "two", "three"]);
    }

    struct HalfAsync;

    impl HalfAsync {
        fn launch(&self, _args: CallArgs) -> ProviderResult<AsyncLaunchJob> {
            Ok(AsyncLaunchJob::new("x"))
        }
    }

    impl ProviderAdapter for HalfAsync {
        const NAME: &'static str = "half";

        fn connect(_credentials: Option<&Credentials>) -> Result<Self> {
            Ok(Self)
        }

        fn register(table: &mut HandlerTable<Self>) {
            table.launch_job(CapabilityPath::new("audio", "stt_async"), Self::launch);
        }
    }

    #[test]
    fn test_async_capability_without_result_handler_is_rejected() {
        let err = ProviderEntry::of::<HalfAsync>().unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_empty_table_is_rejected() {
        let table = HandlerTable::<HalfAsync>::new();
        assert!(table.validate("half").is_err());
    }

    #[test]
    fn test_job_handler_on_sync_path_is_rejected() {
        let mut table = HandlerTable::<HalfAsync>::new();
        table.launch_job(CapabilityPath::new("audio", "stt"), HalfAsync::launch);
        assert!(table.validate("half").is_err());
    }
}
