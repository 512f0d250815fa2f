use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::files::{FileKind, PreparedFiles};
use crate::resolver::{MAX_LABEL_CHARS, Recipients};
use crate::status::DispatchReport;
use crate::transport::{
    DEFAULT_API_BASE, HttpReply, Transport, TransportFailure, TransportResult, method_url,
};
use crate::utils::format_timestamp;

pub const MAX_MESSAGE_CHARS: usize = 4096;
pub const DEFAULT_LOG_SIZE: usize = 10;
pub const DEFAULT_WORKERS: usize = 8;

/// Final state of one delivery attempt. There is no retry, so every
/// attempt ends in exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    TransportError(String),
    TimeoutError,
    HttpError { code: u16, reason: String },
    ApiRejected { description: String },
}

impl DeliveryStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered)
    }

    fn from_transport(result: TransportResult) -> Self {
        match result {
            Err(TransportFailure::Connection(reason)) => DeliveryStatus::TransportError(reason),
            Ok(reply) if !reply.is_success() => DeliveryStatus::HttpError {
                code: reply.status,
                reason: http_reason(&reply),
            },
            Err(TransportFailure::Timeout) => DeliveryStatus::TimeoutError,
            Ok(reply) => match reply.envelope() {
                Some(envelope) if envelope.ok => DeliveryStatus::Delivered,
                Some(envelope) => DeliveryStatus::ApiRejected {
                    description: envelope
                        .description
                        .unwrap_or_else(|| "Unknown error".to_string()),
                },
                None => DeliveryStatus::ApiRejected {
                    description: "unreadable response from Telegram".to_string(),
                },
            },
        }
    }
}

fn http_reason(reply: &HttpReply) -> String {
    reply
        .envelope()
        .and_then(|envelope| envelope.description)
        .or_else(|| {
            reqwest::StatusCode::from_u16(reply.status)
                .ok()
                .and_then(|status| status.canonical_reason())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Unknown error".to_string())
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Delivered => f.write_str("Successfully delivered"),
            DeliveryStatus::TransportError(reason) => write!(f, "Transport Error: {}", reason),
            DeliveryStatus::TimeoutError => f.write_str("Timeout Error: The request timed out"),
            DeliveryStatus::HttpError { code, reason } => write!(f, "HTTP Error {}: {}", code, reason),
            DeliveryStatus::ApiRejected { description } => write!(f, "Not delivered: {}", description),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub timestamp: DateTime<Utc>,
    pub chat_id: i64,
    pub label: String,
    pub status: DeliveryStatus,
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] Recipient: {}; {}; Status: {}",
            format_timestamp(&self.timestamp),
            self.chat_id,
            self.label,
            self.status
        )
    }
}

/// Bounded record of recent outcomes, oldest evicted first. The only state
/// shared between delivery tasks.
#[derive(Debug)]
pub struct OutcomeLog {
    entries: Mutex<VecDeque<DeliveryOutcome>>,
    capacity: usize,
    print_status: bool,
}

impl OutcomeLog {
    pub fn new(capacity: usize, print_status: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
            print_status,
        }
    }

    pub fn record(&self, outcome: DeliveryOutcome) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        if self.print_status {
            println!("{}", outcome);
        }
        entries.push_back(outcome);
    }

    pub fn snapshot(&self) -> Vec<DeliveryOutcome> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub api_base: String,
    /// Outcome log capacity as a multiple of the recipient count.
    pub log_size: usize,
    pub workers: usize,
    /// Print each outcome as soon as it is recorded.
    pub print_status: bool,
    pub skip_invalid_files: bool,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            log_size: DEFAULT_LOG_SIZE,
            workers: DEFAULT_WORKERS,
            print_status: false,
            skip_invalid_files: false,
        }
    }
}

/// Sends one message or file group to every recipient concurrently.
///
/// Construction checks the API key with `getMe`, so a `Dispatcher` always
/// holds a key the provider accepted at that moment.
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    api_base: String,
    api_key: String,
    bot_name: String,
    recipients: Recipients,
    log: Arc<OutcomeLog>,
    limiter: Arc<Semaphore>,
    skip_invalid_files: bool,
}

impl<T: Transport> Dispatcher<T> {
    pub async fn new(
        transport: T,
        api_key: &str,
        bot_name: &str,
        recipients: Recipients,
        options: DispatcherOptions,
    ) -> Result<Self, DispatchError> {
        if recipients.is_empty() {
            return Err(DispatchError::InvalidConfiguration(
                "recipient list is empty".to_string(),
            ));
        }
        if let Some((chat_id, _)) = recipients
            .iter()
            .find(|(_, label)| label.chars().count() > MAX_LABEL_CHARS)
        {
            return Err(DispatchError::InvalidConfiguration(format!(
                "label for chat {} is longer than {} characters",
                chat_id, MAX_LABEL_CHARS
            )));
        }

        let check_url = method_url(&options.api_base, api_key, "getMe");
        let reply = transport.get(&check_url).await.map_err(|failure| {
            DispatchError::InvalidConfiguration(format!("API key check failed: {}", failure))
        })?;
        match reply.envelope() {
            Some(envelope) if reply.is_success() && envelope.ok => {}
            Some(envelope) => {
                return Err(DispatchError::InvalidConfiguration(format!(
                    "API key check failed: {}",
                    envelope
                        .description
                        .unwrap_or_else(|| format!("HTTP {}", reply.status))
                )));
            }
            None => {
                return Err(DispatchError::InvalidConfiguration(format!(
                    "API key check failed: HTTP {}",
                    reply.status
                )));
            }
        }
        info!(bot = bot_name, recipients = recipients.len(), "API key check passed");

        let capacity = recipients.len().saturating_mul(options.log_size.max(1));
        Ok(Self {
            transport: Arc::new(transport),
            api_base: options.api_base,
            api_key: api_key.to_string(),
            bot_name: bot_name.to_string(),
            recipients,
            log: Arc::new(OutcomeLog::new(capacity, options.print_status)),
            limiter: Arc::new(Semaphore::new(options.workers.clamp(1, Semaphore::MAX_PERMITS))),
            skip_invalid_files: options.skip_invalid_files,
        })
    }

    pub fn recipients(&self) -> &Recipients {
        &self.recipients
    }

    pub fn log(&self) -> &OutcomeLog {
        &self.log
    }

    fn url(&self, method: &str) -> String {
        method_url(&self.api_base, &self.api_key, method)
    }

    pub async fn send_message(&self, text: &str) -> Result<DispatchReport, DispatchError> {
        let length = text.chars().count();
        if length > MAX_MESSAGE_CHARS {
            return Err(DispatchError::MessageTooLong(length));
        }

        let url = Arc::new(self.url("sendMessage"));
        let text = Arc::new(text.to_string());
        debug!(chars = length, "sending message");

        let report = self
            .fan_out(move |transport, chat_id| {
                let url = Arc::clone(&url);
                let fields = vec![
                    ("chat_id".to_string(), chat_id.to_string()),
                    ("text".to_string(), text.as_str().to_string()),
                ];
                async move { transport.post_form(&url, fields).await }
            })
            .await;
        Ok(report)
    }

    /// Check and encode `files` with this dispatcher's invalid-file policy.
    pub fn prepare_files(&self, files: &[PathBuf], kind: FileKind) -> Result<PreparedFiles, DispatchError> {
        PreparedFiles::prepare(files, kind, self.skip_invalid_files)
    }

    pub async fn send_file(
        &self,
        files: &[PathBuf],
        kind: FileKind,
    ) -> Result<DispatchReport, DispatchError> {
        let prepared = self.prepare_files(files, kind)?;
        Ok(self.send_prepared(prepared).await)
    }

    /// Send files validated up front. Nothing here can fail before the
    /// requests go out.
    pub async fn send_prepared(&self, prepared: PreparedFiles) -> DispatchReport {
        let kind = prepared.kind();
        let count = prepared.count();
        let body = Arc::new(prepared.into_body());
        debug!(kind = %kind, files = count, method = body.api_method(), "sending files");

        let url = Arc::new(self.url(body.api_method()));
        self.fan_out(move |transport, chat_id| {
            let url = Arc::clone(&url);
            let content_type = body.content_type();
            let payload = body.for_chat(chat_id);
            async move { transport.post_multipart(&url, content_type, payload).await }
        })
        .await
    }

    /// One task per recipient, bounded by the worker semaphore. Returns once
    /// every task has finished.
    async fn fan_out<F, Fut>(&self, request: F) -> DispatchReport
    where
        F: Fn(Arc<T>, i64) -> Fut,
        Fut: Future<Output = TransportResult> + Send + 'static,
    {
        let mut tasks = JoinSet::new();

        for (chat_id, label) in &self.recipients {
            let chat_id = *chat_id;
            let label = label.clone();
            let call = request(Arc::clone(&self.transport), chat_id);
            let limiter = Arc::clone(&self.limiter);
            let log = Arc::clone(&self.log);

            tasks.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                let status = DeliveryStatus::from_transport(call.await);
                let outcome = DeliveryOutcome {
                    timestamp: Utc::now(),
                    chat_id,
                    label,
                    status,
                };
                log.record(outcome.clone());
                outcome
            });
        }

        let mut outcomes = Vec::with_capacity(self.recipients.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("delivery task did not complete: {}", e),
            }
        }

        DispatchReport::new(self.recipients.len(), outcomes)
    }
}

impl<T: Transport> std::fmt::Display for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Dispatcher configurations:")?;
        writeln!(f, "  Name of API-key: {}", self.bot_name)?;
        writeln!(f, "  Amount of recipients: {}", self.recipients.len())?;
        writeln!(f, "  Logs cache: {}/{}", self.log.len(), self.log.capacity())?;
        write!(f, "  Status printing: {}", self.log.print_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records every call and answers by chat id: `id % 5` picks delivered,
    /// rejected, HTTP 400, timeout or connection error.
    struct SpyTransport {
        gets: AtomicUsize,
        posts: Arc<Mutex<Vec<(String, i64)>>>,
        get_reply: TransportResult,
    }

    impl SpyTransport {
        fn accepting() -> Self {
            Self {
                gets: AtomicUsize::new(0),
                posts: Arc::new(Mutex::new(Vec::new())),
                get_reply: Ok(HttpReply::new(200, r#"{"ok":true,"result":{"id":1,"is_bot":true}}"#)),
            }
        }

        fn with_get_reply(get_reply: TransportResult) -> Self {
            Self {
                get_reply,
                ..Self::accepting()
            }
        }

        fn post_count(&self) -> usize {
            self.posts.lock().unwrap().len()
        }

        fn scripted(posts: Arc<Mutex<Vec<(String, i64)>>>, url: String, chat_id: i64) -> impl Future<Output = TransportResult> + Send {
            async move {
                tokio::time::sleep(Duration::from_millis((chat_id.unsigned_abs() % 3) * 5)).await;
                posts.lock().unwrap().push((url, chat_id));
                match chat_id.rem_euclid(5) {
                    0 => Ok(HttpReply::new(200, r#"{"ok":true,"result":{}}"#)),
                    1 => Ok(HttpReply::new(200, r#"{"ok":false,"description":"Forbidden: bot was blocked by the user"}"#)),
                    2 => Ok(HttpReply::new(400, r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#)),
                    3 => Err(TransportFailure::Timeout),
                    _ => Err(TransportFailure::Connection("connection refused".to_string())),
                }
            }
        }
    }

    fn chat_id_from_multipart(body: &[u8]) -> i64 {
        let text = String::from_utf8_lossy(body);
        let marker = "name=\"chat_id\"\r\n\r\n";
        let start = text.find(marker).unwrap() + marker.len();
        let end = start + text[start..].find("\r\n").unwrap();
        text[start..end].parse().unwrap()
    }

    impl Transport for SpyTransport {
        fn get(&self, _url: &str) -> impl Future<Output = TransportResult> + Send {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let reply = self.get_reply.clone();
            async move { reply }
        }

        fn post_form(&self, url: &str, fields: Vec<(String, String)>) -> impl Future<Output = TransportResult> + Send {
            let chat_id = fields
                .iter()
                .find(|(name, _)| name == "chat_id")
                .map(|(_, value)| value.parse().unwrap())
                .unwrap();
            Self::scripted(Arc::clone(&self.posts), url.to_string(), chat_id)
        }

        fn post_multipart(&self, url: &str, content_type: String, body: Vec<u8>) -> impl Future<Output = TransportResult> + Send {
            assert!(content_type.starts_with("multipart/form-data; boundary="));
            Self::scripted(Arc::clone(&self.posts), url.to_string(), chat_id_from_multipart(&body))
        }
    }

    fn recipients(ids: impl IntoIterator<Item = i64>) -> Recipients {
        ids.into_iter().map(|id| (id, format!("chat {}", id))).collect()
    }

    async fn dispatcher(ids: impl IntoIterator<Item = i64>) -> Dispatcher<SpyTransport> {
        Dispatcher::new(
            SpyTransport::accepting(),
            "123:KEY",
            "alpha",
            recipients(ids),
            DispatcherOptions::default(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_classification_order() {
        let status = DeliveryStatus::from_transport(Err(TransportFailure::Connection("refused".into())));
        assert_eq!(status, DeliveryStatus::TransportError("refused".into()));

        let status = DeliveryStatus::from_transport(Ok(HttpReply::new(
            403,
            r#"{"ok":false,"description":"Forbidden: bot was kicked"}"#,
        )));
        assert_eq!(
            status,
            DeliveryStatus::HttpError { code: 403, reason: "Forbidden: bot was kicked".into() }
        );

        let status = DeliveryStatus::from_transport(Ok(HttpReply::new(502, "<html>")));
        assert_eq!(status, DeliveryStatus::HttpError { code: 502, reason: "Bad Gateway".into() });

        assert_eq!(
            DeliveryStatus::from_transport(Err(TransportFailure::Timeout)),
            DeliveryStatus::TimeoutError
        );

        let status = DeliveryStatus::from_transport(Ok(HttpReply::new(200, r#"{"ok":false}"#)));
        assert_eq!(status, DeliveryStatus::ApiRejected { description: "Unknown error".into() });

        let status = DeliveryStatus::from_transport(Ok(HttpReply::new(200, r#"{"ok":true,"result":{}}"#)));
        assert!(status.is_delivered());
    }

    #[test]
    fn test_outcome_log_evicts_oldest() {
        let log = OutcomeLog::new(2, false);
        for chat_id in 1..=3 {
            log.record(DeliveryOutcome {
                timestamp: Utc::now(),
                chat_id,
                label: "x".into(),
                status: DeliveryStatus::Delivered,
            });
        }
        let ids: Vec<i64> = log.snapshot().iter().map(|o| o.chat_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(log.capacity(), 2);
    }

    #[tokio::test]
    async fn test_new_rejects_long_labels() {
        let mut recipients = recipients([1]);
        recipients.insert(2, "x".repeat(65));
        let result = Dispatcher::new(SpyTransport::accepting(), "K", "alpha", recipients, DispatcherOptions::default()).await;
        assert!(matches!(result, Err(DispatchError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_refused_key() {
        let transport = SpyTransport::with_get_reply(Ok(HttpReply::new(
            401,
            r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#,
        )));
        let result = Dispatcher::new(transport, "K", "alpha", recipients([1]), DispatcherOptions::default()).await;
        match result {
            Err(DispatchError::InvalidConfiguration(msg)) => assert!(msg.contains("Unauthorized")),
            _ => panic!("expected InvalidConfiguration"),
        }

        let transport = SpyTransport::with_get_reply(Err(TransportFailure::Timeout));
        let result = Dispatcher::new(transport, "K", "alpha", recipients([1]), DispatcherOptions::default()).await;
        assert!(matches!(result, Err(DispatchError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_one_outcome_per_recipient() {
        let ids: Vec<i64> = (0..60).map(|i| i * 7 - 100).collect();
        let dispatcher = dispatcher(ids.clone()).await;
        let report = dispatcher.send_message("hello").await.unwrap();

        assert_eq!(report.expected, ids.len());
        assert_eq!(report.outcomes.len(), ids.len());
        let distinct: BTreeSet<i64> = report.outcomes.iter().map(|o| o.chat_id).collect();
        assert_eq!(distinct, ids.iter().copied().collect());
        assert_eq!(dispatcher.transport.post_count(), ids.len());
        assert_eq!(dispatcher.log().len(), ids.len());

        for outcome in &report.outcomes {
            let expected_delivered = outcome.chat_id.rem_euclid(5) == 0;
            assert_eq!(outcome.status.is_delivered(), expected_delivered);
        }
    }

    #[tokio::test]
    async fn test_message_length_boundary() {
        let dispatcher = dispatcher([5, 10]).await;

        let report = dispatcher.send_message(&"a".repeat(MAX_MESSAGE_CHARS)).await.unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(dispatcher.transport.post_count(), 2);

        let err = dispatcher.send_message(&"a".repeat(MAX_MESSAGE_CHARS + 1)).await.unwrap_err();
        assert!(matches!(err, DispatchError::MessageTooLong(4097)));
        assert_eq!(dispatcher.transport.post_count(), 2);
    }

    #[tokio::test]
    async fn test_message_uses_send_message_endpoint() {
        let dispatcher = dispatcher([5]).await;
        dispatcher.send_message("hi").await.unwrap();
        let posts = dispatcher.transport.posts.lock().unwrap().clone();
        assert_eq!(posts, vec![("https://api.telegram.org/bot123:KEY/sendMessage".to_string(), 5)]);
        assert_eq!(dispatcher.transport.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_log_capacity_scales_with_recipients() {
        let transport = SpyTransport::accepting();
        let options = DispatcherOptions {
            log_size: 1,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(transport, "K", "alpha", recipients([5, 10, 15]), options)
            .await
            .unwrap();
        dispatcher.send_message("one").await.unwrap();
        dispatcher.send_message("two").await.unwrap();
        assert_eq!(dispatcher.log().capacity(), 3);
        assert_eq!(dispatcher.log().len(), 3);
    }

    #[test]
    fn test_outcome_log_huge_capacity_grows_lazily() {
        let log = OutcomeLog::new(usize::MAX / 2, false);
        assert!(log.is_empty());
        log.record(DeliveryOutcome {
            timestamp: Utc::now(),
            chat_id: 1,
            label: "x".into(),
            status: DeliveryStatus::Delivered,
        });
        assert_eq!(log.len(), 1);
        assert_eq!(log.capacity(), usize::MAX / 2);
    }

    #[tokio::test]
    async fn test_extreme_log_size_and_workers() {
        let options = DispatcherOptions {
            log_size: usize::MAX,
            workers: usize::MAX,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(SpyTransport::accepting(), "K", "alpha", recipients([5, 10]), options)
            .await
            .unwrap();
        assert_eq!(dispatcher.log().capacity(), usize::MAX);
        assert_eq!(dispatcher.limiter.available_permits(), Semaphore::MAX_PERMITS);

        let report = dispatcher.send_message("hi").await.unwrap();
        assert_eq!(report.outcomes.len(), 2);
    }

    #[tokio::test]
    async fn test_file_count_exceeded_sends_nothing() {
        let dispatcher = dispatcher([5]).await;
        let files: Vec<PathBuf> = (0..11).map(|i| PathBuf::from(format!("{}.png", i))).collect();
        let err = dispatcher.send_file(&files, FileKind::Photo).await.unwrap_err();
        assert!(matches!(err, DispatchError::FileCountExceeded { .. }));
        assert_eq!(dispatcher.transport.post_count(), 0);
    }

    #[tokio::test]
    async fn test_send_file_to_every_recipient() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"some notes").unwrap();

        let dispatcher = dispatcher([5, 6, 7]).await;
        let report = dispatcher.send_file(&[path.clone()], FileKind::Document).await.unwrap();
        assert_eq!(report.outcomes.len(), 3);

        let mut posted: Vec<i64> = dispatcher.transport.posts.lock().unwrap().iter().map(|(_, id)| *id).collect();
        posted.sort();
        assert_eq!(posted, vec![5, 6, 7]);
        assert!(dispatcher.transport.posts.lock().unwrap()[0].0.ends_with("/sendDocument"));

        let err = dispatcher.send_file(&[path], FileKind::Photo).await.unwrap_err();
        assert!(matches!(err, DispatchError::FileValidationError(_)));
        assert_eq!(dispatcher.transport.post_count(), 3);
    }

    #[tokio::test]
    async fn test_display_summary() {
        let dispatcher = dispatcher([5, 6]).await;
        let summary = dispatcher.to_string();
        assert!(summary.contains("Name of API-key: alpha"));
        assert!(summary.contains("Amount of recipients: 2"));
        assert!(summary.contains("Logs cache: 0/20"));
        assert!(!summary.contains("123:KEY"));
    }
}
