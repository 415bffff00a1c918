//! Pacer server and one-shot commands.
//!
//! `serve` mounts the control API over a running scheduler; the other entry
//! points drive the same runtime from the command line.

use crate::config::PacerConfig;
use crate::routes;
use crate::runtime::{PacerRuntime, VariationSupport, build_runtime};
use anyhow::Result;
use axum::Extension;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use pacer_core::{
    CheckReport, ContactHistory, DraftStore, JobSummary, RecencyPolicy, SendJob, SendResult,
    SendScheduler, apply_policy, check, parse_recipients,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub struct PacerState {
    pub config: PacerConfig,
    pub scheduler: SendScheduler,
    pub history: Arc<ContactHistory>,
    pub drafts: DraftStore,
    pub variation: VariationSupport,
    pub jobs: JobTracker,
}

impl PacerState {
    pub fn new(config: PacerConfig, runtime: PacerRuntime) -> Self {
        Self {
            config,
            scheduler: runtime.scheduler,
            history: runtime.history,
            drafts: runtime.drafts,
            variation: runtime.variation,
            jobs: JobTracker::default(),
        }
    }
}

/// Most recent bulk job and individual send, for the status endpoint, plus
/// the tasks that wait on in-flight runs.
#[derive(Default)]
pub struct JobTracker {
    bulk: RwLock<Option<TrackedJob>>,
    individual: RwLock<Option<SendResult>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedJob {
    pub job_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub skipped: usize,
    pub summary: Option<JobSummary>,
}

impl JobTracker {
    pub async fn begin(&self, job_id: Uuid, skipped: usize) {
        *self.bulk.write().await = Some(TrackedJob {
            job_id,
            submitted_at: Utc::now(),
            skipped,
            summary: None,
        });
    }

    pub async fn complete(&self, job_id: Uuid, summary: JobSummary) {
        let mut bulk = self.bulk.write().await;
        match bulk.as_mut() {
            Some(tracked) if tracked.job_id == job_id => tracked.summary = Some(summary),
            _ => tracing::warn!(%job_id, "completed job is no longer tracked"),
        }
    }

    pub async fn last_bulk(&self) -> Option<TrackedJob> {
        self.bulk.read().await.clone()
    }

    pub async fn record_individual(&self, result: SendResult) {
        *self.individual.write().await = Some(result);
    }

    pub async fn last_individual(&self) -> Option<SendResult> {
        self.individual.read().await.clone()
    }

    pub async fn watch(&self, watcher: JoinHandle<()>) {
        let mut watchers = self.watchers.lock().await;
        watchers.retain(|w| !w.is_finished());
        watchers.push(watcher);
    }

    /// Waits for every watched run to finish recording its outcome.
    pub async fn drain(&self) {
        let watchers = std::mem::take(&mut *self.watchers.lock().await);
        for watcher in watchers {
            if let Err(error) = watcher.await {
                tracing::warn!(%error, "job watcher ended abnormally");
            }
        }
    }
}

pub fn app_router(state: Arc<PacerState>) -> axum::Router {
    routes::router().layer(Extension(state))
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = PacerConfig::load_with_path(config_path).await?;
    tracing::info!(
        config_path = %path.display(),
        actuator_kind = ?cfg.actuator.kind,
        typing_mode = ?cfg.pacing.typing_mode,
        recency_policy = ?cfg.pacing.recency_policy,
        variation_enabled = cfg.variation.enabled,
        variation_model = %cfg.variation.model,
        "config ok"
    );
    let actuator = crate::runtime::build_actuator(&cfg)?;
    match actuator.ping().await {
        Ok(()) => println!("actuator {}: reachable", actuator.actuator_id()),
        Err(e) => println!("actuator {}: unreachable ({e:#})", actuator.actuator_id()),
    }
    println!("config: {}", path.display());
    println!("data: {}", cfg.db_path()?.display());
    Ok(())
}

pub async fn check_file(config_path: Option<PathBuf>, file: &Path) -> Result<()> {
    let cfg = PacerConfig::load(config_path).await?;
    let runtime = build_runtime(&cfg).await?;
    let input = read_input(file).await?;
    let parsed = parse_recipients(&input);
    let report = check(&runtime.history, parsed.recipients, Utc::now()).await;
    print_check_report(&report, &parsed.rejected);
    Ok(())
}

fn print_check_report(report: &CheckReport, rejected: &[String]) {
    println!(
        "{} of {} recipient(s) ready",
        report.ready.len(),
        report.total
    );
    for recent in &report.recently_contacted {
        println!(
            "recent: {} ({:.1} days ago, {} send(s))",
            recent.recipient.number, recent.days_since, recent.last_contact.send_count
        );
    }
    for line in rejected {
        println!("invalid: {line}");
    }
    if !report.all_ready() {
        println!("--- remaining ---");
        println!("{}", report.remaining_text());
    }
}

pub async fn bulk_file(
    config_path: Option<PathBuf>,
    file: &Path,
    message: &str,
    vary: bool,
    enforce_recency: bool,
) -> Result<()> {
    let cfg = PacerConfig::load(config_path).await?;
    let runtime = build_runtime(&cfg).await?;
    let input = read_input(file).await?;
    let parsed = parse_recipients(&input);
    for line in &parsed.rejected {
        tracing::warn!(line = %line, "skipping invalid recipient line");
    }
    let policy = if enforce_recency {
        RecencyPolicy::Enforce
    } else {
        cfg.pacing.recency_policy
    };
    let split = apply_policy(policy, &runtime.history, parsed.recipients, Utc::now()).await;
    for skipped in &split.skipped {
        println!("skipped (recently contacted): {}", skipped.number);
    }

    let vary = runtime.variation.resolve(vary.then_some(true))?;
    let job = SendJob::new(split.eligible, message).with_options(cfg.send_options(vary));
    let scheduler = runtime.scheduler.clone();
    let run = scheduler.run_bulk(job);
    tokio::pin!(run);
    let summary = tokio::select! {
        summary = &mut run => summary?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("received ctrl-c; stopping bulk send");
            runtime.scheduler.stop_bulk();
            run.await?
        }
    };
    println!(
        "{:?}: sent {} / failed {} / total {}",
        summary.state, summary.sent, summary.failed, summary.total
    );
    Ok(())
}

pub async fn send_one_shot(
    config_path: Option<PathBuf>,
    number: &str,
    message: &str,
    vary: bool,
) -> Result<()> {
    let cfg = PacerConfig::load(config_path).await?;
    let runtime = build_runtime(&cfg).await?;
    let options = cfg.send_options(runtime.variation.resolve(vary.then_some(true))?);
    let scheduler = runtime.scheduler.clone();
    let send = scheduler.send_individual(number, message, options);
    tokio::pin!(send);
    let result = tokio::select! {
        result = &mut send => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("received ctrl-c; stopping send");
            runtime.scheduler.stop_individual();
            send.await?
        }
    };
    println!("{}: {:?}", result.number, result.outcome);
    Ok(())
}

pub async fn print_history(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = PacerConfig::load(config_path).await?;
    let runtime = build_runtime(&cfg).await?;
    let entries = runtime.history.get_all().await;
    if entries.is_empty() {
        println!("no contacts within the last {} day(s)", cfg.pacing.retention_days);
        return Ok(());
    }
    for (number, entry) in entries {
        let last_sent = DateTime::<Utc>::from_timestamp_millis(entry.last_sent_epoch_millis)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| entry.last_sent_epoch_millis.to_string());
        println!(
            "{number}\t{last_sent}\tx{}\t{}",
            entry.send_count, entry.message_snippet
        );
    }
    Ok(())
}

async fn read_input(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .map_err(|e| anyhow::anyhow!("read recipients {}: {e}", file.display()))
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = PacerConfig::load_with_path(config_path).await?;
    let addr = cfg.bind_addr()?;
    tracing::info!(
        config_path = %cfg_path.display(),
        bind_addr = %addr,
        data_dir = %cfg.general.data_dir,
        actuator_kind = ?cfg.actuator.kind,
        typing_mode = ?cfg.pacing.typing_mode,
        recency_policy = ?cfg.pacing.recency_policy,
        base_delay_ms = cfg.pacing.base_delay_ms,
        min_gap_ms = cfg.pacing.min_gap_ms,
        max_gap_ms = cfg.pacing.max_gap_ms,
        retention_days = cfg.pacing.retention_days,
        variation_enabled = cfg.variation.enabled,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    let runtime = build_runtime(&cfg).await?;
    let state = Arc::new(PacerState::new(cfg.clone(), runtime));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = app_router(state.clone())
        .layer(GlobalConcurrencyLimitLayer::new(
            cfg.server.http_max_in_flight,
        ))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "pacer serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("http server shutdown completed");

    if state.scheduler.stop_bulk() {
        tracing::info!("cancelled running bulk job during shutdown");
    }
    if state.scheduler.stop_individual() {
        tracing::info!("cancelled running individual send during shutdown");
    }
    state.jobs.drain().await;
    tracing::info!("in-flight sends settled");
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use pacer_channels::{ActuatorMessage, PageActuator, SendReceipt, TimingHint};
    use pacer_core::{MemoryKvStore, TypingMode};
    use std::sync::Mutex;

    /// Actuator that records numbers and succeeds after an optional delay.
    #[derive(Default)]
    pub(crate) struct RecordingActuator {
        pub(crate) numbers: Mutex<Vec<String>>,
        pub(crate) delay: Option<Duration>,
    }

    impl RecordingActuator {
        pub(crate) fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl PageActuator for RecordingActuator {
        fn actuator_id(&self) -> &str {
            "recording"
        }

        async fn send(
            &self,
            number: &str,
            _message: ActuatorMessage,
            _hint: &TimingHint,
        ) -> anyhow::Result<SendReceipt> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.numbers
                .lock()
                .expect("numbers lock")
                .push(number.to_string());
            Ok(SendReceipt::now("recording", serde_json::Value::Null))
        }
    }

    /// State with in-memory storage, estimated typing and no inter-message gap.
    pub(crate) fn test_state(actuator: Arc<RecordingActuator>) -> Arc<PacerState> {
        let mut cfg = PacerConfig::default();
        cfg.pacing.typing_mode = TypingMode::Estimated;
        cfg.pacing.min_gap_ms = 0;
        cfg.pacing.max_gap_ms = 0;
        let runtime = PacerRuntime::assemble(
            &cfg,
            Arc::new(MemoryKvStore::new()),
            actuator,
            None,
        );
        Arc::new(PacerState::new(cfg, runtime))
    }

    #[tokio::test]
    async fn tracker_ignores_stale_completions() {
        let tracker = JobTracker::default();
        let current = Uuid::new_v4();
        tracker.begin(current, 2).await;
        let summary = JobSummary {
            state: pacer_core::JobState::Completed,
            total: 1,
            attempted: 1,
            sent: 1,
            failed: 0,
            results: Vec::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            error: None,
        };
        tracker.complete(Uuid::new_v4(), summary.clone()).await;
        assert!(tracker.last_bulk().await.expect("tracked").summary.is_none());

        tracker.complete(current, summary).await;
        let tracked = tracker.last_bulk().await.expect("tracked");
        assert_eq!(tracked.skipped, 2);
        assert_eq!(tracked.summary.expect("summary").sent, 1);
    }

    #[test]
    fn request_id_falls_back_to_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id_from_headers(&headers), "missing");
        headers.insert("x-request-id", "abc".parse().expect("header value"));
        assert_eq!(request_id_from_headers(&headers), "abc");
    }

    #[tokio::test]
    async fn drain_waits_for_cancelled_bulk_to_record() {
        let actuator = Arc::new(RecordingActuator::slow(Duration::from_millis(100)));
        let state = test_state(actuator.clone());
        let handle = state
            .scheduler
            .start_bulk(SendJob::new(
                parse_recipients("79990000001\n79990000002\n79990000003").recipients,
                "hi",
            ))
            .expect("job accepted");
        let job_id = Uuid::new_v4();
        state.jobs.begin(job_id, 0).await;
        let watcher_state = state.clone();
        state
            .jobs
            .watch(tokio::spawn(async move {
                let summary = handle.wait().await;
                watcher_state.jobs.complete(job_id, summary).await;
            }))
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(state.scheduler.stop_bulk());
        state.jobs.drain().await;

        let summary = state
            .jobs
            .last_bulk()
            .await
            .and_then(|job| job.summary)
            .expect("summary recorded before drain returns");
        assert_eq!(summary.state, pacer_core::JobState::Cancelled);
        let dispatched = actuator.numbers.lock().expect("numbers lock").len();
        assert_eq!(summary.sent, dispatched);
        assert_eq!(state.history.get_all().await.len(), dispatched);
    }
}
