//! The interception pipeline
//!
//! Two hooks per flow (request, response) plus a response-headers timestamp
//! for TTFT. Both hooks run behind a fail-open guard: an unexpected error is
//! logged at ERROR and the flow continues unmodified. Plan reloads swap the
//! whole strategy list and classifier atomically, so a flow sees either the
//! old plan or the new one, never a mix.

use crate::logwriter::StructuredLogWriter;
use crate::mode::ProxyMode;
use agentchaos_chaos::{StrategyFactory, StrategyHandle, TrafficClassifier};
use agentchaos_config::{ChaosPlan, PlanStore, Settings};
use agentchaos_core::{ChaosError, Flow, FlowResponse, TrafficType};
use agentchaos_dashboard::{DashboardEvent, EventBroadcaster};
use agentchaos_observability::{
    record_ai_request, record_chaos_injection, record_error_code, record_token_usage, record_ttft,
};
use agentchaos_security::{AuditAction, AuditLog, AuthConfig, ChaosAuth, PiiRedactor, Scope};
use agentchaos_tape::{ChaosContext, TapeCipher, TapePlayer, TapeRecorder};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// URL fragments identifying LLM endpoints for TTFT/token accounting.
const LLM_URL_MARKERS: &[&str] = &[
    "/api/chat",
    "/v1/chat/completions",
    "/api/generate",
    "/api/completions",
];

/// TTFT start-time cache bounds: 10k concurrent flows, 5 minute TTL.
const TTFT_CACHE_SIZE: u64 = 10_000;
const TTFT_CACHE_TTL: Duration = Duration::from_secs(300);

fn is_llm_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    LLM_URL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Static configuration for one proxy process.
#[derive(Debug, Default)]
pub struct ProxyConfig {
    pub mode: ProxyMode,
    pub plan_path: Option<PathBuf>,
    pub tape_path: Option<PathBuf>,
    pub settings: Settings,
    pub auth: AuthConfig,
}

/// Plan-derived state swapped wholesale on reload.
struct Engine {
    strategies: Vec<StrategyHandle>,
    classifier: TrafficClassifier,
}

/// One JSON line of the structured proxy log.
#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    method: String,
    url: String,
    status_code: Option<u16>,
    chaos_applied: Option<String>,
    tool_name: Option<&'static str>,
    fuzzed: bool,
    agent_role: Option<String>,
    traffic_type: String,
    traffic_subtype: Option<String>,
}

/// The chaos interception pipeline.
pub struct ChaosPipeline {
    mode: ProxyMode,
    settings: Settings,
    plan_path: Option<PathBuf>,
    plan_store: PlanStore,
    factory: StrategyFactory,
    engine: ArcSwap<Engine>,
    auth: ChaosAuth,
    redactor: PiiRedactor,
    audit: AuditLog,
    cipher: Option<TapeCipher>,
    recorder: Option<Arc<Mutex<TapeRecorder>>>,
    player: Option<TapePlayer>,
    events: EventBroadcaster,
    log_writer: StructuredLogWriter,
    ttft_starts: moka::sync::Cache<String, Instant>,
    spans: Mutex<HashMap<String, Span>>,
    request_counter: AtomicU64,
    last_user: Mutex<Option<String>>,
    strategy_states: Mutex<HashMap<String, bool>>,
}

impl ChaosPipeline {
    /// Build a pipeline for one proxy process.
    ///
    /// RECORD requires a tape path and an encryption key; PLAYBACK requires
    /// an existing, decryptable tape. A plan that fails to load leaves the
    /// pipeline running with no strategies.
    pub async fn new(config: ProxyConfig) -> Result<Self, ChaosError> {
        let settings = config.settings;
        let redactor = PiiRedactor::new(settings.pii_redaction_enabled);
        let auth = ChaosAuth::new(config.auth);
        let audit = AuditLog::open(&settings.audit_log);
        let factory = StrategyFactory::with_builtins();
        let events = EventBroadcaster::new();

        let plan_store = PlanStore::new();
        let mut initial_plan = None;
        if let Some(path) = &config.plan_path {
            match plan_store.load_and_set(path) {
                Ok(plan) => initial_plan = Some(plan),
                Err(e) => {
                    error!(
                        "[{}] Failed to load chaos plan {}: {e}",
                        agentchaos_core::ErrorCode::ConfigInvalid,
                        path.display()
                    );
                    record_error_code(agentchaos_core::ErrorCode::ConfigInvalid, None);
                }
            }
        }

        let replay_config = initial_plan
            .as_ref()
            .map(|plan| plan.replay_config.clone())
            .unwrap_or_default();

        // Tape wiring depends on the mode; the key requirement is hard.
        let mut cipher = None;
        let mut recorder = None;
        let mut player = None;
        match config.mode {
            ProxyMode::Record => {
                let tape_path = config.tape_path.clone().ok_or_else(|| {
                    ChaosError::ConfigInvalid("tape_path is required for RECORD mode".into())
                })?;
                let tape_cipher = TapeCipher::from_key(settings.tape_key.as_deref())
                    .inspect_err(|_| {
                        record_error_code(agentchaos_core::ErrorCode::TapeKeyRequired, None);
                    })?;
                recorder = Some(Arc::new(Mutex::new(TapeRecorder::new(
                    &tape_path,
                    redactor.clone(),
                    replay_config.clone(),
                    settings.replay_strict,
                ))));
                cipher = Some(tape_cipher);
                info!("RECORD mode enabled: {}", tape_path.display());
            }
            ProxyMode::Playback => {
                let tape_path = config.tape_path.clone().ok_or_else(|| {
                    ChaosError::ConfigInvalid("tape_path is required for PLAYBACK mode".into())
                })?;
                let tape_cipher = TapeCipher::from_key(settings.tape_key.as_deref())
                    .inspect_err(|_| {
                        record_error_code(agentchaos_core::ErrorCode::TapeKeyRequired, None);
                    })?;
                player = Some(TapePlayer::load(
                    &tape_path,
                    &tape_cipher,
                    redactor.clone(),
                    replay_config,
                    settings.replay_strict,
                )?);
                cipher = Some(tape_cipher);
                info!("PLAYBACK mode enabled: {} (no network access)", tape_path.display());
            }
            ProxyMode::Live => {}
        }

        let engine = Self::build_engine(&factory, initial_plan.as_deref(), &settings);

        let log_writer = StructuredLogWriter::open(settings.log_file_path()).await?;

        let pipeline = Self {
            mode: config.mode,
            settings,
            plan_path: config.plan_path,
            plan_store,
            factory,
            engine: ArcSwap::from_pointee(engine),
            auth,
            redactor,
            audit,
            cipher,
            recorder,
            player,
            events,
            log_writer,
            ttft_starts: moka::sync::Cache::builder()
                .max_capacity(TTFT_CACHE_SIZE)
                .time_to_live(TTFT_CACHE_TTL)
                .build(),
            spans: Mutex::new(HashMap::new()),
            request_counter: AtomicU64::new(0),
            last_user: Mutex::new(None),
            strategy_states: Mutex::new(HashMap::new()),
        };

        if let Some(plan) = initial_plan {
            pipeline.audit_plan_change(&plan, true);
        }
        info!(
            "ChaosPipeline initialized (mode={}) with {} strategies",
            pipeline.mode,
            pipeline.engine.load().strategies.len()
        );
        Ok(pipeline)
    }

    pub fn mode(&self) -> ProxyMode {
        self.mode
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn log_writer(&self) -> &StructuredLogWriter {
        &self.log_writer
    }

    /// Number of strategies in the active plan.
    pub fn strategy_count(&self) -> usize {
        self.engine.load().strategies.len()
    }

    fn build_engine(factory: &StrategyFactory, plan: Option<&ChaosPlan>, settings: &Settings) -> Engine {
        let strategies = plan
            .map(|plan| factory.build_all(&plan.to_legacy()))
            .unwrap_or_default();
        let classifier = TrafficClassifier::new(plan, settings.classifier_strict);
        Engine {
            strategies,
            classifier,
        }
    }

    /// Audit plan (re)load and strategy enable/disable transitions.
    fn audit_plan_change(&self, plan: &ChaosPlan, initial: bool) {
        let user = self.last_user.lock().clone().unwrap_or_else(|| "system".to_owned());
        let resource = self
            .plan_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "plan".to_owned());
        let outcome = if initial { "initial_load" } else { "reloaded" };
        self.audit.log(&user, AuditAction::ConfigChange, &resource, outcome, None);

        let mut states = self.strategy_states.lock();
        for scenario in &plan.scenarios {
            if let Some(&previous) = states.get(&scenario.name) {
                if previous != scenario.enabled {
                    let state = if scenario.enabled { "enabled" } else { "disabled" };
                    self.audit.log(
                        &user,
                        AuditAction::StateChange,
                        &format!("strategy:{}", scenario.name),
                        state,
                        None,
                    );
                }
            }
        }
        *states = plan.scenarios.iter().map(|s| (s.name.clone(), s.enabled)).collect();
    }

    /// Hot reload: rebuild strategies and classifier when the plan file hash
    /// changed, then swap atomically.
    fn reload_plan(&self) {
        let Some(path) = &self.plan_path else {
            return;
        };
        if let Some(plan) = self.plan_store.reload_if_changed(path) {
            let engine = Self::build_engine(&self.factory, Some(&plan), &self.settings);
            self.engine.store(Arc::new(engine));
            self.audit_plan_change(&plan, false);
            info!(
                "Configuration reloaded: {} strategies",
                self.engine.load().strategies.len()
            );
        }
    }

    /// Request hook: playback short-circuit, auth, hot reload, classify,
    /// span, request-phase strategies. Fail-open on any unexpected error.
    pub async fn request(&self, flow: &mut Flow) {
        if let Err(e) = self.request_impl(flow).await {
            error!("CRITICAL: Unexpected error in request hook (fail-open - flow continues): {e}");
        }
    }

    async fn request_impl(&self, flow: &mut Flow) -> Result<(), ChaosError> {
        if self.mode == ProxyMode::Playback {
            self.handle_playback(flow);
            return Ok(());
        }

        let sequence = self.request_counter.fetch_add(1, Ordering::Relaxed);
        flow.metadata.request_id = format!("req_{sequence}_{}", Uuid::new_v4().simple());

        // Authentication gates everything else.
        let auth_context = self.auth.authenticate(flow, Scope::Read);
        if let Some(code) = auth_context.error_code {
            record_error_code(code, None);
        }
        let redacted_url = self.redactor.redact_url(&flow.request.url);
        if !auth_context.allowed {
            warn!("Unauthorized chaos control plane access attempt: URL={redacted_url}");
            self.audit
                .log(&auth_context.user_id, AuditAction::Auth, &redacted_url, "denied", None);
            flow.response = Some(ChaosAuth::unauthorized_response(Scope::Read));
            flow.metadata.aborted = true;
            return Ok(());
        }
        if self.auth.enabled() {
            self.audit
                .log(&auth_context.user_id, AuditAction::Auth, &redacted_url, "allowed", None);
            *self.last_user.lock() = Some(auth_context.user_id.clone());
        }

        self.reload_plan();
        let engine = self.engine.load_full();

        let override_allowed = self.auth.enabled() && auth_context.allowed;
        let traffic_type = engine.classifier.classify(flow, override_allowed);

        if let Some(role) = flow.agent_role() {
            debug!("Extracted agent role: {role} from request to {redacted_url}");
            flow.metadata.agent_role = Some(role);
        }

        self.events.broadcast(DashboardEvent::request_started(
            &flow.metadata.request_id,
            flow.request.method.as_str(),
            &redacted_url,
            flow.metadata.agent_role.clone(),
            traffic_type.as_str(),
            flow.metadata.traffic_subtype.clone(),
        ));

        // The intercept span links to the caller's trace when a traceparent
        // header is present, and stays open until the response hook ends.
        let span = info_span!(
            "chaos.proxy.intercept",
            http.method = %flow.request.method,
            http.url = %redacted_url,
            http.host = %flow.request.host(),
            http.scheme = %flow.request.scheme(),
            http.status_code = field::Empty,
            "traffic.type" = %traffic_type,
            traffic.subtype = flow.metadata.traffic_subtype.as_deref().unwrap_or(""),
            agent.role = flow.metadata.agent_role.as_deref().unwrap_or(""),
            trace.parent = flow.request.header("traceparent").unwrap_or(""),
            chaos.injected = field::Empty,
            chaos.strategies_applied = field::Empty,
            ai.ttft = field::Empty,
            otel.status_code = field::Empty,
        );
        self.spans.lock().insert(flow.metadata.request_id.clone(), span.clone());

        self.apply_strategies(flow, &engine, "request", &span, "unknown").await;
        Ok(())
    }

    /// Apply one phase's strategies in plan declaration order through their
    /// circuit breakers.
    async fn apply_strategies(
        &self,
        flow: &mut Flow,
        engine: &Engine,
        phase: &str,
        span: &Span,
        model: &str,
    ) {
        for handle in &engine.strategies {
            if !handle.enabled() || !handle.should_trigger(flow) {
                continue;
            }

            match handle.intercept(flow).instrument(span.clone()).await {
                Ok(true) => {
                    record_chaos_injection(handle.name(), model);

                    let attributes = handle
                        .strategy()
                        .span_attributes()
                        .into_iter()
                        .map(|(key, value)| format!("{key}={value}"))
                        .collect::<Vec<_>>()
                        .join(",");
                    span.in_scope(|| {
                        info!(
                            chaos.strategy = handle.name(),
                            chaos.strategy_type = handle.kind(),
                            chaos.attributes = %attributes,
                            "Chaos strategy applied"
                        );
                    });
                    span.record("chaos.injected", true);

                    if handle.kind() == "mcp_fuzzing" {
                        self.record_tool_call_spans(flow, handle, span);
                    }

                    self.events.broadcast(DashboardEvent::chaos_injected(
                        &flow.metadata.request_id,
                        handle.name(),
                        phase,
                        flow.metadata
                            .agent_role
                            .as_ref()
                            .map(|role| serde_json::json!({ "agent_role": role })),
                    ));

                    debug!("Strategy {} applied to {phase}", handle.name());
                }
                Ok(false) => {}
                Err(e) => {
                    // Fail-open: the flow continues with whatever state
                    // preceded the failure; the breaker tracks the rest.
                    warn!(
                        "Strategy '{}' failed (circuit breaker will bypass if repeated): {e}",
                        handle.name()
                    );
                }
            }
        }
    }

    /// Nested span per detected tool call, so traces show
    /// planner -> (fuzzed params) -> tool.
    fn record_tool_call_spans(&self, flow: &Flow, handle: &StrategyHandle, parent: &Span) {
        let Some(body) = flow.request.json() else {
            return;
        };
        let fuzz_type = handle
            .strategy()
            .span_attributes()
            .into_iter()
            .find(|(key, _)| *key == "chaos.fuzz_type")
            .map(|(_, value)| value)
            .unwrap_or_default();
        for (index, tool_name) in detect_tool_call_names(&body).into_iter().enumerate() {
            parent.in_scope(|| {
                let tool_span = info_span!(
                    "chaos.tool_call.fuzz",
                    tool.name = %tool_name,
                    tool.index = index,
                    chaos.strategy = handle.name(),
                    chaos.fuzz_type = %fuzz_type,
                    chaos.fuzzed = true,
                );
                let _entered = tool_span.entered();
                debug!("Created tool call span: {tool_name}");
            });
        }
    }

    /// Response-headers hook: start the TTFT clock for LLM flows.
    pub fn response_headers(&self, flow: &Flow) {
        if is_llm_url(&flow.request.url) {
            self.ttft_starts.insert(flow.metadata.request_id.clone(), Instant::now());
        }
    }

    /// Response hook: metrics, response-phase strategies, span finalization,
    /// dashboard events, tape recording, structured log line.
    pub async fn response(&self, flow: &mut Flow) {
        if let Err(e) = self.response_impl(flow).await {
            error!("CRITICAL: Unexpected error in response hook (fail-open - flow continues): {e}");
        }
        // Per-flow state is released even on failure.
        self.spans.lock().remove(&flow.metadata.request_id);
        self.ttft_starts.remove(&flow.metadata.request_id);
    }

    async fn response_impl(&self, flow: &mut Flow) -> Result<(), ChaosError> {
        let span = self
            .spans
            .lock()
            .get(&flow.metadata.request_id)
            .cloned()
            .unwrap_or_else(Span::none);

        self.reload_plan();
        let engine = self.engine.load_full();

        if flow.response.is_none() {
            span.record("otel.status_code", "ERROR");
            return Ok(());
        }

        let is_llm = is_llm_url(&flow.request.url);
        let model = flow
            .request
            .json()
            .and_then(|body| body.get("model").and_then(|m| m.as_str().map(str::to_owned)))
            .unwrap_or_else(|| "unknown".to_owned());

        if is_llm {
            record_ai_request(&model);
        }

        // TTFT from the recorded headers-received instant.
        let mut latency_ms = None;
        if let Some(start) = self.ttft_starts.remove(&flow.metadata.request_id) {
            let elapsed = start.elapsed().as_secs_f64();
            latency_ms = Some(elapsed * 1000.0);
            if is_llm {
                record_ttft(elapsed, &model);
                span.record("ai.ttft", elapsed);
            }
        }

        // Token estimation: ~4 bytes per token, both directions.
        if is_llm {
            if let Some(response) = &flow.response {
                if !response.body.is_empty() {
                    record_token_usage(response.body.len().div_ceil(4) as u64, &model, "completion");
                }
            }
            if !flow.request.body.is_empty() {
                record_token_usage(flow.request.body.len().div_ceil(4) as u64, &model, "prompt");
            }
        }

        let metric_model = if is_llm { model.as_str() } else { "unknown" };
        self.apply_strategies(flow, &engine, "response", &span, metric_model).await;

        let status_code = flow.response.as_ref().map(|r| r.status_code).unwrap_or(0);
        span.record("http.status_code", u64::from(status_code));
        span.record(
            "otel.status_code",
            if status_code >= 400 { "ERROR" } else { "OK" },
        );
        if flow.metadata.applied_strategies.is_empty() {
            span.record("chaos.injected", false);
        } else {
            let joined = flow.metadata.applied_strategies.join(",");
            span.record("chaos.strategies_applied", joined.as_str());
        }

        let response_size = flow.response.as_ref().map(|r| r.body.len() as u64);
        self.events.broadcast(DashboardEvent::response_received(
            &flow.metadata.request_id,
            status_code,
            response_size,
            latency_ms,
        ));
        if flow.metadata.traffic_type == Some(TrafficType::AgentToAgent) {
            self.events.broadcast(DashboardEvent::swarm_message(
                &flow.metadata.request_id,
                flow.metadata.agent_role.clone(),
                None,
                flow.metadata
                    .traffic_subtype
                    .clone()
                    .unwrap_or_else(|| "agent_to_agent".to_owned()),
                !flow.metadata.applied_strategies.is_empty(),
            ));
        }

        if self.mode == ProxyMode::Record {
            if let Err(e) = self.record_to_tape(flow).await {
                error!("Error recording to tape: {e}");
            }
        }

        self.write_log_entry(flow);
        Ok(())
    }

    /// PLAYBACK: answer from the tape, never touch the network or the
    /// strategies.
    fn handle_playback(&self, flow: &mut Flow) {
        let sequence = self.request_counter.fetch_add(1, Ordering::Relaxed);
        flow.metadata.request_id = format!("req_{sequence}_{}", Uuid::new_v4().simple());
        flow.metadata.from_playback = true;

        let Some(player) = &self.player else {
            flow.response = Some(FlowResponse::make(
                500,
                br#"{"error": "TapePlayer not initialized"}"#.to_vec(),
                &[("Content-Type", "application/json")],
            ));
            return;
        };

        let headers: BTreeMap<String, String> = flow
            .request
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();

        let entry = player.find_match(
            flow.request.method.as_str(),
            &flow.request.url,
            Some(&flow.request.body),
            &headers,
        );

        let redacted_url = self.redactor.redact_url(&flow.request.url);
        match entry {
            Some(entry) => {
                let snapshot = &entry.response;
                let header_pairs: Vec<(&str, &str)> = snapshot
                    .headers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let mut response =
                    FlowResponse::make(snapshot.status_code, snapshot.content.clone(), &header_pairs);
                response.reason = snapshot.reason.clone();
                if let Some(encoding) = &snapshot.content_encoding {
                    response.set_header("Content-Encoding", encoding);
                }

                flow.metadata.traffic_type =
                    entry.chaos_context.traffic_type.as_deref().map(TrafficType::parse);
                flow.metadata.traffic_subtype = entry.chaos_context.traffic_subtype.clone();
                flow.metadata.agent_role = entry.chaos_context.agent_role.clone();
                flow.metadata.applied_strategies = entry.chaos_context.applied_strategies.clone();

                self.events.broadcast(DashboardEvent::request_started(
                    &flow.metadata.request_id,
                    flow.request.method.as_str(),
                    &redacted_url,
                    flow.metadata.agent_role.clone(),
                    entry.chaos_context.traffic_type.clone().unwrap_or_else(|| "UNKNOWN".to_owned()),
                    flow.metadata.traffic_subtype.clone(),
                ));
                self.events.broadcast(DashboardEvent::response_received(
                    &flow.metadata.request_id,
                    snapshot.status_code,
                    Some(snapshot.content.len() as u64),
                    None,
                ));

                info!(
                    "PLAYBACK: Matched {} {redacted_url} -> {} (sequence {}, chaos: {})",
                    flow.request.method,
                    snapshot.status_code,
                    entry.sequence,
                    entry.chaos_context.chaos_applied
                );
                flow.response = Some(response);
            }
            None => {
                warn!("No match found in tape for {} {redacted_url}", flow.request.method);
                self.events.broadcast(DashboardEvent::request_started(
                    &flow.metadata.request_id,
                    flow.request.method.as_str(),
                    &redacted_url,
                    None,
                    "UNKNOWN",
                    None,
                ));
                self.events.broadcast(DashboardEvent::response_received(
                    &flow.metadata.request_id,
                    404,
                    None,
                    None,
                ));
                flow.response = Some(FlowResponse::make(
                    404,
                    br#"{"error": "No matching entry in tape"}"#.to_vec(),
                    &[("Content-Type", "application/json")],
                ));
            }
        }
    }

    /// Append the flow to the tape. Fingerprinting, redaction, and hashing
    /// are CPU work, so the append runs on the blocking pool.
    async fn record_to_tape(&self, flow: &Flow) -> Result<(), ChaosError> {
        let (Some(recorder), Some(response)) = (&self.recorder, &flow.response) else {
            return Ok(());
        };

        let request_headers: BTreeMap<String, String> = flow
            .request
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();
        let response_headers: BTreeMap<String, String> = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();

        let context = ChaosContext {
            applied_strategies: flow.metadata.applied_strategies.clone(),
            chaos_applied: !flow.metadata.applied_strategies.is_empty(),
            traffic_type: flow.metadata.traffic_type.map(|t| t.as_str().to_owned()),
            traffic_subtype: flow.metadata.traffic_subtype.clone(),
            agent_role: flow.metadata.agent_role.clone(),
        };

        let recorder = recorder.clone();
        let method = flow.request.method.as_str().to_owned();
        let url = flow.request.url.clone();
        let body = flow.request.body.clone();
        let response_status = response.status_code;
        let response_reason = response.reason.clone();
        let response_body = response.body.clone();
        let response_encoding = response.content_encoding();

        tokio::task::spawn_blocking(move || {
            recorder.lock().record(
                &method,
                &url,
                Some(&body),
                &request_headers,
                response_status,
                &response_reason,
                &response_headers,
                &response_body,
                response_encoding.as_deref(),
                context,
            )
        })
        .await
        .map_err(|e| ChaosError::Tape(format!("Tape recording task failed: {e}")))?
    }

    fn write_log_entry(&self, flow: &Flow) {
        let redacted_url = self.redactor.redact_url(&flow.request.url);
        let url_lower = redacted_url.to_ascii_lowercase();

        let tool_name = if url_lower.contains("/search_flights") {
            Some("search_flights")
        } else if url_lower.contains("/book_ticket") || url_lower.contains("/book") {
            Some("book_ticket")
        } else if url_lower.contains("/api/") || url_lower.contains("/v1/chat") {
            Some("llm_request")
        } else {
            None
        };

        let applied = &flow.metadata.applied_strategies;
        let fuzzed = applied.iter().any(|name| {
            let lower = name.to_ascii_lowercase();
            lower.contains("fuzzing") || lower.contains("mcp") || lower.contains("corruption")
        });

        let entry = LogEntry {
            timestamp: chrono::Local::now().to_rfc3339(),
            method: flow.request.method.to_string(),
            url: redacted_url,
            status_code: flow.response.as_ref().map(|r| r.status_code),
            chaos_applied: if applied.is_empty() {
                None
            } else {
                Some(applied.join(","))
            },
            tool_name,
            fuzzed,
            agent_role: flow.metadata.agent_role.clone(),
            traffic_type: flow
                .metadata
                .traffic_type
                .unwrap_or(TrafficType::Unknown)
                .as_str()
                .to_owned(),
            traffic_subtype: flow.metadata.traffic_subtype.clone(),
        };

        match serde_json::to_string(&entry) {
            Ok(line) => self.log_writer.write_line(line),
            Err(e) => debug!("Error serializing log entry: {e}"),
        }
    }

    /// Shut down: flush the tape (fatal to a RECORD session on failure) and
    /// drain the structured log.
    pub async fn shutdown(&self) -> Result<(), ChaosError> {
        let mut result = Ok(());
        if let (Some(recorder), Some(cipher)) = (&self.recorder, &self.cipher) {
            let recorder = recorder.lock();
            match recorder.save(cipher) {
                Ok(path) => {
                    info!("Tape saved: {} ({} entries)", path.display(), recorder.tape().entries.len());
                }
                Err(e) => {
                    error!("Error saving tape: {e}");
                    result = Err(e);
                }
            }
        }
        self.log_writer.shutdown().await;
        result
    }
}

/// Extract tool/function names from a tool-call shaped request body.
fn detect_tool_call_names(body: &serde_json::Value) -> Vec<String> {
    let mut names = Vec::new();
    let Some(messages) = body.get("messages").and_then(|m| m.as_array()) else {
        return names;
    };

    for message in messages {
        if let Some(tool_calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
            for tool_call in tool_calls {
                let name = tool_call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .or_else(|| tool_call.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or("unknown");
                names.push(name.to_owned());
            }
        }
        if let Some(function_call) = message.get("function_call") {
            let name = function_call.get("name").and_then(|n| n.as_str()).unwrap_or("unknown");
            names.push(name.to_owned());
        }
        if let Some(blocks) = message.get("content").and_then(|c| c.as_array()) {
            for block in blocks {
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    let name = block.get("name").and_then(|n| n.as_str()).unwrap_or("unknown");
                    names.push(name.to_owned());
                }
            }
        }
    }
    names
}
