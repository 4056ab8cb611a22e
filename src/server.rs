//! Payload-level request handling.
//!
//! [`GatewayHandler`] consumes protocol payloads only; transport framing
//! is the host's concern. Every call runs the full pipeline: policy gate,
//! cache lookup, rate limit, credential resolution, coerced execution,
//! pagination normalization, redaction, cache store. Internal panics are
//! contained at this boundary and never poison shared state.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{AuthResolver, EnvSnapshot},
    cache::{cache_key, CacheStats, ResultCache},
    catalog::{Catalog, RiskClass, ToolName},
    config::GatewayConfig,
    error::{ErrorKind, Failure, GatewayError, GatewayResult, InvocationResult, Origin},
    execute::{coerce_arguments, describe_call, ExecutionEngine, RetryPolicy},
    metrics::{GatewayMetrics, MetricsSnapshot},
    paginate::{PageHints, Paginator},
    policy::{GateDecision, PolicyGate},
    rate_limit::{RateLimitStats, RateLimiter},
    redact::redact_secrets,
    schema::{apply_enrichment, schema_for, SchemaEnricher, ToolSchema},
};

/// One tool invocation payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationRequest {
    pub tool: String,
    pub arguments: Map<String, Value>,
    pub page: Option<PageHints>,
    pub dry_run: bool,
}

impl InvocationRequest {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }

    #[must_use]
    pub fn with_page(mut self, page: PageHints) -> Self {
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// `server/info` payload.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub tools: ToolCounts,
    pub features: FeatureFlags,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ToolCounts {
    pub total: usize,
    pub safe: usize,
    pub mutating: usize,
    pub destructive: usize,
    pub unknown: usize,
    pub build_diagnostics: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FeatureFlags {
    pub allow_dangerous: bool,
    pub dry_run: bool,
    pub cache: bool,
    pub rate_limit: bool,
    pub auto_collect: bool,
    pub enrichment: bool,
    pub redact_secrets: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub execution: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitStats>,
}

pub struct GatewayHandler {
    catalog: Arc<Catalog>,
    config: GatewayConfig,
    gate: PolicyGate,
    auth: AuthResolver,
    env: EnvSnapshot,
    engine: ExecutionEngine,
    paginator: Paginator,
    cache: Option<ResultCache>,
    limiter: Option<RateLimiter>,
    enricher: Option<Arc<dyn SchemaEnricher>>,
    metrics: Arc<GatewayMetrics>,
    started_at: DateTime<Utc>,
}

impl GatewayHandler {
    pub fn new(catalog: Arc<Catalog>, config: GatewayConfig) -> GatewayResult<Self> {
        let gate = PolicyGate::new(
            &config.allow_patterns,
            &config.deny_patterns,
            config.allow_dangerous,
            config.dry_run,
        )?;
        let metrics = Arc::new(GatewayMetrics::new());
        let engine = ExecutionEngine::new(
            config.timeout(),
            RetryPolicy {
                max_attempts: config.retry.max_attempts,
                base_secs: config.retry.base_secs,
                max_backoff: Duration::from_secs(config.retry.max_backoff_secs),
            },
            Arc::clone(&metrics),
        );
        let paginator = Paginator::new(
            config.pagination.max_items,
            config.pagination.auto_collect,
            config.pagination.page_size,
        );
        let cache = config.cache.enabled.then(|| {
            ResultCache::new(
                config.cache.capacity,
                Duration::from_secs(config.cache.ttl_secs),
            )
        });
        let limiter = config.rate_limit.enabled.then(|| {
            RateLimiter::new(
                config.rate_limit.capacity,
                Duration::from_secs(config.rate_limit.window_secs),
            )
        });

        info!(
            tools = catalog.len(),
            diagnostics = catalog.diagnostics().len(),
            "gateway handler ready"
        );

        Ok(Self {
            catalog,
            config,
            gate,
            auth: AuthResolver::with_defaults(),
            env: EnvSnapshot::from_process(),
            engine,
            paginator,
            cache,
            limiter,
            enricher: None,
            metrics,
            started_at: Utc::now(),
        })
    }

    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn SchemaEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: EnvSnapshot) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthResolver) -> Self {
        self.auth = auth;
        self
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// All tool schemas discoverable under the active policy. Denied tools
    /// are omitted entirely.
    pub async fn list_tools(&self) -> Vec<ToolSchema> {
        let enrichment_timeout = Duration::from_millis(self.config.enrichment.timeout_ms);
        let mut schemas = Vec::new();

        for descriptor in self.catalog.list() {
            if !self.gate.evaluate(descriptor).is_visible() {
                continue;
            }
            let mut schema = schema_for(descriptor);
            if self.config.enrichment.enabled {
                if let Some(enricher) = &self.enricher {
                    schema =
                        apply_enrichment(schema, enricher.as_ref(), enrichment_timeout).await;
                }
            }
            schemas.push(schema);
        }
        schemas
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: "sdk-tool-gateway",
            version: env!("CARGO_PKG_VERSION"),
            started_at: self.started_at,
            tools: ToolCounts {
                total: self.catalog.len(),
                safe: self.catalog.count_by_risk(RiskClass::Safe),
                mutating: self.catalog.count_by_risk(RiskClass::Mutating),
                destructive: self.catalog.count_by_risk(RiskClass::Destructive),
                unknown: self.catalog.count_by_risk(RiskClass::Unknown),
                build_diagnostics: self.catalog.diagnostics().len(),
            },
            features: FeatureFlags {
                allow_dangerous: self.config.allow_dangerous,
                dry_run: self.config.dry_run,
                cache: self.cache.is_some(),
                rate_limit: self.limiter.is_some(),
                auto_collect: self.config.pagination.auto_collect,
                enrichment: self.config.enrichment.enabled && self.enricher.is_some(),
                redact_secrets: self.config.redact_secrets,
            },
            stats: StatsSnapshot {
                execution: self.metrics.snapshot(),
                cache: self.cache.as_ref().map(ResultCache::stats),
                rate_limit: self.limiter.as_ref().map(RateLimiter::stats),
            },
        }
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            info!("cache cleared");
        }
    }

    /// Run one invocation through the full pipeline.
    ///
    /// The pipeline executes on its own task: a panic anywhere inside it
    /// is converted into an `Internal` failure for this request only.
    pub async fn call_tool(
        self: &Arc<Self>,
        request: InvocationRequest,
        cancel: CancellationToken,
    ) -> InvocationResult {
        let handler = Arc::clone(self);
        let request_id = Uuid::new_v4();
        let task = tokio::spawn(async move {
            handler.handle_call(request_id, request, cancel).await
        });

        match task.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(%request_id, error = %join_error, "request pipeline panicked");
                InvocationResult::failure(Failure::new(
                    ErrorKind::Internal,
                    "internal error in request pipeline",
                    Origin::Execution,
                ))
            }
        }
    }

    async fn handle_call(
        &self,
        request_id: Uuid,
        request: InvocationRequest,
        cancel: CancellationToken,
    ) -> InvocationResult {
        let name = match ToolName::parse(&request.tool) {
            Ok(name) => name,
            Err(e) => return InvocationResult::failure(e.into_failure(Origin::Execution)),
        };
        let Some(descriptor) = self.catalog.get(&name) else {
            return InvocationResult::failure(
                GatewayError::ToolNotFound(name.to_string()).into_failure(Origin::Execution),
            );
        };

        // 1. Policy gate: pure, side-effect free, before everything else.
        let decision = self.gate.evaluate(descriptor);
        let gated_dry_run = matches!(decision, GateDecision::DryRun);
        if let GateDecision::Deny { reason } = decision {
            self.metrics.record_denial();
            warn!(%request_id, tool = %name, reason = %reason, "policy denied");
            return InvocationResult::failure(
                GatewayError::PolicyDenied(reason).into_failure(Origin::Policy),
            );
        }

        // 2. Argument coercion: pure validation, zero invocations on error.
        let args = match coerce_arguments(descriptor, &request.arguments) {
            Ok(args) => args,
            Err(e) => return InvocationResult::failure(e.into_failure(Origin::Execution)),
        };

        // 3. Dry run never touches cache, rate limits, or the callable.
        if gated_dry_run || request.dry_run {
            self.metrics.record_dry_run();
            info!(%request_id, tool = %name, "dry run");
            return InvocationResult::Success {
                value: describe_call(descriptor, &args),
                pages_fetched: 0,
                truncated: false,
            };
        }

        // 4. Cache lookup.
        let key = cache_key(&name, &request.arguments);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key) {
                self.metrics.record_cache_hit();
                debug!(%request_id, tool = %name, "cache hit");
                return hit;
            }
        }

        // 5. Rate limit.
        if let Some(limiter) = &self.limiter {
            if let Err(e) = limiter.try_acquire(&name) {
                self.metrics.record_rate_limited();
                return InvocationResult::failure(e.into_failure(Origin::Execution));
            }
        }

        // 6. Credential resolution; absence is fine until the call objects.
        let credential = self.auth.resolve(name.library(), &self.env).into_handle();

        // 7. Execute, normalizing pages when the call is paginated.
        self.metrics.record_call_start();
        let guard = scopeguard::guard(Arc::clone(&self.metrics), |metrics| {
            metrics.record_call_abandoned();
        });
        let started = Instant::now();

        let hints = request.page.clone().unwrap_or_default();
        let paginated = descriptor.page_shape.is_some();
        let outcome = self
            .paginator
            .run(descriptor.page_shape.as_ref(), args, &hints, |call_args| {
                self.engine
                    .execute(descriptor, call_args, credential.clone(), &cancel)
            })
            .await;

        scopeguard::ScopeGuard::into_inner(guard);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(page) => {
                let value = if self.config.redact_secrets {
                    redact_secrets(page.value)
                } else {
                    page.value
                };
                let result = InvocationResult::Success {
                    value,
                    pages_fetched: page.pages_fetched,
                    truncated: page.truncated,
                };
                if let Some(cache) = &self.cache {
                    cache.put(key, result.clone());
                }
                self.metrics.record_call_end(&name, true, duration_ms);
                info!(
                    %request_id,
                    tool = %name,
                    duration_ms,
                    pages = page.pages_fetched,
                    "tool call succeeded"
                );
                result
            }
            Err(GatewayError::Cancelled) => {
                // Give the unused quota back; nothing was written anywhere.
                if let Some(limiter) = &self.limiter {
                    limiter.refund(&name);
                }
                self.metrics.record_call_end(&name, false, duration_ms);
                debug!(%request_id, tool = %name, "request cancelled");
                InvocationResult::failure(GatewayError::Cancelled.into_failure(Origin::Execution))
            }
            Err(e) => {
                self.metrics.record_call_end(&name, false, duration_ms);
                let origin = stage_origin(&e, paginated);
                warn!(%request_id, tool = %name, error = %e, "tool call failed");
                InvocationResult::failure(e.into_failure(origin))
            }
        }
    }
}

fn stage_origin(error: &GatewayError, paginated: bool) -> Origin {
    match error {
        GatewayError::AuthenticationFailed(_) => Origin::Auth,
        GatewayError::PolicyDenied(_) => Origin::Policy,
        _ if paginated => Origin::Pagination,
        _ => Origin::Execution,
    }
}
