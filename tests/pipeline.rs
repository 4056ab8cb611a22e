//! End-to-end pipeline tests over a scripted fake SDK adapter.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sdk_gateway::{
    AuthResolver, CallArgs, CallError, CatalogBuilder, CredentialHandle, EnvSnapshot, ErrorKind,
    GatewayConfig, GatewayHandler, InvocationRequest, InvocationResult, NamespaceChild, Origin,
    PageHints, ParamSpec, ParamType, SchemaEnricher, SchemaPatch, SdkCallable, SdkLibrary,
    SdkNamespace,
};

#[derive(Clone)]
enum Behavior {
    /// Fixed item list.
    Items(Vec<Value>),
    /// Cursor-paged items `{id}` in `[0, total)`.
    Paged { total: u64, page_size: u64 },
    /// Transient failures before the first success.
    FlakyThen { failures: u32, value: Value },
    /// Echo arguments and whether a credential was injected.
    Echo,
    Panics,
}

struct FakeCallable {
    name: &'static str,
    params: Vec<ParamSpec>,
    behavior: Behavior,
    calls: Arc<AtomicU32>,
}

impl FakeCallable {
    fn new(name: &'static str, params: Vec<ParamSpec>, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            params,
            behavior,
            calls: Arc::new(AtomicU32::new(0)),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SdkCallable for FakeCallable {
    fn name(&self) -> &str {
        self.name
    }

    fn params(&self) -> Vec<ParamSpec> {
        self.params.clone()
    }

    async fn invoke(
        &self,
        args: CallArgs,
        credential: Option<CredentialHandle>,
    ) -> Result<Value, CallError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Items(items) => Ok(json!(items)),
            Behavior::Paged { total, page_size } => {
                let start = args.get("cursor").and_then(Value::as_u64).unwrap_or(0);
                let end = (start + page_size).min(*total);
                let items: Vec<Value> = (start..end).map(|i| json!({"id": i})).collect();
                let next = (end < *total).then_some(end);
                Ok(json!({"items": items, "next_cursor": next}))
            }
            Behavior::FlakyThen { failures, value } => {
                if call < *failures {
                    Err(CallError::Network("connection reset".to_string()))
                } else {
                    Ok(value.clone())
                }
            }
            Behavior::Echo => Ok(json!({
                "args": args,
                "had_credential": credential.is_some(),
            })),
            Behavior::Panics => panic!("adapter bug"),
        }
    }
}

struct FakeNamespace {
    callables: Vec<Arc<FakeCallable>>,
    children: Vec<(String, Arc<FakeNamespace>)>,
}

impl SdkNamespace for FakeNamespace {
    fn callables(&self) -> Vec<Arc<dyn SdkCallable>> {
        self.callables
            .iter()
            .map(|c| Arc::clone(c) as Arc<dyn SdkCallable>)
            .collect()
    }

    fn children(&self) -> Vec<NamespaceChild> {
        self.children
            .iter()
            .map(|(segment, ns)| NamespaceChild::Ready {
                segment: segment.clone(),
                namespace: Arc::clone(ns) as Arc<dyn SdkNamespace>,
            })
            .collect()
    }
}

struct FakeLibrary {
    root: Arc<FakeNamespace>,
}

impl SdkLibrary for FakeLibrary {
    fn name(&self) -> &str {
        "library"
    }

    fn root(&self) -> Arc<dyn SdkNamespace> {
        Arc::clone(&self.root) as Arc<dyn SdkNamespace>
    }
}

fn handler_with(
    config: GatewayConfig,
    namespaces: Vec<(&str, Vec<Arc<FakeCallable>>)>,
) -> Arc<GatewayHandler> {
    let root = Arc::new(FakeNamespace {
        callables: Vec::new(),
        children: namespaces
            .into_iter()
            .map(|(segment, callables)| {
                (
                    segment.to_string(),
                    Arc::new(FakeNamespace {
                        callables,
                        children: Vec::new(),
                    }),
                )
            })
            .collect(),
    });
    let catalog = CatalogBuilder::new()
        .with_library(Arc::new(FakeLibrary { root }))
        .build();
    Arc::new(
        GatewayHandler::new(Arc::new(catalog), config)
            .unwrap()
            .with_env(EnvSnapshot::default()),
    )
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

async fn call(handler: &Arc<GatewayHandler>, request: InvocationRequest) -> InvocationResult {
    handler.call_tool(request, CancellationToken::new()).await
}

fn list_things() -> Arc<FakeCallable> {
    FakeCallable::new(
        "list_things",
        vec![ParamSpec::new("kind", ParamType::String).optional()],
        Behavior::Items(vec![json!({"id": 1}), json!({"id": 2})]),
    )
}

fn delete_thing() -> Arc<FakeCallable> {
    FakeCallable::new(
        "delete_thing",
        vec![ParamSpec::new("id", ParamType::Integer)],
        Behavior::Echo,
    )
}

#[tokio::test]
async fn test_readonly_tool_executes_by_default() {
    let tool = list_things();
    let handler = handler_with(
        GatewayConfig::default(),
        vec![("readonly", vec![Arc::clone(&tool)])],
    );

    let result = call(
        &handler,
        InvocationRequest::new("library.readonly.list_things"),
    )
    .await;

    let value = result.value().expect("should succeed");
    assert_eq!(value.as_array().unwrap().len(), 2);
    assert_eq!(tool.calls(), 1);
}

#[tokio::test]
async fn test_destructive_tool_denied_without_switch() {
    let tool = delete_thing();
    let handler = handler_with(
        GatewayConfig::default(),
        vec![("admin", vec![Arc::clone(&tool)])],
    );

    let result = call(
        &handler,
        InvocationRequest::new("library.admin.delete_thing")
            .with_arguments(args(json!({"id": 7}))),
    )
    .await;

    let failure = result.as_failure().expect("should be denied");
    assert_eq!(failure.kind, ErrorKind::PolicyDenied);
    assert_eq!(failure.origin, Origin::Policy);
    assert_eq!(tool.calls(), 0);
    assert_eq!(handler.metrics().snapshot().policy_denials, 1);
}

#[tokio::test]
async fn test_destructive_dry_run_echoes_arguments() {
    let tool = delete_thing();
    let handler = handler_with(
        GatewayConfig {
            dry_run: true,
            ..Default::default()
        },
        vec![("admin", vec![Arc::clone(&tool)])],
    );

    let result = call(
        &handler,
        InvocationRequest::new("library.admin.delete_thing")
            .with_arguments(args(json!({"id": 42}))),
    )
    .await;

    match result {
        InvocationResult::Success {
            value,
            pages_fetched,
            ..
        } => {
            assert_eq!(value["dry_run"], true);
            assert_eq!(value["arguments"]["id"], 42);
            assert_eq!(pages_fetched, 0);
        }
        InvocationResult::Failure { failure } => panic!("expected dry run, got {:?}", failure),
    }
    assert_eq!(tool.calls(), 0);
    assert_eq!(handler.metrics().snapshot().dry_runs, 1);
}

#[tokio::test]
async fn test_dangerous_switch_allows_execution() {
    let tool = delete_thing();
    let handler = handler_with(
        GatewayConfig {
            allow_dangerous: true,
            ..Default::default()
        },
        vec![("admin", vec![Arc::clone(&tool)])],
    );

    let result = call(
        &handler,
        InvocationRequest::new("library.admin.delete_thing")
            .with_arguments(args(json!({"id": 7}))),
    )
    .await;

    assert!(result.is_success());
    assert_eq!(tool.calls(), 1);
}

#[tokio::test]
async fn test_deny_pattern_survives_dangerous_switch() {
    let tool = delete_thing();
    let handler = handler_with(
        GatewayConfig {
            allow_dangerous: true,
            deny_patterns: vec!["*.delete_*".to_string()],
            ..Default::default()
        },
        vec![("admin", vec![Arc::clone(&tool)])],
    );

    let result = call(
        &handler,
        InvocationRequest::new("library.admin.delete_thing")
            .with_arguments(args(json!({"id": 7}))),
    )
    .await;

    assert_eq!(
        result.as_failure().unwrap().kind,
        ErrorKind::PolicyDenied
    );
    assert_eq!(tool.calls(), 0);
}

#[tokio::test]
async fn test_denied_tools_omitted_from_listing() {
    let handler = handler_with(
        GatewayConfig::default(),
        vec![
            ("readonly", vec![list_things()]),
            ("admin", vec![delete_thing()]),
        ],
    );

    let schemas = handler.list_tools().await;
    let names: Vec<String> = schemas.iter().map(|s| s.name.to_string()).collect();
    assert_eq!(names, vec!["library.readonly.list_things".to_string()]);

    // Dry-run mode makes dangerous tools discoverable again
    let handler = handler_with(
        GatewayConfig {
            dry_run: true,
            ..Default::default()
        },
        vec![
            ("readonly", vec![list_things()]),
            ("admin", vec![delete_thing()]),
        ],
    );
    assert_eq!(handler.list_tools().await.len(), 2);
}

#[tokio::test]
async fn test_invalid_argument_type_never_invokes() {
    let tool = FakeCallable::new(
        "get_item",
        vec![ParamSpec::new("id", ParamType::Integer)],
        Behavior::Echo,
    );
    let handler = handler_with(
        GatewayConfig::default(),
        vec![("readonly", vec![Arc::clone(&tool)])],
    );

    let result = call(
        &handler,
        InvocationRequest::new("library.readonly.get_item")
            .with_arguments(args(json!({"id": "not-a-number"}))),
    )
    .await;

    let failure = result.as_failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::InvalidArgument);
    assert_eq!(tool.calls(), 0);
}

#[tokio::test]
async fn test_unknown_tool_reports_invalid_argument() {
    let handler = handler_with(GatewayConfig::default(), vec![("readonly", vec![])]);
    let result = call(&handler, InvocationRequest::new("library.readonly.missing")).await;
    let failure = result.as_failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::InvalidArgument);
    assert!(failure.hint.is_some());
}

#[tokio::test]
async fn test_cache_skips_second_invocation() {
    let tool = list_things();
    let mut config = GatewayConfig::default();
    config.cache.enabled = true;
    let handler = handler_with(config, vec![("readonly", vec![Arc::clone(&tool)])]);

    let request = InvocationRequest::new("library.readonly.list_things")
        .with_arguments(args(json!({"kind": "widget"})));

    let first = call(&handler, request.clone()).await;
    let second = call(&handler, request).await;

    assert_eq!(first, second);
    assert_eq!(tool.calls(), 1, "second call must be served from cache");
    assert_eq!(handler.metrics().snapshot().cache_hits, 1);

    // Different arguments miss the cache
    let third = call(
        &handler,
        InvocationRequest::new("library.readonly.list_things")
            .with_arguments(args(json!({"kind": "gadget"}))),
    )
    .await;
    assert!(third.is_success());
    assert_eq!(tool.calls(), 2);
}

#[tokio::test]
async fn test_clear_cache_forces_reinvocation() {
    let tool = list_things();
    let mut config = GatewayConfig::default();
    config.cache.enabled = true;
    let handler = handler_with(config, vec![("readonly", vec![Arc::clone(&tool)])]);

    let request = InvocationRequest::new("library.readonly.list_things");
    call(&handler, request.clone()).await;
    handler.clear_cache();
    call(&handler, request).await;

    assert_eq!(tool.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_blocks_and_recovers() {
    let tool = list_things();
    let mut config = GatewayConfig::default();
    config.rate_limit.enabled = true;
    config.rate_limit.capacity = 2;
    config.rate_limit.window_secs = 60;
    let handler = handler_with(config, vec![("readonly", vec![Arc::clone(&tool)])]);

    let request = InvocationRequest::new("library.readonly.list_things");
    assert!(call(&handler, request.clone()).await.is_success());
    assert!(call(&handler, request.clone()).await.is_success());

    let blocked = call(&handler, request.clone()).await;
    let failure = blocked.as_failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::RateLimited);
    assert_eq!(tool.calls(), 2, "blocked call must not invoke the callable");

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(call(&handler, request).await.is_success());
    assert_eq!(tool.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_retried_then_kept_once() {
    let tool = FakeCallable::new(
        "get_status",
        Vec::new(),
        Behavior::FlakyThen {
            failures: 2,
            value: json!({"state": "ok"}),
        },
    );
    let handler = handler_with(
        GatewayConfig::default(),
        vec![("readonly", vec![Arc::clone(&tool)])],
    );

    let started = Instant::now();
    let result = call(&handler, InvocationRequest::new("library.readonly.get_status")).await;

    assert_eq!(result.value().unwrap()["state"], "ok");
    assert_eq!(tool.calls(), 3, "two failed attempts plus one kept success");
    // Backoff schedule 2^0 + 2^1 seconds
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(handler.metrics().snapshot().retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_permanent_failure() {
    let tool = FakeCallable::new(
        "get_status",
        Vec::new(),
        Behavior::FlakyThen {
            failures: 10,
            value: json!(null),
        },
    );
    let mut config = GatewayConfig::default();
    config.retry.max_attempts = 2;
    config.retry.base_secs = 0.0;
    let handler = handler_with(config, vec![("readonly", vec![Arc::clone(&tool)])]);

    let result = call(&handler, InvocationRequest::new("library.readonly.get_status")).await;
    let failure = result.as_failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::PermanentUpstream);
    assert_eq!(tool.calls(), 2);
}

#[tokio::test]
async fn test_pagination_auto_collect_caps_at_whole_pages() {
    let tool = FakeCallable::new(
        "list_records",
        vec![
            ParamSpec::new("cursor", ParamType::Integer).optional(),
            ParamSpec::new("limit", ParamType::Integer).optional(),
        ],
        Behavior::Paged {
            total: 30,
            page_size: 10,
        },
    );
    let mut config = GatewayConfig::default();
    config.pagination.max_items = 25;
    config.pagination.auto_collect = true;
    config.pagination.page_size = 10;
    let handler = handler_with(config, vec![("readonly", vec![Arc::clone(&tool)])]);

    let result = call(
        &handler,
        InvocationRequest::new("library.readonly.list_records"),
    )
    .await;

    match result {
        InvocationResult::Success {
            value,
            pages_fetched,
            truncated,
        } => {
            let items = value["items"].as_array().unwrap();
            assert_eq!(items.len(), 25);
            assert_eq!(items[0]["id"], 0);
            assert_eq!(items[24]["id"], 24);
            assert!(truncated);
            assert_eq!(pages_fetched, 3);
        }
        InvocationResult::Failure { failure } => panic!("unexpected failure: {:?}", failure),
    }
    assert_eq!(tool.calls(), 3);
}

#[tokio::test]
async fn test_single_page_mode_returns_cursor() {
    let tool = FakeCallable::new(
        "list_records",
        vec![
            ParamSpec::new("cursor", ParamType::Integer).optional(),
            ParamSpec::new("limit", ParamType::Integer).optional(),
        ],
        Behavior::Paged {
            total: 30,
            page_size: 10,
        },
    );
    let handler = handler_with(
        GatewayConfig::default(),
        vec![("readonly", vec![Arc::clone(&tool)])],
    );

    let result = call(
        &handler,
        InvocationRequest::new("library.readonly.list_records").with_page(PageHints {
            limit: Some(10),
            cursor: Some(json!(10)),
            collect_all: None,
        }),
    )
    .await;

    let value = result.value().unwrap();
    assert_eq!(value["items"][0]["id"], 10);
    assert_eq!(value["next_cursor"], 20);
    assert_eq!(tool.calls(), 1);
}

#[tokio::test]
async fn test_secrets_redacted_from_results() {
    let tool = FakeCallable::new(
        "get_connection",
        Vec::new(),
        Behavior::Items(vec![json!({"host": "db1", "password": "hunter2"})]),
    );
    let handler = handler_with(
        GatewayConfig::default(),
        vec![("readonly", vec![Arc::clone(&tool)])],
    );

    let result = call(
        &handler,
        InvocationRequest::new("library.readonly.get_connection"),
    )
    .await;

    let value = result.value().unwrap();
    assert_eq!(value[0]["host"], "db1");
    assert_eq!(value[0]["password"], "***");
}

#[tokio::test]
async fn test_credential_injected_from_env_snapshot() {
    let tool = FakeCallable::new("get_profile", Vec::new(), Behavior::Echo);
    let root = Arc::new(FakeNamespace {
        callables: Vec::new(),
        children: vec![(
            "readonly".to_string(),
            Arc::new(FakeNamespace {
                callables: vec![Arc::clone(&tool)],
                children: Vec::new(),
            }),
        )],
    });
    let catalog = CatalogBuilder::new()
        .with_library(Arc::new(FakeLibrary { root }))
        .build();
    let env: EnvSnapshot = [("LIBRARY_API_KEY", "sk-test")].into_iter().collect();
    let handler = Arc::new(
        GatewayHandler::new(Arc::new(catalog), GatewayConfig::default())
            .unwrap()
            .with_env(env)
            .with_auth(AuthResolver::with_defaults()),
    );

    let result = call(&handler, InvocationRequest::new("library.readonly.get_profile")).await;
    assert_eq!(result.value().unwrap()["had_credential"], true);
}

#[tokio::test]
async fn test_panicking_callable_is_contained() {
    let tool = FakeCallable::new("get_broken", Vec::new(), Behavior::Panics);
    let handler = handler_with(
        GatewayConfig::default(),
        vec![("readonly", vec![Arc::clone(&tool)])],
    );

    let result = call(&handler, InvocationRequest::new("library.readonly.get_broken")).await;
    let failure = result.as_failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Internal);

    // The handler stays healthy for other tools afterwards
    let ok_tool = list_things();
    let handler = handler_with(
        GatewayConfig::default(),
        vec![("readonly", vec![Arc::clone(&ok_tool)])],
    );
    assert!(
        call(&handler, InvocationRequest::new("library.readonly.list_things"))
            .await
            .is_success()
    );
}

#[tokio::test]
async fn test_cancelled_request_refunds_rate_limit_token() {
    let tool = list_things();
    let mut config = GatewayConfig::default();
    config.rate_limit.enabled = true;
    config.rate_limit.capacity = 1;
    let handler = handler_with(config, vec![("readonly", vec![Arc::clone(&tool)])]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = handler
        .call_tool(
            InvocationRequest::new("library.readonly.list_things"),
            cancel,
        )
        .await;
    assert!(!result.is_success());

    // The refunded token keeps the next call within capacity
    let result = call(&handler, InvocationRequest::new("library.readonly.list_things")).await;
    assert!(result.is_success());
}

#[tokio::test]
async fn test_server_info_reflects_catalog_and_features() {
    let mut config = GatewayConfig::default();
    config.cache.enabled = true;
    let handler = handler_with(
        config,
        vec![
            ("readonly", vec![list_things()]),
            ("admin", vec![delete_thing()]),
        ],
    );

    call(&handler, InvocationRequest::new("library.readonly.list_things")).await;

    let info = handler.server_info();
    assert_eq!(info.name, "sdk-tool-gateway");
    assert_eq!(info.tools.total, 2);
    assert_eq!(info.tools.safe, 1);
    assert_eq!(info.tools.destructive, 1);
    assert!(info.features.cache);
    assert!(!info.features.allow_dangerous);
    assert_eq!(info.stats.execution.total_calls, 1);
    assert!(info.stats.cache.is_some());
    assert!(info.stats.rate_limit.is_none());
}

#[tokio::test]
async fn test_enriched_listing_keeps_structural_facts() {
    struct DescribeEnricher;

    #[async_trait]
    impl SchemaEnricher for DescribeEnricher {
        async fn enrich(
            &self,
            _schema: &sdk_gateway::ToolSchema,
        ) -> Result<SchemaPatch, sdk_gateway::schema::EnrichError> {
            Ok(SchemaPatch {
                description: Some("Much better description.".to_string()),
                ..Default::default()
            })
        }
    }

    let mut config = GatewayConfig::default();
    config.enrichment.enabled = true;
    let root = Arc::new(FakeNamespace {
        callables: Vec::new(),
        children: vec![(
            "readonly".to_string(),
            Arc::new(FakeNamespace {
                callables: vec![list_things()],
                children: Vec::new(),
            }),
        )],
    });
    let catalog = CatalogBuilder::new()
        .with_library(Arc::new(FakeLibrary { root }))
        .build();
    let handler = Arc::new(
        GatewayHandler::new(Arc::new(catalog), config)
            .unwrap()
            .with_env(EnvSnapshot::default())
            .with_enricher(Arc::new(DescribeEnricher)),
    );

    let schemas = handler.list_tools().await;
    assert_eq!(schemas.len(), 1);
    assert_eq!(
        schemas[0].description.as_deref(),
        Some("Much better description.")
    );
    // Structural facts still from the descriptor
    assert_eq!(schemas[0].input_schema["type"], "object");
}

#[tokio::test]
#[serial_test::serial]
async fn test_env_snapshot_from_process() {
    std::env::set_var("PROCESSLIB_API_KEY", "from-process");
    let env = EnvSnapshot::from_process();
    std::env::remove_var("PROCESSLIB_API_KEY");

    let resolver = AuthResolver::with_defaults();
    let handle = resolver.resolve("processlib", &env).into_handle().unwrap();
    assert_eq!(handle.strategy, "generic-env-key");
    assert_eq!(handle.secret(), Some("from-process"));
}
