//! Pagination detection and multi-page result collection.
//!
//! Recognizes cursor/next-token result fields, page/offset parameter
//! pairs, and plain item sequences. Auto-collection fetches whole pages
//! strictly in order (page N+1 never starts before page N completes),
//! dedups items by a stable identity when one is derivable, and clamps the
//! accumulated list to the configured maximum. A page failure mid-stream
//! keeps the partial results and records the failure instead of
//! discarding them.

use std::{collections::HashSet, future::Future};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use tracing::debug;

use crate::{catalog::ParamSpec, error::GatewayResult, sdk::CallArgs};

const CURSOR_TOKENS: &[&str] = &[
    "page",
    "offset",
    "cursor",
    "next_token",
    "starting_after",
    "marker",
];
const LIMIT_TOKENS: &[&str] = &["limit", "per_page", "page_size", "max_results", "count", "top"];
const NEXT_CURSOR_KEYS: &[&str] = &["next_page_token", "next_cursor", "next"];
const ITEM_KEYS: &[&str] = &["items", "data"];
const IDENTITY_KEYS: &[&str] = &["id", "uid", "name", "key"];

/// Pagination-relevant parameters detected on a callable at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageShape {
    pub cursor_param: Option<String>,
    pub limit_param: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorStyle {
    /// Opaque token echoed from the previous result.
    Token,
    /// 1-based page number parameter.
    PageNumber,
    /// Item offset parameter, advanced by items seen.
    Offset,
}

impl PageShape {
    /// Detect cursor/limit parameters by name. A parameter matching a
    /// limit token (`per_page`, `page_size`, …) is never taken as the
    /// cursor even though it contains "page".
    pub fn detect(params: &[ParamSpec]) -> Option<Self> {
        let mut cursor_param = None;
        let mut limit_param = None;

        for param in params {
            let lower = param.name.to_ascii_lowercase();
            let is_limit = LIMIT_TOKENS.iter().any(|t| lower.contains(t));
            if is_limit {
                limit_param.get_or_insert_with(|| param.name.clone());
                continue;
            }
            if cursor_param.is_none() && CURSOR_TOKENS.iter().any(|t| lower.contains(t)) {
                cursor_param = Some(param.name.clone());
            }
        }

        if cursor_param.is_none() && limit_param.is_none() {
            return None;
        }
        Some(Self {
            cursor_param,
            limit_param,
        })
    }

    fn cursor_style(&self) -> CursorStyle {
        match &self.cursor_param {
            Some(name) => {
                let lower = name.to_ascii_lowercase();
                if lower.contains("offset") {
                    CursorStyle::Offset
                } else if lower.contains("page") {
                    CursorStyle::PageNumber
                } else {
                    CursorStyle::Token
                }
            }
            None => CursorStyle::Token,
        }
    }
}

/// Caller-supplied pagination hints on an invocation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageHints {
    pub limit: Option<usize>,
    pub cursor: Option<Value>,
    pub collect_all: Option<bool>,
}

/// Normalized result of the pagination stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutcome {
    pub value: Value,
    pub pages_fetched: u32,
    pub truncated: bool,
}

impl PageOutcome {
    fn passthrough(value: Value) -> Self {
        Self {
            value,
            pages_fetched: 1,
            truncated: false,
        }
    }
}

pub struct Paginator {
    max_items: usize,
    auto_collect: bool,
    page_size: usize,
}

impl Paginator {
    pub fn new(max_items: usize, auto_collect: bool, page_size: usize) -> Self {
        Self {
            max_items,
            auto_collect,
            page_size,
        }
    }

    /// Drive the call through the detected page shape. `fetch` performs
    /// one underlying invocation with the given arguments.
    pub async fn run<F, Fut>(
        &self,
        shape: Option<&PageShape>,
        mut args: CallArgs,
        hints: &PageHints,
        fetch: F,
    ) -> GatewayResult<PageOutcome>
    where
        F: Fn(CallArgs) -> Fut,
        Fut: Future<Output = GatewayResult<Value>>,
    {
        let Some(shape) = shape else {
            let raw = fetch(args).await?;
            return Ok(self.normalize_unpaged(raw));
        };

        let requested = hints
            .limit
            .unwrap_or(self.page_size)
            .min(self.max_items)
            .max(1);
        if let Some(limit_param) = &shape.limit_param {
            args.entry(limit_param.clone())
                .or_insert_with(|| json!(requested));
        }

        if hints.collect_all.unwrap_or(self.auto_collect) {
            self.collect_all(shape, args, requested, fetch).await
        } else {
            self.single_page(shape, args, hints, fetch).await
        }
    }

    /// Defensive handling for tools with no recognized page shape: bare
    /// sequences are clipped to the item cap, everything else passes
    /// through unchanged.
    pub fn normalize_unpaged(&self, value: Value) -> PageOutcome {
        match value {
            Value::Array(mut items) if items.len() > self.max_items => {
                items.truncate(self.max_items);
                PageOutcome {
                    value: Value::Array(items),
                    pages_fetched: 1,
                    truncated: true,
                }
            }
            value => PageOutcome::passthrough(value),
        }
    }

    async fn single_page<F, Fut>(
        &self,
        shape: &PageShape,
        mut args: CallArgs,
        hints: &PageHints,
        fetch: F,
    ) -> GatewayResult<PageOutcome>
    where
        F: Fn(CallArgs) -> Fut,
        Fut: Future<Output = GatewayResult<Value>>,
    {
        if let (Some(cursor_param), Some(cursor)) = (&shape.cursor_param, &hints.cursor) {
            args.insert(cursor_param.clone(), cursor.clone());
        }

        let raw = fetch(args.clone()).await?;
        let Some(items) = extract_items(&raw) else {
            return Ok(PageOutcome::passthrough(raw));
        };

        let next_cursor = match shape.cursor_style() {
            CursorStyle::Token => extract_next_cursor(&raw),
            CursorStyle::PageNumber if !items.is_empty() => {
                shape.cursor_param.as_ref().map(|p| {
                    json!(current_number(&args, p).unwrap_or(1) + 1)
                })
            }
            CursorStyle::Offset if !items.is_empty() => shape.cursor_param.as_ref().map(|p| {
                json!(current_number(&args, p).unwrap_or(0) + items.len() as i64)
            }),
            _ => None,
        };

        let truncated = items.len() > self.max_items;
        let mut items = items;
        items.truncate(self.max_items);

        Ok(PageOutcome {
            value: json!({
                "items": items,
                "count": items.len(),
                "next_cursor": next_cursor,
            }),
            pages_fetched: 1,
            truncated,
        })
    }

    async fn collect_all<F, Fut>(
        &self,
        shape: &PageShape,
        mut args: CallArgs,
        requested: usize,
        fetch: F,
    ) -> GatewayResult<PageOutcome>
    where
        F: Fn(CallArgs) -> Fut,
        Fut: Future<Output = GatewayResult<Value>>,
    {
        let style = shape.cursor_style();
        let mut items: Vec<Value> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut pages: u32 = 0;
        let mut capped = false;
        let mut partial_error: Option<String> = None;

        loop {
            let raw = match fetch(args.clone()).await {
                Ok(raw) => raw,
                Err(e) if pages == 0 => return Err(e),
                Err(e) => {
                    debug!(error = %e, pages, "page fetch failed, keeping partial results");
                    partial_error = Some(e.to_string());
                    break;
                }
            };
            pages += 1;

            let Some(page_items) = extract_items(&raw) else {
                if pages == 1 {
                    return Ok(self.normalize_unpaged(raw));
                }
                break;
            };
            if page_items.is_empty() {
                break;
            }

            let fetched = page_items.len();
            for item in page_items {
                match identity_of(&item) {
                    Some(id) if !seen.insert(id.clone()) => continue,
                    _ => items.push(item),
                }
            }

            // Whole-page boundary: stop fetching once the cap is reached,
            // clamp below.
            if items.len() >= self.max_items {
                capped = items.len() > self.max_items || extract_next_cursor(&raw).is_some()
                    || fetched >= requested;
                break;
            }

            let advanced = match style {
                CursorStyle::Token => match (extract_next_cursor(&raw), &shape.cursor_param) {
                    (Some(token), Some(param)) => {
                        args.insert(param.clone(), token);
                        true
                    }
                    _ => false,
                },
                CursorStyle::PageNumber => {
                    // A short page means the end of the results.
                    if fetched < requested {
                        false
                    } else if let Some(param) = &shape.cursor_param {
                        let next = current_number(&args, param).unwrap_or(1) + 1;
                        args.insert(param.clone(), json!(next));
                        true
                    } else {
                        false
                    }
                }
                CursorStyle::Offset => {
                    if fetched < requested {
                        false
                    } else if let Some(param) = &shape.cursor_param {
                        let next = current_number(&args, param).unwrap_or(0) + fetched as i64;
                        args.insert(param.clone(), json!(next));
                        true
                    } else {
                        false
                    }
                }
            };
            if !advanced {
                break;
            }
        }

        let truncated = capped || items.len() > self.max_items;
        items.truncate(self.max_items);

        let mut payload = Map::new();
        payload.insert("count".to_string(), Value::Number(Number::from(items.len())));
        payload.insert("items".to_string(), Value::Array(items));
        if let Some(error) = partial_error {
            payload.insert("partial_error".to_string(), Value::String(error));
        }

        Ok(PageOutcome {
            value: Value::Object(payload),
            pages_fetched: pages,
            truncated,
        })
    }
}

fn current_number(args: &CallArgs, param: &str) -> Option<i64> {
    args.get(param).and_then(Value::as_i64)
}

/// Pull an item sequence out of a raw result: bare arrays, or `items` /
/// `data` fields on objects.
fn extract_items(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::Object(map) => ITEM_KEYS
            .iter()
            .find_map(|k| map.get(*k))
            .and_then(Value::as_array)
            .cloned(),
        _ => None,
    }
}

fn extract_next_cursor(value: &Value) -> Option<Value> {
    let map = value.as_object()?;
    NEXT_CURSOR_KEYS
        .iter()
        .find_map(|k| map.get(*k))
        .filter(|v| !v.is_null())
        .cloned()
}

/// Stable per-item identity, when one is derivable.
fn identity_of(item: &Value) -> Option<String> {
    let map = item.as_object()?;
    IDENTITY_KEYS.iter().find_map(|k| {
        map.get(*k).and_then(|v| match v {
            Value::String(s) => Some(format!("{}={}", k, s)),
            Value::Number(n) => Some(format!("{}={}", k, n)),
            _ => None,
        })
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        catalog::{ParamSpec, ParamType},
        error::GatewayError,
    };

    fn shape(cursor: Option<&str>, limit: Option<&str>) -> PageShape {
        PageShape {
            cursor_param: cursor.map(str::to_string),
            limit_param: limit.map(str::to_string),
        }
    }

    fn item(id: u64) -> Value {
        json!({"id": id, "payload": format!("item-{}", id)})
    }

    #[test]
    fn test_detect_prefers_limit_over_cursor_for_per_page() {
        let params = vec![
            ParamSpec::new("per_page", ParamType::Integer).optional(),
            ParamSpec::new("cursor", ParamType::String).optional(),
        ];
        let detected = PageShape::detect(&params).unwrap();
        assert_eq!(detected.limit_param.as_deref(), Some("per_page"));
        assert_eq!(detected.cursor_param.as_deref(), Some("cursor"));
    }

    #[test]
    fn test_detect_none_without_page_params() {
        let params = vec![ParamSpec::new("name", ParamType::String)];
        assert!(PageShape::detect(&params).is_none());
    }

    #[test]
    fn test_cursor_styles() {
        assert_eq!(
            shape(Some("next_token"), None).cursor_style(),
            CursorStyle::Token
        );
        assert_eq!(
            shape(Some("page"), None).cursor_style(),
            CursorStyle::PageNumber
        );
        assert_eq!(
            shape(Some("offset"), None).cursor_style(),
            CursorStyle::Offset
        );
    }

    /// Serves `total` items in pages, via an explicit next cursor.
    fn paged_fetch(
        total: u64,
        page_size: u64,
        calls: Arc<AtomicU32>,
    ) -> impl Fn(CallArgs) -> std::pin::Pin<Box<dyn Future<Output = GatewayResult<Value>> + Send>>
    {
        move |args: CallArgs| {
            calls.fetch_add(1, Ordering::SeqCst);
            let start = args.get("cursor").and_then(Value::as_u64).unwrap_or(0);
            let end = (start + page_size).min(total);
            let items: Vec<Value> = (start..end).map(item).collect();
            let next = (end < total).then_some(end);
            Box::pin(async move {
                Ok(json!({
                    "items": items,
                    "next_cursor": next,
                }))
            })
                as std::pin::Pin<Box<dyn Future<Output = GatewayResult<Value>> + Send>>
        }
    }

    #[tokio::test]
    async fn test_collect_all_whole_page_truncation() {
        let calls = Arc::new(AtomicU32::new(0));
        let paginator = Paginator::new(25, true, 10);
        let fetch = paged_fetch(30, 10, Arc::clone(&calls));

        let outcome = paginator
            .run(
                Some(&shape(Some("cursor"), None)),
                CallArgs::new(),
                &PageHints::default(),
                fetch,
            )
            .await
            .unwrap();

        // 3 whole pages fetched, then clamped to the cap.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.pages_fetched, 3);
        assert!(outcome.truncated);
        let items = outcome.value["items"].as_array().unwrap();
        assert_eq!(items.len(), 25);
        // First-seen order preserved
        assert_eq!(items[0]["id"], 0);
        assert_eq!(items[24]["id"], 24);
    }

    #[tokio::test]
    async fn test_collect_all_stops_at_end_of_results() {
        let calls = Arc::new(AtomicU32::new(0));
        let paginator = Paginator::new(100, true, 10);
        let fetch = paged_fetch(15, 10, Arc::clone(&calls));

        let outcome = paginator
            .run(
                Some(&shape(Some("cursor"), None)),
                CallArgs::new(),
                &PageHints::default(),
                fetch,
            )
            .await
            .unwrap();

        assert_eq!(outcome.pages_fetched, 2);
        assert!(!outcome.truncated);
        assert_eq!(outcome.value["count"], 15);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_collected_items() {
        let calls = Arc::new(AtomicU32::new(0));
        let paginator = Paginator::new(100, true, 10);
        let calls_inner = Arc::clone(&calls);

        let fetch = move |_args: CallArgs| {
            let call = calls_inner.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if call == 0 {
                    Ok(json!({"items": (0..10u64).map(item).collect::<Vec<_>>(), "next_cursor": 10}))
                } else {
                    Err(GatewayError::PermanentUpstream("boom".to_string()))
                }
            })
                as std::pin::Pin<Box<dyn Future<Output = GatewayResult<Value>> + Send>>
        };

        let outcome = paginator
            .run(
                Some(&shape(Some("cursor"), None)),
                CallArgs::new(),
                &PageHints::default(),
                fetch,
            )
            .await
            .unwrap();

        assert_eq!(outcome.value["count"], 10);
        assert!(outcome.value["partial_error"]
            .as_str()
            .unwrap()
            .contains("boom"));
    }

    #[tokio::test]
    async fn test_first_page_failure_propagates() {
        let paginator = Paginator::new(100, true, 10);
        let fetch = |_args: CallArgs| async {
            Err::<Value, _>(GatewayError::PermanentUpstream("down".to_string()))
        };

        let err = paginator
            .run(
                Some(&shape(Some("cursor"), None)),
                CallArgs::new(),
                &PageHints::default(),
                fetch,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::PermanentUpstream(_)));
    }

    #[tokio::test]
    async fn test_duplicate_items_deduped_by_identity() {
        let calls = Arc::new(AtomicU32::new(0));
        let paginator = Paginator::new(100, true, 10);
        let calls_inner = Arc::clone(&calls);

        // Page 2 re-serves item 9 (overlapping pages)
        let fetch = move |_args: CallArgs| {
            let call = calls_inner.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                match call {
                    0 => Ok(json!({"items": (0..10u64).map(item).collect::<Vec<_>>(), "next_cursor": 1})),
                    1 => Ok(json!({"items": (9..15u64).map(item).collect::<Vec<_>>(), "next_cursor": null})),
                    _ => Ok(json!({"items": []})),
                }
            })
                as std::pin::Pin<Box<dyn Future<Output = GatewayResult<Value>> + Send>>
        };

        let outcome = paginator
            .run(
                Some(&shape(Some("cursor"), None)),
                CallArgs::new(),
                &PageHints::default(),
                fetch,
            )
            .await
            .unwrap();

        assert_eq!(outcome.value["count"], 15);
    }

    #[tokio::test]
    async fn test_single_page_returns_follow_up_cursor() {
        let calls = Arc::new(AtomicU32::new(0));
        let paginator = Paginator::new(100, false, 10);
        let fetch = paged_fetch(30, 10, Arc::clone(&calls));

        let outcome = paginator
            .run(
                Some(&shape(Some("cursor"), Some("limit"))),
                CallArgs::new(),
                &PageHints {
                    limit: Some(10),
                    cursor: Some(json!(10)),
                    collect_all: None,
                },
                fetch,
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.value["count"], 10);
        assert_eq!(outcome.value["items"][0]["id"], 10);
        assert_eq!(outcome.value["next_cursor"], 20);
    }

    #[tokio::test]
    async fn test_page_number_advancement() {
        let calls = Arc::new(AtomicU32::new(0));
        let paginator = Paginator::new(100, true, 10);
        let calls_inner = Arc::clone(&calls);

        // Three full pages then a short page; results carry no cursor.
        let fetch = move |args: CallArgs| {
            calls_inner.fetch_add(1, Ordering::SeqCst);
            let page = args.get("page").and_then(Value::as_u64).unwrap_or(1);
            Box::pin(async move {
                let items: Vec<Value> = if page <= 3 {
                    let base = (page - 1) * 10;
                    (base..base + 10).map(item).collect()
                } else {
                    vec![item(1000)]
                };
                Ok(json!(items))
            })
                as std::pin::Pin<Box<dyn Future<Output = GatewayResult<Value>> + Send>>
        };

        let outcome = paginator
            .run(
                Some(&shape(Some("page"), Some("per_page"))),
                CallArgs::new(),
                &PageHints {
                    limit: Some(10),
                    ..Default::default()
                },
                fetch,
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.value["count"], 31);
        assert!(!outcome.truncated);
    }

    #[tokio::test]
    async fn test_unrecognized_result_passes_through() {
        let paginator = Paginator::new(100, true, 10);
        let fetch = |_args: CallArgs| async { Ok(json!({"scalar": 42})) };

        let outcome = paginator
            .run(
                Some(&shape(Some("cursor"), None)),
                CallArgs::new(),
                &PageHints::default(),
                fetch,
            )
            .await
            .unwrap();
        assert_eq!(outcome.value, json!({"scalar": 42}));
        assert_eq!(outcome.pages_fetched, 1);
    }

    #[test]
    fn test_bare_array_defensive_truncation() {
        let paginator = Paginator::new(5, false, 10);
        let outcome = paginator.normalize_unpaged(json!([1, 2, 3, 4, 5, 6, 7]));
        assert!(outcome.truncated);
        assert_eq!(outcome.value.as_array().unwrap().len(), 5);

        let outcome = paginator.normalize_unpaged(json!({"ok": true}));
        assert!(!outcome.truncated);
    }
}
