//! End-to-end behaviour of cached endpoints against an instrumented store.

use async_trait::async_trait;
use endpoint_cache::cache::{CacheBackend, MemoryCache};
use endpoint_cache::clock::ManualClock;
use endpoint_cache::validate::RECEIVER;
use endpoint_cache::{
    cache_config, disable_cache, endpoint_fn, ArgumentValidator, CachedEndpoint, CallArgs,
    Endpoint, Error, ErrorContext, RequestContext,
};
use reqwest::header::{HeaderValue, CACHE_CONTROL};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Memory store that counts every operation and can be switched to fail.
struct RecordingBackend {
    inner: MemoryCache,
    ops: AtomicUsize,
    deletes: AtomicUsize,
    sets: AtomicUsize,
    failing: AtomicBool,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self {
            inner: MemoryCache::new(64),
            ops: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }
}

impl RecordingBackend {
    fn failing() -> Self {
        let backend = Self::default();
        backend.failing.store(true, Ordering::SeqCst);
        backend
    }

    fn ops(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
    }

    fn check(&self) -> endpoint_cache::Result<()> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::store_with_context(
                "connection refused",
                ErrorContext::new().with_source("recording"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for RecordingBackend {
    async fn exists(&self, key: &str) -> endpoint_cache::Result<bool> {
        self.check()?;
        self.inner.exists(key).await
    }
    async fn get(&self, key: &str) -> endpoint_cache::Result<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> endpoint_cache::Result<()> {
        self.check()?;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }
    async fn delete(&self, key: &str) -> endpoint_cache::Result<bool> {
        self.check()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }
    async fn clear(&self) -> endpoint_cache::Result<()> {
        self.inner.clear().await
    }
    async fn len(&self) -> endpoint_cache::Result<usize> {
        self.inner.len().await
    }
    fn name(&self) -> &'static str {
        "recording"
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type ValueEndpoint = dyn Endpoint<Args = Value, Output = i64, Error = Error>;

/// `Foo.bar(x)`: returns `x * 42 + <number of previous invocations>`.
fn foo_bar(calls: Arc<AtomicUsize>) -> impl Endpoint<Args = Value, Output = i64, Error = Error> {
    endpoint_fn("Foo.bar", move |_ctx: RequestContext, args: Value| {
        let calls = calls.clone();
        async move {
            let previous = calls.fetch_add(1, Ordering::SeqCst) as i64;
            Ok::<_, Error>(args["x"].as_i64().unwrap_or_default() * 42 + previous)
        }
    })
}

fn x_validator() -> ArgumentValidator {
    ArgumentValidator::new(
        vec![endpoint_cache::Param::new("x")],
        json!({
            "type": "object",
            "properties": { "x": { "type": "integer" } },
            "required": ["x"],
            "additionalProperties": false
        }),
    )
    .unwrap()
}

struct Fixture {
    calls: Arc<AtomicUsize>,
    backend: Arc<RecordingBackend>,
    clock: Arc<ManualClock>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_backend(RecordingBackend::default())
    }

    fn with_backend(backend: RecordingBackend) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            backend: Arc::new(backend),
            clock: Arc::new(ManualClock::starting_now()),
        }
    }

    fn cached(
        &self,
        options: endpoint_cache::CacheOptions,
    ) -> CachedEndpoint<impl Endpoint<Args = Value, Output = i64, Error = Error>> {
        CachedEndpoint::builder(foo_bar(self.calls.clone()))
            .validator(x_validator())
            .options(options)
            .backend(self.backend.clone())
            .clock(self.clock.clone())
            .build()
            .unwrap()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_miss_then_hit_within_ttl() {
    init_tracing();
    let fx = Fixture::new();
    let cached = fx.cached(cache_config().ttl(Duration::from_secs(3600)));

    let first = RequestContext::empty();
    assert_eq!(cached.invoke(&first, CallArgs::new().kwarg("x", 1)).await.unwrap(), 42);
    assert_eq!(fx.calls(), 1);

    fx.clock.advance(Duration::from_secs(125));
    let second = RequestContext::empty();
    assert_eq!(cached.invoke(&second, CallArgs::new().kwarg("x", 1)).await.unwrap(), 42);
    assert_eq!(fx.calls(), 1, "hit must not invoke the handler");
    assert_eq!(
        second.response_header("Cache-Control").as_deref(),
        Some("max-age=3475")
    );

    let stats = cached.stats();
    assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
}

#[tokio::test]
async fn test_different_arguments_are_separate_entries() {
    let fx = Fixture::new();
    let cached = fx.cached(cache_config());

    let ctx = RequestContext::empty();
    assert_eq!(cached.invoke(&ctx, CallArgs::new().arg(1)).await.unwrap(), 42);
    assert_eq!(cached.invoke(&ctx, CallArgs::new().arg(2)).await.unwrap(), 85);
    assert_eq!(fx.calls(), 2);
    assert_eq!(fx.backend.len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_no_cache_deletes_and_recomputes() {
    let fx = Fixture::new();
    let cached = fx.cached(cache_config());

    cached
        .invoke(&RequestContext::empty(), CallArgs::new().arg(1))
        .await
        .unwrap();

    let refresh = RequestContext::with_cache_control("No-Cache");
    let fresh = cached.invoke(&refresh, CallArgs::new().arg(1)).await.unwrap();
    assert_eq!(fresh, 43, "handler ran again");
    assert_eq!(fx.backend.deletes.load(Ordering::SeqCst), 1);

    // The recomputed value is what later hits return.
    let later = cached
        .invoke(&RequestContext::empty(), CallArgs::new().arg(1))
        .await
        .unwrap();
    assert_eq!(later, 43);
    assert_eq!(fx.calls(), 2);
}

#[tokio::test]
async fn test_no_cache_without_existing_entry_still_stores() {
    let fx = Fixture::new();
    let cached = fx.cached(cache_config());

    let ctx = RequestContext::with_cache_control("no-cache");
    cached.invoke(&ctx, CallArgs::new().arg(5)).await.unwrap();
    assert_eq!(fx.backend.deletes.load(Ordering::SeqCst), 1);
    assert_eq!(fx.backend.sets.load(Ordering::SeqCst), 1);
    assert!(ctx.response_header("cache-control").is_some());
}

#[tokio::test]
async fn test_no_store_bypasses_store_for_that_call_only() {
    let fx = Fixture::new();
    let cached = fx.cached(cache_config());

    cached
        .invoke(&RequestContext::empty(), CallArgs::new().arg(1))
        .await
        .unwrap();
    let ops_before = fx.backend.ops();

    let bypass = RequestContext::with_cache_control("NO-STORE");
    let value = cached.invoke(&bypass, CallArgs::new().arg(1)).await.unwrap();
    assert_eq!(value, 43, "existing entry is not read");
    assert_eq!(fx.backend.ops(), ops_before, "store untouched");
    assert_eq!(bypass.response_header("cache-control"), None);

    // Normal calls still see the entry written before the bypass.
    let value = cached
        .invoke(&RequestContext::empty(), CallArgs::new().arg(1))
        .await
        .unwrap();
    assert_eq!(value, 42);
}

#[tokio::test]
async fn test_disabled_policy_never_touches_store() {
    let fx = Fixture::new();
    let cached = fx.cached(disable_cache());

    for _ in 0..3 {
        cached
            .invoke(&RequestContext::empty(), CallArgs::new().arg(1))
            .await
            .unwrap();
    }
    assert_eq!(fx.calls(), 3);
    assert_eq!(fx.backend.ops(), 0);
}

#[tokio::test]
async fn test_validation_failure_precedes_store_access() {
    let fx = Fixture::new();
    let cached = fx.cached(cache_config());

    let err = cached
        .invoke(&RequestContext::empty(), CallArgs::new().kwarg("x", "one"))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = cached
        .invoke(&RequestContext::empty(), CallArgs::new().kwarg("y", 1))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    assert_eq!(fx.backend.ops(), 0);
    assert_eq!(fx.calls(), 0);
}

#[tokio::test]
async fn test_store_failure_is_not_masked() {
    init_tracing();
    let fx = Fixture::with_backend(RecordingBackend::failing());
    let cached = fx.cached(cache_config());

    let err = cached
        .invoke(&RequestContext::empty(), CallArgs::new().arg(1))
        .await
        .unwrap_err();
    assert!(err.is_store());
    assert_eq!(fx.calls(), 0, "fail-closed: handler not reached");
    assert_eq!(cached.stats().errors, 1);

    // Bypassing the cache still works during a store outage.
    let bypass = RequestContext::with_cache_control("no-store");
    assert_eq!(cached.invoke(&bypass, CallArgs::new().arg(1)).await.unwrap(), 42);
}

#[tokio::test]
async fn test_upstream_cache_control_is_preserved() {
    let fx = Fixture::new();
    let cached = fx.cached(cache_config());

    let ctx = RequestContext::empty();
    ctx.insert_response_header(CACHE_CONTROL, HeaderValue::from_static("private"));
    cached.invoke(&ctx, CallArgs::new().arg(1)).await.unwrap();
    assert_eq!(ctx.response_header("cache-control").as_deref(), Some("private"));
}

#[tokio::test]
async fn test_stale_entry_gets_no_freshness_header() {
    let fx = Fixture::new();
    let cached = fx.cached(cache_config().ttl(Duration::from_secs(60)));

    cached
        .invoke(&RequestContext::empty(), CallArgs::new().arg(1))
        .await
        .unwrap();
    fx.clock.advance(Duration::from_secs(61));

    let ctx = RequestContext::empty();
    cached.invoke(&ctx, CallArgs::new().arg(1)).await.unwrap();
    assert_eq!(ctx.response_header("cache-control"), None);
}

#[derive(Debug, PartialEq)]
enum LookupError {
    NotFound(i64),
    Cache(String),
}

impl From<Error> for LookupError {
    fn from(e: Error) -> Self {
        LookupError::Cache(e.to_string())
    }
}

#[tokio::test]
async fn test_handler_errors_pass_through_and_are_not_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend = Arc::new(RecordingBackend::default());
    let counter = calls.clone();
    let endpoint = endpoint_fn("Foo.flaky", move |_ctx: RequestContext, args: Value| {
        let counter = counter.clone();
        async move {
            let x = args["x"].as_i64().unwrap_or_default();
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(LookupError::NotFound(x))
            } else {
                Ok(x)
            }
        }
    });
    let cached = CachedEndpoint::builder(endpoint)
        .validator(x_validator())
        .backend(backend.clone())
        .build()
        .unwrap();

    let err = cached
        .invoke(&RequestContext::empty(), CallArgs::new().arg(9))
        .await
        .unwrap_err();
    assert_eq!(err, LookupError::NotFound(9));
    assert_eq!(backend.sets.load(Ordering::SeqCst), 0);

    let ok = cached
        .invoke(&RequestContext::empty(), CallArgs::new().arg(9))
        .await
        .unwrap();
    assert_eq!(ok, 9);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let err = cached
        .invoke(&RequestContext::empty(), CallArgs::new().arg("nine"))
        .await
        .unwrap_err();
    assert!(matches!(err, LookupError::Cache(ref m) if m.starts_with("Validation error")));
}

#[tokio::test]
async fn test_method_and_function_share_keys() {
    let backend: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new(8));
    let options = cache_config().namespace("Foo.bar");

    let function = CachedEndpoint::builder(foo_bar(Arc::new(AtomicUsize::new(0))))
        .validator(x_validator())
        .options(options.clone())
        .backend(backend.clone())
        .build()
        .unwrap();
    let method = CachedEndpoint::builder(foo_bar(Arc::new(AtomicUsize::new(0))))
        .validator(x_validator().with_receiver(RECEIVER))
        .options(options)
        .backend(backend.clone())
        .build()
        .unwrap();

    let from_function = function.key_for(CallArgs::new().arg(1)).unwrap();
    let from_method = method
        .key_for(CallArgs::new().arg(json!({"id": "instance-a"})).arg(1))
        .unwrap();
    let from_other_instance = method
        .key_for(CallArgs::new().arg(json!({"id": "instance-b"})).kwarg("x", 1))
        .unwrap();
    assert_eq!(from_function, from_method);
    assert_eq!(from_method, from_other_instance);

    function
        .invoke(&RequestContext::empty(), CallArgs::new().arg(1))
        .await
        .unwrap();
    let via_method = method
        .invoke(&RequestContext::empty(), CallArgs::new().arg(json!({})).arg(1))
        .await
        .unwrap();
    assert_eq!(via_method, 42);
    assert_eq!(method.stats().hits, 1);
}

#[tokio::test]
async fn test_concurrent_misses_are_not_coalesced() {
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let counter = calls.clone();
    let endpoint = endpoint_fn("Foo.slow", move |_ctx: RequestContext, args: Value| {
        let counter = counter.clone();
        let barrier = barrier.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            barrier.wait().await;
            Ok::<_, Error>(args["x"].as_i64().unwrap_or_default())
        }
    });
    let cached = CachedEndpoint::builder(endpoint)
        .validator(x_validator())
        .backend(Arc::new(MemoryCache::new(8)))
        .build()
        .unwrap();

    let (first, second) = (RequestContext::empty(), RequestContext::empty());
    let (a, b) = tokio::join!(
        cached.invoke(&first, CallArgs::new().arg(4)),
        cached.invoke(&second, CallArgs::new().arg(4)),
    );
    assert_eq!((a.unwrap(), b.unwrap()), (4, 4));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cached.stats().sets, 2);
}

#[tokio::test]
async fn test_cancelled_call_leaves_no_entry() {
    let backend = Arc::new(MemoryCache::new(8));
    let endpoint = endpoint_fn("Foo.never", |_ctx: RequestContext, _args: Value| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok::<_, Error>(0i64)
    });
    let cached = CachedEndpoint::builder(endpoint)
        .validator(x_validator())
        .backend(backend.clone())
        .build()
        .unwrap();

    let ctx = RequestContext::empty();
    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        cached.invoke(&ctx, CallArgs::new().arg(1)),
    )
    .await;
    assert!(outcome.is_err(), "call timed out");
    assert_eq!(backend.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_wrapper_is_usable_as_an_endpoint() {
    let fx = Fixture::new();
    let cached = fx.cached(cache_config());
    let as_endpoint: &ValueEndpoint = &cached;

    assert_eq!(as_endpoint.identity(), "Foo.bar");
    let ctx = RequestContext::empty();
    assert_eq!(as_endpoint.call(&ctx, json!({"x": 2})).await.unwrap(), 84);
    assert_eq!(as_endpoint.call(&ctx, json!({"x": 2})).await.unwrap(), 84);
    assert_eq!(fx.calls(), 1);
}
