//! Endpoint abstraction and the caching wrapper.
//!
//! [`CachedEndpoint`] wraps any [`Endpoint`] and is itself an
//! [`Endpoint`] with the same arguments, output and error types. Per call
//! it:
//!
//! 1. reads the request directive from the [`RequestContext`];
//! 2. bypasses the store when the policy is disabled or the directive is
//!    `no-store`;
//! 3. otherwise validates the arguments and derives the cache key;
//! 4. deletes the stored entry first when the directive is `no-cache`;
//! 5. returns the stored result on a hit, or runs the handler and stores
//!    `(result, computed_at)` on a miss;
//! 6. sets `Cache-Control: max-age=N` on the response (if not already set)
//!    while the result is still fresh.
//!
//! Concurrent misses on the same key are not coalesced: each runs the
//! handler and the last write wins.

use crate::cache::{
    shared_backend, CacheBackend, CacheKey, CacheKeyGenerator, CacheManager, CacheStats,
};
use crate::clock::{Clock, SystemClock};
use crate::context::RequestContext;
use crate::policy::{CacheOptions, CachePolicy};
use crate::validate::{ArgumentValidator, CallArgs};
use crate::{Error, ErrorContext};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, CACHE_CONTROL};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// An asynchronous endpoint handler.
#[async_trait]
pub trait Endpoint: Send + Sync {
    type Args: DeserializeOwned + Send;
    type Output: Serialize + DeserializeOwned + Send + Sync;
    /// Handler error; validation and store failures convert into it.
    type Error: From<Error> + Send;

    /// Stable qualified name, used as the default cache namespace.
    fn identity(&self) -> &str;

    async fn call(
        &self,
        ctx: &RequestContext,
        args: Self::Args,
    ) -> std::result::Result<Self::Output, Self::Error>;
}

/// Endpoint backed by an async closure; see [`endpoint_fn`].
pub struct FnEndpoint<A, F> {
    identity: String,
    f: F,
    _args: PhantomData<fn(A)>,
}

/// Adapt `f(ctx, args)` into an [`Endpoint`] named `identity`.
pub fn endpoint_fn<A, F, Fut>(identity: impl Into<String>, f: F) -> FnEndpoint<A, F>
where
    F: Fn(RequestContext, A) -> Fut,
{
    FnEndpoint {
        identity: identity.into(),
        f,
        _args: PhantomData,
    }
}

#[async_trait]
impl<A, F, Fut, O, E> Endpoint for FnEndpoint<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(RequestContext, A) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<O, E>> + Send,
    O: Serialize + DeserializeOwned + Send + Sync,
    E: From<Error> + Send,
{
    type Args = A;
    type Output = O;
    type Error = E;

    fn identity(&self) -> &str {
        &self.identity
    }

    async fn call(&self, ctx: &RequestContext, args: A) -> std::result::Result<O, E> {
        (self.f)(ctx.clone(), args).await
    }
}

/// What the store holds for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedValue<T> {
    pub result: T,
    pub computed_at: SystemTime,
}

/// An endpoint with response caching in front of it.
pub struct CachedEndpoint<E: Endpoint> {
    endpoint: E,
    validator: ArgumentValidator,
    policy: CachePolicy,
    keys: CacheKeyGenerator,
    manager: CacheManager,
    clock: Arc<dyn Clock>,
}

/// Wrap an endpoint whose argument type describes its own schema, using
/// the default policy and the process-wide store.
pub fn endpoint_cache<E>(endpoint: E) -> crate::Result<CachedEndpoint<E>>
where
    E: Endpoint,
    E::Args: schemars::JsonSchema + Serialize,
{
    CachedEndpoint::builder(endpoint)
        .validator(ArgumentValidator::for_type::<E::Args>()?)
        .build()
}

impl<E: Endpoint> CachedEndpoint<E> {
    pub fn builder(endpoint: E) -> CachedEndpointBuilder<E> {
        CachedEndpointBuilder {
            endpoint,
            validator: None,
            policy: None,
            options: None,
            backend: None,
            uri: None,
            clock: None,
        }
    }

    pub fn identity(&self) -> &str {
        self.endpoint.identity()
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn stats(&self) -> CacheStats {
        self.manager.stats()
    }

    pub fn inner(&self) -> &E {
        &self.endpoint
    }

    /// The key a call with `args` would use.
    pub fn key_for(&self, args: CallArgs) -> crate::Result<CacheKey> {
        let record = self.validator.bind(args)?;
        Ok(self.keys.generate(&record))
    }

    /// Drop the stored entry for `args`. Returns whether one existed.
    pub async fn invalidate(&self, args: CallArgs) -> crate::Result<bool> {
        let key = self.key_for(args)?;
        self.manager.delete(&key).await
    }

    /// Call with raw positional/keyword arguments.
    pub async fn invoke(
        &self,
        ctx: &RequestContext,
        args: CallArgs,
    ) -> std::result::Result<E::Output, E::Error> {
        let directive = ctx.directive();

        if !self.policy.enabled() || directive.bypasses_cache() {
            debug!(
                "Request to endpoint {} bypassing cache (enabled={}, directive={})",
                self.identity(),
                self.policy.enabled(),
                directive
            );
            let record = self.validator.bind(args)?;
            let typed = record.deserialize::<E::Args>()?;
            return self.endpoint.call(ctx, typed).await;
        }

        let record = self.validator.bind(args)?;
        let typed = record.deserialize::<E::Args>()?;
        let key = self.keys.generate(&record);

        if directive.forces_refresh() {
            let removed = self.manager.delete(&key).await?;
            debug!(
                "Request to endpoint {} invalidating {} (removed={})",
                self.identity(),
                key,
                removed
            );
        }

        let stored = if self.manager.exists(&key).await? {
            // An entry can expire between the two calls; that reads as a miss.
            self.manager.get::<CachedValue<E::Output>>(&key).await?
        } else {
            None
        };

        let entry = match stored {
            Some(entry) => {
                debug!(
                    "Request to endpoint {} restoring from key={} in cache data",
                    self.identity(),
                    key
                );
                entry
            }
            None => {
                let result = self.endpoint.call(ctx, typed).await?;
                let entry = CachedValue {
                    result,
                    computed_at: self.clock.now(),
                };
                self.manager.set(&key, &entry).await?;
                debug!(
                    "Request to endpoint {} stored fresh result under key={}",
                    self.identity(),
                    key
                );
                entry
            }
        };

        self.annotate_freshness(ctx, entry.computed_at);
        Ok(entry.result)
    }

    fn annotate_freshness(&self, ctx: &RequestContext, computed_at: SystemTime) {
        let Some(expires_at) = computed_at.checked_add(self.policy.ttl()) else {
            return;
        };
        let remaining = match expires_at.duration_since(self.clock.now()) {
            Ok(remaining) if remaining > Duration::ZERO => remaining,
            _ => return,
        };
        if let Ok(value) = HeaderValue::from_str(&format!("max-age={}", remaining.as_secs())) {
            ctx.set_response_header_if_absent(CACHE_CONTROL, value);
        }
    }
}

#[async_trait]
impl<E> Endpoint for CachedEndpoint<E>
where
    E: Endpoint,
    E::Args: Serialize,
{
    type Args = E::Args;
    type Output = E::Output;
    type Error = E::Error;

    fn identity(&self) -> &str {
        self.endpoint.identity()
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        args: E::Args,
    ) -> std::result::Result<E::Output, E::Error> {
        let args = CallArgs::from_serialize(&args)?;
        self.invoke(ctx, args).await
    }
}

pub struct CachedEndpointBuilder<E: Endpoint> {
    endpoint: E,
    validator: Option<ArgumentValidator>,
    policy: Option<CachePolicy>,
    options: Option<CacheOptions>,
    backend: Option<Arc<dyn CacheBackend>>,
    uri: Option<String>,
    clock: Option<Arc<dyn Clock>>,
}

impl<E: Endpoint> CachedEndpointBuilder<E> {
    pub fn validator(mut self, validator: ArgumentValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Use a fully built policy. Takes precedence over [`Self::options`].
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Registration options, applied to the endpoint identity at build time.
    pub fn options(mut self, options: CacheOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Store URI; defaults to the process-wide `cache.uri`.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> crate::Result<CachedEndpoint<E>> {
        let identity = self.endpoint.identity().to_string();
        let validator = self.validator.ok_or_else(|| {
            Error::configuration_with_context(
                "cached endpoint requires an argument validator",
                ErrorContext::new()
                    .with_field_path(identity.clone())
                    .with_source("cached_endpoint"),
            )
        })?;

        let policy = match (self.policy, self.options) {
            (Some(policy), _) => policy,
            (None, Some(options)) => options.apply(identity.clone()),
            (None, None) => CachePolicy::for_endpoint(identity.clone()),
        };

        let backend = match self.backend {
            Some(backend) => backend,
            None => {
                let uri = self
                    .uri
                    .unwrap_or_else(|| crate::settings::global().uri.clone());
                shared_backend(&uri)?
            }
        };

        debug!(
            "Registered cached endpoint {} (namespace={}, enabled={}, ttl={}s, backend={})",
            identity,
            policy.namespace(),
            policy.enabled(),
            policy.ttl().as_secs(),
            backend.name()
        );

        Ok(CachedEndpoint {
            keys: CacheKeyGenerator::new(policy.namespace()),
            manager: CacheManager::new(backend, policy.ttl()),
            endpoint: self.endpoint,
            validator,
            policy,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        })
    }
}
