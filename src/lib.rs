//! # endpoint-cache
//!
//! Response caching for asynchronous HTTP endpoint handlers.
//!
//! ## Overview
//!
//! A cached endpoint memoizes the successful result of its handler, keyed
//! by the handler's validated arguments. The inbound `cache-control`
//! request header steers each call:
//!
//! - `no-store`: the store is neither read nor written;
//! - `no-cache`: any stored entry is dropped, then recomputed and stored;
//! - anything else (or no header): normal read-through.
//!
//! Fresh results are annotated with `Cache-Control: max-age=N` on the
//! response, unless upstream logic already set that header.
//!
//! ## Quick Start
//!
//! ```rust
//! use endpoint_cache::{endpoint_cache, endpoint_fn, CallArgs, Endpoint, RequestContext};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, schemars::JsonSchema)]
//! struct Lookup {
//!     user_id: u64,
//! }
//!
//! # tokio_test::block_on(async {
//! let lookup = endpoint_cache(endpoint_fn(
//!     "users::lookup",
//!     |_ctx: RequestContext, args: Lookup| async move {
//!         Ok::<_, endpoint_cache::Error>(format!("user-{}", args.user_id))
//!     },
//! ))?;
//!
//! let ctx = RequestContext::empty();
//! let name = lookup.invoke(&ctx, CallArgs::new().arg(7)).await?;
//! assert_eq!(name, "user-7");
//! assert!(ctx.response_header("cache-control").is_some());
//!
//! // The wrapper is itself an endpoint with the same signature.
//! let again = lookup.call(&RequestContext::empty(), Lookup { user_id: 7 }).await?;
//! assert_eq!(again, "user-7");
//! # Ok::<(), endpoint_cache::Error>(())
//! # }).unwrap();
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`endpoint`] | Endpoint trait and the caching wrapper |
//! | [`policy`] | Per-endpoint policy and registration options |
//! | [`validate`] | Argument binding, schema validation, canonical form |
//! | [`cache`] | Keys, stores and the per-endpoint cache manager |
//! | [`context`] | Per-request headers |
//! | [`directive`] | Request `cache-control` directive |
//! | [`settings`] | Process-wide `cache.ttl` / `cache.uri` |
//! | [`clock`] | Time source |

pub mod cache;
pub mod clock;
pub mod context;
pub mod directive;
pub mod endpoint;
pub mod policy;
pub mod settings;
pub mod validate;

// Re-export main types for convenience
pub use context::RequestContext;
pub use directive::Directive;
pub use endpoint::{
    endpoint_cache, endpoint_fn, CachedEndpoint, CachedEndpointBuilder, CachedValue, Endpoint,
    FnEndpoint,
};
pub use policy::{cache_config, disable_cache, CacheOptions, CachePolicy};
pub use validate::{ArgumentRecord, ArgumentValidator, CallArgs, Param};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
