//! Time-bounded cache with stale-while-revalidate.
//!
//! Entries move through three phases by age:
//!
//! | Age                         | Phase   | Read behaviour                          |
//! |-----------------------------|---------|-----------------------------------------|
//! | `< fresh_ttl`               | fresh   | served, no fetch                        |
//! | `fresh_ttl ..< expiry_ttl`  | stale   | served, one background revalidation     |
//! | `>= expiry_ttl`             | expired | discarded, fetched before returning     |
//!
//! The tracker keeps manufacturer fleets here so the catalog is not re-read
//! on every sync.

mod ttl;

pub use ttl::{CacheStats, Cached, Freshness, TtlCache};
