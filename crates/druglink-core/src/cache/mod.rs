//! In-process caches.

mod expansion;
mod ttl;

pub use expansion::*;
pub use ttl::TtlCache;
