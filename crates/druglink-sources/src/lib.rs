//! Druglink external sources.
//!
//! Matches formulary records against two external drug databases:
//!
//! - [`label`]: an openFDA-style structured label database, queried per term
//! - [`authorization`]: the EU authorization database, downloaded in bulk
//!
//! Both sit behind [`SourceBackend`] and are driven by an [`ExternalMatcher`], which
//! owns the fallback chain, the lookup caches, a [`RateLimiter`] and a
//! [`HealthMonitor`]. [`ClinicalDataResolver`] runs both matchers for one record.
//!
//! Failures never surface as errors past the matcher: a source that is down,
//! rate limited or slow simply produces a not-found result.

pub mod aggregate;
pub mod authorization;
pub mod backend;
pub mod config;
pub mod error;
pub mod health;
pub mod label;
pub mod matcher;
pub mod models;
pub mod rate_limit;

pub use aggregate::ClinicalDataResolver;
pub use authorization::{AuthorizationBackend, AuthorizationDataset, AuthorizationRecord};
pub use backend::{QueryField, SourceBackend, SourceRecord};
pub use config::SourceConfig;
pub use error::{SourceError, SourceResult};
pub use health::{Availability, HealthMonitor};
pub use label::{LabelBackend, LabelContent, LabelDocument};
pub use matcher::ExternalMatcher;
pub use models::{
    ClinicalDataRecord, ExternalMatchResult, IngredientMatch, MatchMethod, MultiIngredientResult,
};
pub use rate_limit::{RateLimitStatus, RateLimiter};
