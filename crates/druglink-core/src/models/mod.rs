//! Domain models for the druglink system.

mod expansion;
mod formulary;
mod ingredient;

pub use expansion::*;
pub use formulary::*;
pub use ingredient::*;
