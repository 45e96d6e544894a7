//! Fix generation: prompt building, response parsing, validation and the
//! retrying agent that ties them together.

pub mod agent;
pub mod parse;
pub mod prompt;
pub mod validate;

pub use agent::{AttemptTrace, FixAgent};
pub use validate::{ValidationResult, validate};
