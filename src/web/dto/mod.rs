//! Data Transfer Objects for the HTTP surface.

pub mod request;
pub mod validation;

pub use request::*;
pub use validation::ValidatedJson;
