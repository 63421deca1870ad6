//! HTTP API handlers for onboard-api
//!
//! Document pre-fill and application endpoints live under `/api/v2`;
//! the banner and health check sit at the root.

pub mod applications;
pub mod documents;
pub mod health;

pub use applications::application_routes;
pub use documents::document_routes;
pub use health::health_routes;
