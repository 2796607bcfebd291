//! HTTP API handlers for callgate-ingest

pub mod health;
pub mod status;
pub mod webhooks;

pub use health::health_routes;
pub use status::status_routes;
pub use webhooks::webhook_routes;
