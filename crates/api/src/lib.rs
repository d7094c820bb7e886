//! `loreforge-api` — HTTP surface for the task engine.
//!
//! Thin by design: submission, status reads, the SSE progress stream, and the
//! retry/stop control endpoints. Authentication and tenant routing live in
//! front of this service.

pub mod app;
