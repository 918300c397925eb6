//! Core data models for the media gateway.
//!
//! Buckets and records describe where payloads live; the reply types are
//! the JSON shapes exchanged over HTTP.

pub mod bucket;
pub mod media;
pub mod record;
pub mod reply;
