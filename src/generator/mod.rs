//! Custom skin generation from texture URLs.

pub mod mineskin;
mod service;

pub use mineskin::{GeneratorApi, JobStatus, MineSkinClient};
pub use service::{GeneratorConfig, SkinGenerator, looks_like_url, normalize_source};
