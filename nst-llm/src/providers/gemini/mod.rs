//! Google Gemini provider

pub mod client;
pub mod generator;
pub mod types;

pub use client::GeminiClient;
pub use generator::{parse_chapters, parse_lesson, GeminiContentProvider};
