//! Content generation provider implementations.

pub mod gemini;

pub use gemini::{GeminiClient, GeminiContentProvider};
