//! Reasoning backend implementations.

pub mod openai;

pub use openai::OpenAiBackend;
