pub mod client;
pub mod models;
pub mod parse;
pub mod prompts;
#[cfg(test)]
pub(crate) mod testing;

pub use client::{
    AnthropicClient, GenerationRequest, GenerationResponse, StopReason, TextGenerator,
};
pub use models::{Model, Models, Usage};
pub use parse::{decode_array, decode_object, DecodeHint, Decoded};
