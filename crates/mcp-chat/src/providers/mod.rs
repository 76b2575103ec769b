pub mod base;
pub mod errors;
pub mod factory;
pub mod openai;
pub mod testprovider;

pub use base::{FinishReason, GenerationChunk, GenerationStream, Provider, Usage};
pub use errors::ProviderError;
pub use factory::{OpenAiCompatibleFactory, ProviderFactory, StaticProviderFactory};
