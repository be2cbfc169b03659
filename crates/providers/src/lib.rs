pub mod circuit_breaker;
pub mod openai_compatible;
pub mod traits;

pub use circuit_breaker::CircuitBreaker;
pub use openai_compatible::{OpenAICompatibleProvider, ProviderSettings};
pub use traits::{GenerateResponse, LLMProvider, Message, ProviderError};
