pub mod ollama;
pub mod openai_compatible;
pub mod traits;
mod wire;

pub use ollama::OllamaEndpoint;
pub use openai_compatible::OpenAICompatibleEndpoint;
pub use traits::{
    ChatRequest, Fragment, FragmentStream, Message, ModelEndpoint, ProviderError, Role, ToolCall,
};
