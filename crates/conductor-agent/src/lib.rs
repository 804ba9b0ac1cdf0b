pub mod backends;
pub mod config;
pub mod executor;
pub mod failover;
pub mod reasoner;

pub use backends::openai::OpenAiBackend;
pub use backends::{from_config, LlmBackend};
pub use config::{LlmProvider, ModelConfig};
pub use executor::LlmAgent;
pub use failover::{FailoverBackend, RetryPolicy};
pub use reasoner::{parse_breakdown, LlmReasoner};
