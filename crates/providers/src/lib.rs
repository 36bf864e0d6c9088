//! LLM transport, key rotation, model discovery, and performance tracking
//! (spec §4.1-§4.4): C1 `ModelRegistry`, C2 `ProviderKeyManager`,
//! C3 `PerformanceTracker`, C4 `LlmProvider`.

pub mod keys;
pub mod openai_compat;
pub mod perf;
pub mod registry;
mod sse;
pub mod traits;

pub use keys::{LeaseToken, ProviderKeyManager};
pub use openai_compat::OpenAiCompatProvider;
pub use perf::PerformanceTracker;
pub use registry::{ModelInfo, ModelRegistry, ModelTier};
pub use traits::{ChatRequest, LlmProvider};
