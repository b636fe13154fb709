//! Evidence gate: intent classification plus pre- and post-LLM guardrails.
//!
//! Factual claims must be grounded in retrieved evidence. The gate blocks
//! ungrounded fact-seeking queries before generation and filters ungrounded
//! assertions (years, generations, reign names) out of generated text.

pub mod gate;
pub mod intent;

pub use gate::{EvidenceGate, GateResult};
pub use intent::{
    IntentClassifier, IntentContext, IntentLabel, IntentResult, LlmIntentClassifier,
    RuleIntentClassifier,
};
