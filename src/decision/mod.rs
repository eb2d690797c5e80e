/// Rule/fallback composition into governed decisions
pub mod engine;
/// Decision data model
pub mod model;
/// Deterministic decision rules
pub mod rules;
/// Semantic recovery and bounded LLM fallback
pub mod semantic;

pub use engine::DecisionEngine;
pub use model::{Decision, DecisionState, LlmReason, SemanticEvidence};
pub use rules::{RuleEngine, RuleResult};
pub use semantic::{FallbackResolver, DECISION_COLLECTION};
