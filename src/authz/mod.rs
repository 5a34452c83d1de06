//! Authorization: role model, decision tables and the engine that feeds them
//!
//! Precedence, first match wins:
//! - anonymous users are denied
//! - superusers are allowed
//! - admins, then editors, get their role shortcuts
//! - owners may view and comment
//! - explicit, non-expired per-object grants
//! - default deny

mod cache;
mod engine;
mod evaluator;
mod principal;

pub use cache::RequestScope;
pub use engine::{AuthorizationEngine, Target};
pub use evaluator::{
    evaluate, rules_for, Action, Decision, DefaultPolicyEvaluator, Facts, Outcome, PolicyEvaluator, Rule,
};
pub use principal::Principal;
