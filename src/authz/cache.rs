use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use super::engine::{AuthorizationEngine, Target};
use super::evaluator::Action;

/// Memoizes decisions for one user over the life of one request.
///
/// Grants do not change mid-request, so a scope must never be reused across
/// requests.
#[derive(Debug)]
pub struct RequestScope {
    engine: AuthorizationEngine,
    user: Option<Uuid>,
    decisions: Mutex<HashMap<(Action, Target), bool>>,
}

impl RequestScope {
    pub fn new(engine: AuthorizationEngine, user: Option<Uuid>) -> Self {
        Self {
            engine,
            user,
            decisions: Mutex::new(HashMap::new()),
        }
    }

    pub fn user(&self) -> Option<Uuid> {
        self.user
    }

    pub async fn can(&self, action: Action, target: Target) -> bool {
        let key = (action, target);
        if let Some(hit) = self.cached(&key) {
            return hit;
        }

        let allowed = self.engine.can(self.user, action, target).await;
        if let Ok(mut decisions) = self.decisions.lock() {
            decisions.insert(key, allowed);
        }
        allowed
    }

    /// Number of memoized decisions.
    pub fn len(&self) -> usize {
        self.decisions.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, key: &(Action, Target)) -> Option<bool> {
        self.decisions.lock().ok().and_then(|d| d.get(key).copied())
    }
}
