use std::sync::Arc;

use crate::source::SourceStore;
use crate::store::TargetStore;

/// Everything a migration step needs, constructed once in `main` and passed
/// into every step. Migrators hold no global state, so single steps can be
/// run and tested in isolation.
#[derive(Clone)]
pub struct MigrationContext {
    pub source: Arc<dyn SourceStore>,
    pub target: Arc<dyn TargetStore>,
}

impl MigrationContext {
    pub fn new(source: Arc<dyn SourceStore>, target: Arc<dyn TargetStore>) -> Self {
        Self { source, target }
    }
}
