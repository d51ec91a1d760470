use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub mod export;
pub mod memory;
pub mod records;

pub use export::JsonExportSource;
pub use memory::MemorySource;

/// Flat catalog collections at the top of the document store.
pub mod collections {
    pub const COUNTRIES: &str = "countries";
    pub const GAMES: &str = "games";
    pub const TEAMS: &str = "teams";
    pub const CHALLENGES: &str = "challenges";
    /// Admin-curated competitions (the subset exposed to users).
    pub const COMPETITIONS: &str = "competitions";
    /// Full provider catalog, scanned only by the gap-filler.
    pub const RAW_COMPETITIONS: &str = "raw_competitions";
}

/// Per-save nested collections.
pub mod subcollections {
    pub const CAREER: &str = "career";
    pub const SEASONS: &str = "seasons";
    pub const CHALLENGES: &str = "challenges";
    pub const TROPHIES: &str = "trophies";
}

/// One raw document: id, full path (for log context), and the loosely-typed
/// payload. Typed access goes through `records`.
#[derive(Debug, Clone)]
pub struct SourceDoc {
    pub id: String,
    pub path: String,
    pub data: Value,
}

impl SourceDoc {
    pub fn new(id: impl Into<String>, path: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            data,
        }
    }
}

/// Read-only view of the hierarchical document store. The migration never
/// writes through this interface.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// All documents of a flat top-level catalog.
    async fn collection(&self, name: &str) -> Result<Vec<SourceDoc>>;

    async fn user_ids(&self) -> Result<Vec<String>>;

    async fn saves(&self, uid: &str) -> Result<Vec<SourceDoc>>;

    /// Documents nested under users/{uid}/saves/{save_id}/{name}.
    async fn save_subcollection(
        &self,
        uid: &str,
        save_id: &str,
        name: &str,
    ) -> Result<Vec<SourceDoc>>;
}
