use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{collections, SourceDoc, SourceStore};

/// Document-store export on disk: one JSON dump per top-level collection,
/// each a single object keyed by document id. `users.json` carries the
/// per-save subcollections inline:
///
/// ```json
/// { "<uid>": { "saves": { "<saveId>": {
///     "game": "...", "career": { "<id>": {...} }, "seasons": {...},
///     "challenges": {...}, "trophies": {...} } } } }
/// ```
pub struct JsonExportSource {
    catalogs: HashMap<String, Value>,
    users: Value,
}

fn load_dump(dir: &Path, name: &str) -> Result<Value> {
    let path: PathBuf = dir.join(format!("{name}.json"));
    if !path.exists() {
        warn!(collection = name, ?path, "export file missing; treating collection as empty");
        return Ok(Value::Object(Default::default()));
    }
    let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let v: Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    if !v.is_object() {
        anyhow::bail!("{} is not a JSON object keyed by document id", path.display());
    }
    Ok(v)
}

fn docs_of(value: &Value, path_prefix: &str) -> Vec<SourceDoc> {
    match value {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| v.is_object())
            .map(|(id, v)| SourceDoc::new(id.clone(), format!("{path_prefix}/{id}"), v.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

impl JsonExportSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            anyhow::bail!("source export dir {} does not exist", dir.display());
        }
        let mut catalogs = HashMap::new();
        for name in [
            collections::COUNTRIES,
            collections::GAMES,
            collections::TEAMS,
            collections::CHALLENGES,
            collections::COMPETITIONS,
            collections::RAW_COMPETITIONS,
        ] {
            catalogs.insert(name.to_string(), load_dump(dir, name)?);
        }
        let users = load_dump(dir, "users")?;
        info!(
            dir = %dir.display(),
            users = users.as_object().map(|m| m.len()).unwrap_or(0),
            "source export loaded"
        );
        Ok(Self { catalogs, users })
    }

    fn save_value(&self, uid: &str, save_id: &str) -> Option<&Value> {
        self.users.get(uid)?.get("saves")?.get(save_id)
    }
}

#[async_trait]
impl SourceStore for JsonExportSource {
    async fn collection(&self, name: &str) -> Result<Vec<SourceDoc>> {
        let value = self
            .catalogs
            .get(name)
            .with_context(|| format!("unknown source collection `{name}`"))?;
        Ok(docs_of(value, name))
    }

    async fn user_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .users
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn saves(&self, uid: &str) -> Result<Vec<SourceDoc>> {
        let saves = self
            .users
            .get(uid)
            .and_then(|u| u.get("saves"))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(docs_of(&saves, &format!("users/{uid}/saves")))
    }

    async fn save_subcollection(
        &self,
        uid: &str,
        save_id: &str,
        name: &str,
    ) -> Result<Vec<SourceDoc>> {
        let sub = self
            .save_value(uid, save_id)
            .and_then(|s| s.get(name))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(docs_of(
            &sub,
            &format!("users/{uid}/saves/{save_id}/{name}"),
        ))
    }
}
