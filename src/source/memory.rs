use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use super::{SourceDoc, SourceStore};

/// In-memory source store used by tests and fixture seeding. Insertion order
/// is preserved so runs are deterministic.
#[derive(Default)]
pub struct MemorySource {
    catalogs: IndexMap<String, IndexMap<String, Value>>,
    // uid -> save_id -> (save doc, subcollection name -> doc id -> doc)
    users: IndexMap<String, IndexMap<String, SaveFixture>>,
}

#[derive(Default)]
struct SaveFixture {
    data: Value,
    subs: IndexMap<String, IndexMap<String, Value>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_doc(&mut self, collection: &str, id: &str, data: Value) {
        self.catalogs
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
    }

    pub fn put_user(&mut self, uid: &str) {
        self.users.entry(uid.to_string()).or_default();
    }

    pub fn put_save(&mut self, uid: &str, save_id: &str, data: Value) {
        self.put_user(uid);
        let saves = self.users.get_mut(uid).unwrap();
        saves.entry(save_id.to_string()).or_default().data = data;
    }

    pub fn put_save_doc(&mut self, uid: &str, save_id: &str, sub: &str, id: &str, data: Value) {
        let fixture = self
            .users
            .entry(uid.to_string())
            .or_default()
            .entry(save_id.to_string())
            .or_default();
        fixture
            .subs
            .entry(sub.to_string())
            .or_default()
            .insert(id.to_string(), data);
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn collection(&self, name: &str) -> Result<Vec<SourceDoc>> {
        Ok(self
            .catalogs
            .get(name)
            .map(|docs| {
                docs.iter()
                    .map(|(id, v)| SourceDoc::new(id.clone(), format!("{name}/{id}"), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn user_ids(&self) -> Result<Vec<String>> {
        Ok(self.users.keys().cloned().collect())
    }

    async fn saves(&self, uid: &str) -> Result<Vec<SourceDoc>> {
        Ok(self
            .users
            .get(uid)
            .map(|saves| {
                saves
                    .iter()
                    .map(|(id, f)| {
                        SourceDoc::new(
                            id.clone(),
                            format!("users/{uid}/saves/{id}"),
                            f.data.clone(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_subcollection(
        &self,
        uid: &str,
        save_id: &str,
        name: &str,
    ) -> Result<Vec<SourceDoc>> {
        Ok(self
            .users
            .get(uid)
            .and_then(|saves| saves.get(save_id))
            .and_then(|f| f.subs.get(name))
            .map(|docs| {
                docs.iter()
                    .map(|(id, v)| {
                        SourceDoc::new(
                            id.clone(),
                            format!("users/{uid}/saves/{save_id}/{name}/{id}"),
                            v.clone(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
