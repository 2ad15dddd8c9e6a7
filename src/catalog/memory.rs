use super::{Question, QuestionCatalog};
use crate::error::CatalogError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-process catalog, used when no database path is configured
#[derive(Default)]
pub struct MemoryCatalog {
    store: RwLock<BTreeMap<i64, Question>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_questions(questions: impl IntoIterator<Item = Question>) -> Self {
        let store = questions.into_iter().map(|q| (q.code, q)).collect();
        Self {
            store: RwLock::new(store),
        }
    }
}

#[async_trait]
impl QuestionCatalog for MemoryCatalog {
    async fn list(&self) -> Result<Vec<Question>, CatalogError> {
        Ok(self.store.read().values().cloned().collect())
    }

    async fn get(&self, code: i64) -> Result<Question, CatalogError> {
        self.store
            .read()
            .get(&code)
            .cloned()
            .ok_or(CatalogError::NotFound(code))
    }

    async fn create(&self, question: Question) -> Result<Question, CatalogError> {
        question.validate()?;
        let mut store = self.store.write();
        if store.contains_key(&question.code) {
            return Err(CatalogError::Conflict(question.code));
        }
        store.insert(question.code, question.clone());
        Ok(question)
    }

    async fn update(&self, code: i64, mut question: Question) -> Result<Question, CatalogError> {
        question.code = code;
        question.validate()?;
        let mut store = self.store.write();
        match store.get_mut(&code) {
            Some(existing) => {
                *existing = question.clone();
                Ok(question)
            }
            None => Err(CatalogError::NotFound(code)),
        }
    }

    async fn delete(&self, code: i64) -> Result<(), CatalogError> {
        self.store
            .write()
            .remove(&code)
            .map(|_| ())
            .ok_or(CatalogError::NotFound(code))
    }
}
