use super::{Parameter, Question, QuestionCatalog};
use crate::error::CatalogError;
use crate::model::Language;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS questions (
    code        INTEGER PRIMARY KEY,
    title       TEXT NOT NULL,
    description TEXT NOT NULL,
    entry_point TEXT NOT NULL,
    templates   TEXT NOT NULL,
    parameters  TEXT NOT NULL
)";

/// SQLite-backed question store. Templates and parameters are stored as JSON columns.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let conn = Connection::open(path).map_err(|e| CatalogError::storage("open", e))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory().map_err(|e| CatalogError::storage("open", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, CatalogError> {
        conn.execute(SCHEMA, [])
            .map_err(|e| CatalogError::storage("migrate", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn encode(question: &Question) -> Result<(String, String), CatalogError> {
        let templates = serde_json::to_string(&question.templates)
            .map_err(|e| CatalogError::storage("encode", e))?;
        let parameters = serde_json::to_string(&question.parameters)
            .map_err(|e| CatalogError::storage("encode", e))?;
        Ok((templates, parameters))
    }
}

type RawRow = (i64, String, String, String, String, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode(raw: RawRow) -> Result<Question, CatalogError> {
    let (code, title, description, entry_point, templates, parameters) = raw;
    let templates: BTreeMap<Language, String> =
        serde_json::from_str(&templates).map_err(|e| CatalogError::storage("decode", e))?;
    let parameters: Vec<Parameter> =
        serde_json::from_str(&parameters).map_err(|e| CatalogError::storage("decode", e))?;
    Ok(Question {
        code,
        title,
        description,
        entry_point,
        templates,
        parameters,
    })
}

const SELECT: &str =
    "SELECT code, title, description, entry_point, templates, parameters FROM questions";

#[async_trait]
impl QuestionCatalog for SqliteCatalog {
    async fn list(&self) -> Result<Vec<Question>, CatalogError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("{} ORDER BY code", SELECT))
            .map_err(|e| CatalogError::storage("list", e))?;
        let rows = stmt
            .query_map([], read_row)
            .map_err(|e| CatalogError::storage("list", e))?;

        let mut questions = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| CatalogError::storage("list", e))?;
            questions.push(decode(raw)?);
        }
        Ok(questions)
    }

    async fn get(&self, code: i64) -> Result<Question, CatalogError> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(&format!("{} WHERE code = ?1", SELECT), params![code], read_row)
            .optional()
            .map_err(|e| CatalogError::storage("get", e))?;
        match raw {
            Some(raw) => decode(raw),
            None => Err(CatalogError::NotFound(code)),
        }
    }

    async fn create(&self, question: Question) -> Result<Question, CatalogError> {
        question.validate()?;
        let (templates, parameters) = Self::encode(&question)?;
        let conn = self.conn.lock();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO questions (code, title, description, entry_point, templates, parameters)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    question.code,
                    question.title,
                    question.description,
                    question.entry_point,
                    templates,
                    parameters
                ],
            )
            .map_err(|e| CatalogError::storage("create", e))?;
        if inserted == 0 {
            return Err(CatalogError::Conflict(question.code));
        }
        Ok(question)
    }

    async fn update(&self, code: i64, mut question: Question) -> Result<Question, CatalogError> {
        question.code = code;
        question.validate()?;
        let (templates, parameters) = Self::encode(&question)?;
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE questions SET title = ?2, description = ?3, entry_point = ?4,
                 templates = ?5, parameters = ?6 WHERE code = ?1",
                params![
                    code,
                    question.title,
                    question.description,
                    question.entry_point,
                    templates,
                    parameters
                ],
            )
            .map_err(|e| CatalogError::storage("update", e))?;
        if changed == 0 {
            return Err(CatalogError::NotFound(code));
        }
        Ok(question)
    }

    async fn delete(&self, code: i64) -> Result<(), CatalogError> {
        let conn = self.conn.lock();
        let removed = conn
            .execute("DELETE FROM questions WHERE code = ?1", params![code])
            .map_err(|e| CatalogError::storage("delete", e))?;
        if removed == 0 {
            return Err(CatalogError::NotFound(code));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ParameterType, ScalarType};

    fn two_sum() -> Question {
        let mut templates = BTreeMap::new();
        templates.insert(Language::Go, "func Add(a int, b int) int {\n}\n".to_string());
        Question {
            code: 7,
            title: "Add".into(),
            description: "Sum two numbers".into(),
            entry_point: "Add".into(),
            templates,
            parameters: vec![
                Parameter {
                    name: "a".into(),
                    kind: ParameterType::Scalar(ScalarType::Int),
                    position: 0,
                },
                Parameter {
                    name: "b".into(),
                    kind: ParameterType::Scalar(ScalarType::Int),
                    position: 1,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_round_trips_json_columns() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.create(two_sum()).await.unwrap();

        let loaded = catalog.get(7).await.unwrap();
        assert_eq!(loaded, two_sum());
        assert_eq!(catalog.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_update_and_delete() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.create(two_sum()).await.unwrap();
        assert!(matches!(
            catalog.create(two_sum()).await,
            Err(CatalogError::Conflict(7))
        ));

        let mut renamed = two_sum();
        renamed.title = "Addition".into();
        catalog.update(7, renamed).await.unwrap();
        assert_eq!(catalog.get(7).await.unwrap().title, "Addition");
        assert!(matches!(
            catalog.update(8, two_sum()).await,
            Err(CatalogError::NotFound(8))
        ));

        catalog.delete(7).await.unwrap();
        assert!(matches!(catalog.get(7).await, Err(CatalogError::NotFound(7))));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("questions.db");
        {
            let catalog = SqliteCatalog::open(&path).unwrap();
            catalog.create(two_sum()).await.unwrap();
        }
        let catalog = SqliteCatalog::open(&path).unwrap();
        assert_eq!(catalog.get(7).await.unwrap().entry_point, "Add");
    }
}
