//! Question catalog: the records the execution pipeline resolves entry points
//! and declared parameter types from.

use crate::error::CatalogError;
use crate::model::Language;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCatalog;
pub use sqlite::SqliteCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Int,
    Double,
    Float,
    String,
    Char,
    Bool,
}

/// Declared type of an entry-point parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    Scalar(ScalarType),
    Array(ScalarType),
}

impl ScalarType {
    fn as_str(&self) -> &'static str {
        match self {
            ScalarType::Int => "int",
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::String => "string",
            ScalarType::Char => "char",
            ScalarType::Bool => "bool",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ScalarType::Int => value.is_i64() || value.is_u64(),
            ScalarType::Double | ScalarType::Float => value.is_number(),
            ScalarType::String => value.is_string(),
            ScalarType::Char => value
                .as_str()
                .map(|s| s.chars().count() == 1)
                .unwrap_or(false),
            ScalarType::Bool => value.is_boolean(),
        }
    }
}

impl ParameterType {
    /// Whether a JSON argument has the shape this parameter declares
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParameterType::Scalar(scalar) => scalar.accepts(value),
            ParameterType::Array(scalar) => value
                .as_array()
                .map(|items| items.iter().all(|item| scalar.accepts(item)))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterType::Scalar(s) => f.write_str(s.as_str()),
            ParameterType::Array(s) => write!(f, "{}[]", s.as_str()),
        }
    }
}

impl FromStr for ParameterType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, array) = match s.strip_suffix("[]") {
            Some(base) => (base, true),
            None => (s, false),
        };
        let scalar = match base {
            "int" => ScalarType::Int,
            "double" => ScalarType::Double,
            "float" => ScalarType::Float,
            "string" => ScalarType::String,
            "char" => ScalarType::Char,
            "bool" => ScalarType::Bool,
            _ => {
                return Err(CatalogError::Invalid(format!(
                    "unknown parameter type '{}'",
                    s
                )))
            }
        };
        Ok(if array {
            ParameterType::Array(scalar)
        } else {
            ParameterType::Scalar(scalar)
        })
    }
}

impl Serialize for ParameterType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ParameterType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub code: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub entry_point: String,
    #[serde(default)]
    pub templates: BTreeMap<Language, String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl Question {
    /// Declared parameters in call order
    pub fn ordered_parameters(&self) -> Vec<Parameter> {
        let mut params = self.parameters.clone();
        params.sort_by_key(|p| p.position);
        params
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.title.trim().is_empty() {
            return Err(CatalogError::Invalid("title cannot be empty".to_string()));
        }
        if !is_identifier(&self.entry_point) {
            return Err(CatalogError::Invalid(format!(
                "entry point '{}' is not a valid identifier",
                self.entry_point
            )));
        }

        let mut positions = HashSet::new();
        let mut names = HashSet::new();
        for param in &self.parameters {
            if !is_identifier(&param.name) {
                return Err(CatalogError::Invalid(format!(
                    "parameter name '{}' is not a valid identifier",
                    param.name
                )));
            }
            if !positions.insert(param.position) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate parameter position {}",
                    param.position
                )));
            }
            if !names.insert(param.name.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate parameter name '{}'",
                    param.name
                )));
            }
        }
        Ok(())
    }
}

pub fn is_identifier(name: &str) -> bool {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
        .is_match(name)
}

/// Store of questions keyed by their integer code
#[async_trait]
pub trait QuestionCatalog: Send + Sync {
    async fn list(&self) -> Result<Vec<Question>, CatalogError>;
    async fn get(&self, code: i64) -> Result<Question, CatalogError>;
    async fn create(&self, question: Question) -> Result<Question, CatalogError>;
    async fn update(&self, code: i64, question: Question) -> Result<Question, CatalogError>;
    async fn delete(&self, code: i64) -> Result<(), CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameter_type_parsing() {
        assert_eq!(
            "int".parse::<ParameterType>().unwrap(),
            ParameterType::Scalar(ScalarType::Int)
        );
        assert_eq!(
            "char[]".parse::<ParameterType>().unwrap(),
            ParameterType::Array(ScalarType::Char)
        );
        assert!("long".parse::<ParameterType>().is_err());
        assert_eq!(ParameterType::Array(ScalarType::Double).to_string(), "double[]");
    }

    #[test]
    fn test_argument_shapes() {
        let int = ParameterType::Scalar(ScalarType::Int);
        assert!(int.accepts(&json!(3)));
        assert!(!int.accepts(&json!(3.5)));
        assert!(!int.accepts(&json!("3")));

        let double = ParameterType::Scalar(ScalarType::Double);
        assert!(double.accepts(&json!(3)));
        assert!(double.accepts(&json!(2.5)));

        let ch = ParameterType::Scalar(ScalarType::Char);
        assert!(ch.accepts(&json!("x")));
        assert!(!ch.accepts(&json!("xy")));

        let strings = ParameterType::Array(ScalarType::String);
        assert!(strings.accepts(&json!(["a", "b"])));
        assert!(strings.accepts(&json!([])));
        assert!(!strings.accepts(&json!(["a", 1])));
        assert!(!strings.accepts(&json!("a")));
    }

    #[test]
    fn test_question_json_shape() {
        let question: Question = serde_json::from_value(json!({
            "code": 1,
            "title": "Two sum",
            "entry_point": "add",
            "templates": { "python": "def add(a, b):\n    pass\n" },
            "parameters": [
                { "name": "b", "type": "int", "position": 1 },
                { "name": "a", "type": "int", "position": 0 }
            ]
        }))
        .unwrap();

        assert!(question.validate().is_ok());
        let ordered: Vec<_> = question
            .ordered_parameters()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(ordered, vec!["a", "b"]);
        assert!(question.templates.contains_key(&Language::Python));
    }

    #[test]
    fn test_validation_rejects_bad_identifiers_and_positions() {
        let mut question = Question {
            code: 2,
            title: "t".into(),
            description: String::new(),
            entry_point: "not valid".into(),
            templates: BTreeMap::new(),
            parameters: vec![],
        };
        assert!(question.validate().is_err());

        question.entry_point = "solve".into();
        question.parameters = vec![
            Parameter {
                name: "a".into(),
                kind: ParameterType::Scalar(ScalarType::Int),
                position: 0,
            },
            Parameter {
                name: "b".into(),
                kind: ParameterType::Scalar(ScalarType::Int),
                position: 0,
            },
        ];
        assert!(matches!(question.validate(), Err(CatalogError::Invalid(_))));
    }
}
