//! Field mapping applied when an analysis is committed into document metadata.
//!
//! A mapping is an ordered list of `result key -> metadata key` rules, plus an
//! optional `nest` key under which the whole result object is stored. Loaded
//! from TOML:
//!
//! ```toml
//! nest = "analysis"
//!
//! [fields]
//! entities = "entities"
//! relations = "knowledge_relations"
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(default)]
    pub fields: Vec<(String, String)>,
    #[serde(default)]
    pub nest: Option<String>,
}

/// On-disk form. Rules come in as a table, in file order.
#[derive(Deserialize)]
struct MappingFile {
    #[serde(default)]
    fields: toml::Table,
    #[serde(default)]
    nest: Option<String>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `from` in the result to `to` in metadata.
    pub fn map(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.fields.push((from.into(), to.into()));
        self
    }

    /// Same key on both sides.
    pub fn keep(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.map(key.clone(), key)
    }

    /// Store the entire result object under `key`.
    pub fn nest(mut self, key: impl Into<String>) -> Self {
        self.nest = Some(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.nest.is_none()
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: MappingFile =
            toml::from_str(s).map_err(|e| Error::Config(format!("bad field mapping: {e}")))?;

        let mut fields = Vec::with_capacity(file.fields.len());
        for (from, to) in file.fields {
            let to = to.as_str().ok_or_else(|| {
                Error::Config(format!("field mapping for {from:?} must be a string"))
            })?;
            fields.push((from, to.to_string()));
        }

        Ok(Self {
            fields,
            nest: file.nest,
        })
    }

    /// Merge `result` into `metadata`, returning the new metadata object.
    ///
    /// Source keys missing from the result are skipped. A non-object result can
    /// only be committed through `nest`.
    pub fn merge(&self, metadata: &Value, result: &Value) -> Result<Value> {
        let mut merged: Map<String, Value> = match metadata {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(Error::Other(format!(
                    "document metadata is not an object: {other}"
                )));
            }
        };

        if !self.fields.is_empty() {
            let Value::Object(source) = result else {
                return Err(Error::Other(
                    "analysis result is not an object; use a nest key to commit it".to_string(),
                ));
            };
            for (from, to) in &self.fields {
                if let Some(value) = source.get(from) {
                    merged.insert(to.clone(), value.clone());
                }
            }
        }

        if let Some(ref key) = self.nest {
            merged.insert(key.clone(), result.clone());
        }

        Ok(Value::Object(merged))
    }
}
