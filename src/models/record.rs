//! Record and sub-item data structures.
//!
//! A [`Record`] is one tracked upstream entity (a permit or a plan). Its
//! scalar fields are kept as an opaque JSON bag; only the fields and lists
//! declared in the diff configuration are ever interpreted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// One fetched upstream entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord")]
pub struct Record {
    id: String,

    /// Scalar fields, type-erased
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,

    /// Named sub-lists, each ordered most-recent-first as fetched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lists: BTreeMap<String, Vec<SubItem>>,

    /// Annotation attached by the optional classifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
}

impl Record {
    /// Create a record with no fields or lists.
    ///
    /// Fails when the id is empty after trimming.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(AppError::invalid_record("record id is empty"));
        }
        Ok(Self {
            id,
            fields: Map::new(),
            lists: BTreeMap::new(),
            classification: None,
        })
    }

    /// The record's stable identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Builder-style scalar field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder-style sub-list setter.
    pub fn with_list(mut self, name: impl Into<String>, items: Vec<SubItem>) -> Self {
        self.lists.insert(name.into(), items);
        self
    }

    /// Look up a scalar by dotted path, e.g. `general_info.status`.
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Items of a named sub-list; a missing list is empty.
    pub fn list(&self, name: &str) -> &[SubItem] {
        self.lists.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Accepts ids serialized as strings or numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Deserialize)]
struct RawRecord {
    id: Option<RawId>,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    lists: BTreeMap<String, Vec<SubItem>>,
    #[serde(default)]
    classification: Option<Classification>,
}

impl TryFrom<RawRecord> for Record {
    type Error = AppError;

    fn try_from(raw: RawRecord) -> Result<Self> {
        let id = match raw.id {
            Some(RawId::Text(s)) => s,
            Some(RawId::Number(n)) => n.to_string(),
            None => return Err(AppError::invalid_record("record has no id")),
        };
        let mut record = Record::new(id)?;
        record.fields = raw.fields;
        record.lists = raw.lists;
        record.classification = raw.classification;
        Ok(record)
    }
}

/// An entry within a record's sub-list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubItem(Map<String, Value>);

impl SubItem {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Identity of this item under the given key fields.
    ///
    /// When no key field is present (or no key is declared) the full
    /// payload is the identity.
    pub fn identity(&self, key: &[String]) -> ItemKey {
        let values: Vec<&Value> = key
            .iter()
            .map(|k| self.0.get(k).unwrap_or(&Value::Null))
            .collect();

        if values.iter().all(|v| v.is_null()) {
            return ItemKey(format!("payload:{}", Value::Object(self.0.clone())));
        }
        ItemKey(format!("key:{}", serde_json::json!(values)))
    }

    /// Two items are the same entry when their identities match, even if
    /// other payload fields (such as a status) have changed in place.
    pub fn same_entry(&self, other: &SubItem, key: &[String]) -> bool {
        self.identity(key) == other.identity(key)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SubItem {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Comparable identity of a [`SubItem`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey(String);

/// Relevance annotation produced by an external classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}
