use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Any synchronized entity (task, log entry, habit, project, review, template, goal)
///
/// Only `id`, `updatedAt` and `isDeleted` are interpreted; every other field
/// is carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub updated_at: i64,
    pub is_deleted: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// New record with a fresh UUID, stamped with the current time
    pub fn new(fields: Map<String, Value>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let mut fields = fields;
        fields
            .entry("createdAt".to_string())
            .or_insert_with(|| Value::from(now));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            updated_at: now,
            is_deleted: false,
            fields,
        }
    }

    /// Marks a local mutation; `updatedAt` never decreases
    pub fn touch(&mut self) {
        let now = chrono::Utc::now().timestamp_millis();
        self.updated_at = now.max(self.updated_at + 1);
    }

    /// Tombstones the record; it stays in the store until purged
    pub fn mark_deleted(&mut self) {
        self.is_deleted = true;
        self.touch();
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn created_at(&self) -> Option<i64> {
        self.fields.get("createdAt").and_then(as_timestamp)
    }

    /// Lenient conversion from a JSON value.
    ///
    /// Accepts numeric ids, a missing `updatedAt` (falls back to `createdAt`,
    /// then 0) and a missing or numeric `isDeleted`.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let mut fields = match value {
            Value::Object(map) => map,
            other => return Err(format!("record is not an object: {}", other)),
        };

        let id = match fields.remove("id") {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => return Err(format!("invalid record id: {}", other)),
            None => return Err("record without id".to_string()),
        };

        let updated_at = fields
            .remove("updatedAt")
            .as_ref()
            .and_then(as_timestamp)
            .or_else(|| fields.get("createdAt").and_then(as_timestamp))
            .unwrap_or(0);

        let is_deleted = match fields.remove("isDeleted") {
            Some(Value::Bool(b)) => b,
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
            _ => false,
        };

        Ok(Self {
            id,
            updated_at,
            is_deleted,
            fields,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), Value::from(self.id.clone()));
        map.insert("updatedAt".to_string(), Value::from(self.updated_at));
        map.insert("isDeleted".to_string(), Value::from(self.is_deleted));
        Value::Object(map)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Record::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Epoch-ms timestamps are integers, but tolerate floats written by JavaScript
fn as_timestamp(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}
