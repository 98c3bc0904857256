/// Typed document values
///
/// Mirrors the Firestore value model so that every backend orders and
/// compares values the same way.
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::StoreError;

/// Field map of a document or of a nested map value
pub type Fields = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Array(Vec<Value>),
    Map(Fields),
}

impl Value {
    /// Rank of the value type in the cross-type sort order
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Double(_) => 2,
            Value::Timestamp(_) => 3,
            Value::String(_) => 4,
            Value::Array(_) => 5,
            Value::Map(_) => 6,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Timestamp(_) => "timestamp",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total order used for sorting and equality in queries
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(a), Value::Double(b)) => (*a as f64).total_cmp(b),
            (Value::Double(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    /// Query equality: numbers compare by value across integer/double
    pub fn query_eq(&self, other: &Value) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Resolve a dotted field path
///
/// A path segment applied to an array projects the rest of the path over
/// every element, so `categories.categoryID` on an array of category maps
/// yields the array of their ids.
pub fn resolve_path(fields: &Fields, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let rest: Vec<&str> = segments.collect();
    resolve_segments(fields.get(first)?, &rest)
}

fn resolve_segments(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((head, tail)) = segments.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Map(map) => resolve_segments(map.get(*head)?, tail),
        Value::Array(items) => {
            let projected: Vec<Value> = items
                .iter()
                .filter_map(|item| resolve_segments(item, segments))
                .collect();
            Some(Value::Array(projected))
        }
        _ => None,
    }
}

/// Leaf field paths of a field map, used as the update mask of a merge
///
/// Nested maps contribute their leaves; every other value (arrays included)
/// is written as a whole.
pub fn merge_field_paths(fields: &Fields) -> Vec<String> {
    let mut paths = Vec::new();
    collect_paths(fields, "", &mut paths);
    paths
}

fn collect_paths(fields: &Fields, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in fields {
        let segment = quote_segment(key);
        let path = if prefix.is_empty() {
            segment
        } else {
            format!("{}.{}", prefix, segment)
        };

        match value {
            Value::Map(nested) if !nested.is_empty() => collect_paths(nested, &path, out),
            _ => out.push(path),
        }
    }
}

fn quote_segment(segment: &str) -> String {
    let simple = segment
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if simple {
        segment.to_string()
    } else {
        format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Deep-merge `update` into `target`: nested maps merge, everything else replaces
pub fn merge_into(target: &mut Fields, update: Fields) {
    for (key, value) in update {
        if let Value::Map(nested) = value {
            if let Some(Value::Map(existing)) = target.get_mut(&key) {
                merge_into(existing, nested);
                continue;
            }
            target.insert(key, Value::Map(nested));
        } else {
            target.insert(key, value);
        }
    }
}

/// Typed accessors used by the model codecs
pub trait FieldsExt {
    fn opt_string(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn opt_i64(&self, key: &str) -> Result<Option<i64>, StoreError>;
    fn opt_bool(&self, key: &str) -> Result<Option<bool>, StoreError>;
    fn opt_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError>;
    fn opt_array(&self, key: &str) -> Result<Option<&[Value]>, StoreError>;
    fn opt_map(&self, key: &str) -> Result<Option<&Fields>, StoreError>;

    fn opt_strings(&self, key: &str) -> Result<Option<Vec<String>>, StoreError> {
        match self.opt_array(key)? {
            None => Ok(None),
            Some(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(type_mismatch(key, "string", other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
        }
    }
}

fn type_mismatch(key: &str, expected: &str, found: &Value) -> StoreError {
    StoreError::InvalidDocument(format!(
        "field `{}` expected {}, found {}",
        key,
        expected,
        found.type_name()
    ))
}

impl FieldsExt for Fields {
    fn opt_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(type_mismatch(key, "string", other)),
        }
    }

    fn opt_i64(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Integer(n)) => Ok(Some(*n)),
            // Counters written by other clients sometimes arrive as doubles
            Some(Value::Double(d)) if d.fract() == 0.0 => Ok(Some(*d as i64)),
            Some(other) => Err(type_mismatch(key, "integer", other)),
        }
    }

    fn opt_bool(&self, key: &str) -> Result<Option<bool>, StoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Boolean(b)) => Ok(Some(*b)),
            Some(other) => Err(type_mismatch(key, "boolean", other)),
        }
    }

    fn opt_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Timestamp(ts)) => Ok(Some(*ts)),
            Some(other) => Err(type_mismatch(key, "timestamp", other)),
        }
    }

    fn opt_array(&self, key: &str) -> Result<Option<&[Value]>, StoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items.as_slice())),
            Some(other) => Err(type_mismatch(key, "array", other)),
        }
    }

    fn opt_map(&self, key: &str) -> Result<Option<&Fields>, StoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Map(map)) => Ok(Some(map)),
            Some(other) => Err(type_mismatch(key, "map", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: &str) -> Value {
        Value::Map(Fields::from([
            ("categoryID".to_string(), Value::from(id)),
            ("name".to_string(), Value::from("tag")),
        ]))
    }

    #[test]
    fn test_cross_type_ordering() {
        assert_eq!(Value::Null.total_cmp(&Value::Integer(0)), Ordering::Less);
        assert_eq!(
            Value::Integer(3).total_cmp(&Value::Double(2.5)),
            Ordering::Greater
        );
        assert_eq!(
            Value::Integer(9).total_cmp(&Value::from("1")),
            Ordering::Less
        );
        assert!(Value::Integer(2).query_eq(&Value::Double(2.0)));
    }

    #[test]
    fn test_resolve_projects_through_arrays() {
        let fields = Fields::from([(
            "categories".to_string(),
            Value::Array(vec![category("math"), category("physics")]),
        )]);

        assert_eq!(
            resolve_path(&fields, "categories.categoryID"),
            Some(Value::Array(vec![Value::from("math"), Value::from("physics")]))
        );
        assert_eq!(resolve_path(&fields, "missing"), None);
    }

    #[test]
    fn test_resolve_nested_map() {
        let fields = Fields::from([(
            "community".to_string(),
            Value::Map(Fields::from([("name".to_string(), Value::from("CS"))])),
        )]);
        assert_eq!(resolve_path(&fields, "community.name"), Some(Value::from("CS")));
        assert_eq!(resolve_path(&fields, "community.name.deeper"), None);
    }

    #[test]
    fn test_merge_field_paths_descends_into_maps() {
        let fields = Fields::from([
            ("title".to_string(), Value::from("new")),
            (
                "creator".to_string(),
                Value::Map(Fields::from([("display name".to_string(), Value::from("A"))])),
            ),
            ("categories".to_string(), Value::Array(vec![category("x")])),
        ]);

        assert_eq!(
            merge_field_paths(&fields),
            vec![
                "categories".to_string(),
                "creator.`display name`".to_string(),
                "title".to_string(),
            ]
        );
    }

    #[test]
    fn test_merge_into_keeps_untouched_fields() {
        let mut target = Fields::from([
            ("title".to_string(), Value::from("old")),
            ("votes".to_string(), Value::Integer(4)),
            (
                "creator".to_string(),
                Value::Map(Fields::from([
                    ("name".to_string(), Value::from("A")),
                    ("userID".to_string(), Value::from("u1")),
                ])),
            ),
        ]);

        merge_into(
            &mut target,
            Fields::from([
                ("title".to_string(), Value::from("new")),
                (
                    "creator".to_string(),
                    Value::Map(Fields::from([("name".to_string(), Value::from("B"))])),
                ),
            ]),
        );

        assert_eq!(target.get("title"), Some(&Value::from("new")));
        assert_eq!(target.get("votes"), Some(&Value::Integer(4)));
        assert_eq!(
            resolve_path(&target, "creator.userID"),
            Some(Value::from("u1"))
        );
        assert_eq!(resolve_path(&target, "creator.name"), Some(Value::from("B")));
    }

    #[test]
    fn test_typed_accessors() {
        let fields = Fields::from([
            ("votes".to_string(), Value::Double(7.0)),
            ("title".to_string(), Value::Integer(1)),
            ("image".to_string(), Value::Array(vec![Value::from("a.png")])),
        ]);

        assert_eq!(fields.opt_i64("votes").unwrap(), Some(7));
        assert!(fields.opt_string("title").is_err());
        assert_eq!(
            fields.opt_strings("image").unwrap(),
            Some(vec!["a.png".to_string()])
        );
        assert_eq!(fields.opt_bool("missing").unwrap(), None);
    }
}
