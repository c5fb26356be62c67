//! The edited document and its reducer.

use serde_json::{Map, Value};

/// A JSON object.
pub type Document = Map<String, Value>;

/// An edit of one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    /// Insert or replace a key.
    Set { key: String, value: Value },
    /// Remove a key, if present.
    Remove { key: String },
}

/// Applies an edit.
pub fn apply(mut document: Document, edit: &Edit) -> Document {
    match edit {
        Edit::Set { key, value } => {
            document.insert(key.clone(), value.clone());
        }
        Edit::Remove { key } => {
            document.remove(key);
        }
    }
    document
}

/// Parses a command-line value as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_and_remove() {
        let document = apply(
            Document::new(),
            &Edit::Set {
                key: "k".into(),
                value: json!(1),
            },
        );
        assert_eq!(document.get("k"), Some(&json!(1)));

        let document = apply(document, &Edit::Remove { key: "k".into() });
        assert!(document.is_empty());

        // Removing an absent key is a no-op.
        let document = apply(document, &Edit::Remove { key: "k".into() });
        assert!(document.is_empty());
    }

    #[test]
    fn values_parse_as_json_or_string() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value(r#"{"a":[1]}"#), json!({"a": [1]}));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
        assert_eq!(parse_value("hello world"), json!("hello world"));
        assert_eq!(parse_value(""), json!(""));
    }
}
