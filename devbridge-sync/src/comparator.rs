//! Content hashing and field-level diffing of snapshots.
//!
//! Only comparable fields take part; `modified_at` never does. Object keys
//! are sorted at every depth before hashing, so field order in the source
//! JSON does not change the digest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use similar::TextDiff;

use devbridge_core::Snapshot;

/// One field whose values differ between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub left: Value,
    pub right: Value,
}

impl FieldDiff {
    /// The same difference seen from the other side.
    pub fn swapped(&self) -> FieldDiff {
        FieldDiff {
            field: self.field.clone(),
            left: self.right.clone(),
            right: self.left.clone(),
        }
    }
}

/// SHA-256 hex digest over the comparable fields of `snapshot`.
pub fn hash(snapshot: &Snapshot) -> String {
    let mut canonical = String::new();
    canonical.push('{');
    // BTreeMap iteration is already sorted by field name.
    for (i, (field, value)) in snapshot.fields.iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        write_string(&mut canonical, field);
        canonical.push(':');
        write_canonical(&mut canonical, value);
    }
    canonical.push('}');

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fields of `left`'s entity type whose values differ, in field-table order.
pub fn diff(left: &Snapshot, right: &Snapshot) -> Vec<FieldDiff> {
    left.entity_type
        .comparable_fields()
        .iter()
        .filter_map(|field| {
            let l = left.get(field).unwrap_or(&Value::Null);
            let r = right.get(field).unwrap_or(&Value::Null);
            (l != r).then(|| FieldDiff {
                field: (*field).to_string(),
                left: l.clone(),
                right: r.clone(),
            })
        })
        .collect()
}

pub fn is_synced(left: &Snapshot, right: &Snapshot) -> bool {
    diff(left, right).is_empty()
}

/// Unified line diff for string-valued fields, `None` for anything else.
pub fn render_text_diff(diff: &FieldDiff, left_label: &str, right_label: &str) -> Option<String> {
    let (Value::String(left), Value::String(right)) = (&diff.left, &diff.right) else {
        return None;
    };
    let old_header = format!("{left_label}/{}", diff.field);
    let new_header = format!("{right_label}/{}", diff.field);
    Some(
        TextDiff::from_lines(left.as_str(), right.as_str())
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string(),
    )
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_canonical(out, &map[key]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push_str(&Value::String(s.to_string()).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbridge_core::EntityType;
    use serde_json::json;

    fn issue(title: &str, state: &str) -> Snapshot {
        Snapshot::from_fields(
            EntityType::Issue,
            [("title", json!(title)), ("state", json!(state))],
        )
    }

    #[test]
    fn hash_is_deterministic() {
        let s = issue("Bug", "open");
        assert_eq!(hash(&s), hash(&s.clone()));
        assert_eq!(hash(&s).len(), 64);
    }

    #[test]
    fn hash_ignores_input_field_order() {
        let a = Snapshot::from_fields(
            EntityType::Issue,
            [("title", json!("Bug")), ("state", json!("open"))],
        );
        let b = Snapshot::from_fields(
            EntityType::Issue,
            [("state", json!("open")), ("title", json!("Bug"))],
        );
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn hash_ignores_nested_key_order() {
        let a = Snapshot::from_fields(
            EntityType::Release,
            [("assets", json!([{"name": "x.zip", "size": 3}]))],
        );
        let mut obj = serde_json::Map::new();
        obj.insert("size".to_string(), json!(3));
        obj.insert("name".to_string(), json!("x.zip"));
        let b = Snapshot::from_fields(
            EntityType::Release,
            [("assets", Value::Array(vec![Value::Object(obj)]))],
        );
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn hash_ignores_modified_at_and_non_comparable_fields() {
        let a = issue("Bug", "open");
        let b = Snapshot::from_fields(
            EntityType::Issue,
            [
                ("title", json!("Bug")),
                ("state", json!("open")),
                ("url", json!("https://example.invalid/42")),
            ],
        )
        .with_modified_at(Some(chrono::Utc::now()));
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn hash_changes_with_content() {
        assert_ne!(hash(&issue("Bug", "open")), hash(&issue("Bug", "closed")));
    }

    #[test]
    fn diff_is_reflexive() {
        let s = issue("Bug", "open");
        assert!(diff(&s, &s).is_empty());
        assert!(is_synced(&s, &s));
    }

    #[test]
    fn diff_is_symmetric_up_to_labels() {
        let a = issue("Bug", "open");
        let b = issue("Bug (old)", "closed");
        let ab = diff(&a, &b);
        let ba: Vec<FieldDiff> = diff(&b, &a).iter().map(FieldDiff::swapped).collect();
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 2);
        assert_eq!(ab[0].field, "title");
        assert_eq!(ab[1].field, "state");
    }

    #[test]
    fn diff_reports_only_changed_fields() {
        let a = issue("Bug", "open");
        let b = issue("Bug (old)", "open");
        let d = diff(&a, &b);
        assert_eq!(
            d,
            vec![FieldDiff {
                field: "title".to_string(),
                left: json!("Bug"),
                right: json!("Bug (old)"),
            }]
        );
    }

    #[test]
    fn text_diff_for_strings_only() {
        let d = FieldDiff {
            field: "description".to_string(),
            left: json!("line one\nline two\n"),
            right: json!("line one\nline 2\n"),
        };
        let rendered = render_text_diff(&d, "github", "azure").expect("string diff");
        assert!(rendered.contains("--- github/description"));
        assert!(rendered.contains("+++ azure/description"));
        assert!(rendered.contains("-line two"));
        assert!(rendered.contains("+line 2"));

        let labels = FieldDiff {
            field: "labels".to_string(),
            left: json!(["bug"]),
            right: json!([]),
        };
        assert!(render_text_diff(&labels, "github", "azure").is_none());
    }
}
