use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::de::{lenient_count, null_as_default, string_or_number};
use super::model::Links;

/// One page of operations of an import job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOperations {
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub operations: Vec<ImportOperation>,
    #[serde(rename = "_links", default, deserialize_with = "null_as_default")]
    pub links: Links,
    /// Offset this page was fetched at; not part of the payload.
    #[serde(skip)]
    pub offset: u64,
}

impl ImportOperations {
    /// Self link without its query string, used to fetch other pages.
    pub fn self_link(&self) -> Option<&str> {
        self.links
            .get("self")
            .map(|l| l.href.as_str())
            .filter(|href| !href.is_empty())
            .map(|href| &href[..href.find(['?', '#']).unwrap_or(href.len())])
    }
}

/// A single MO operation (create, update, delete, action) of an import job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportOperation {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fdn: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attributes: Vec<OperationAttribute>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub failures: Vec<OperationFailure>,
    #[serde(rename = "_links", default, deserialize_with = "null_as_default")]
    pub links: Links,
}

impl ImportOperation {
    pub fn attributes_link(&self) -> Option<&str> {
        self.links
            .get("attributes")
            .map(|l| l.href.as_str())
            .filter(|href| !href.is_empty())
    }

    /// Operations whose attributes have a current value worth comparing.
    pub fn modifies_attributes(&self) -> bool {
        matches!(self.kind.to_lowercase().as_str(), "update" | "create")
    }

    pub fn set_attributes(&mut self, attributes: Vec<OperationAttribute>) {
        self.attributes = attributes;
    }
}

/// Attribute value supplied by the import file next to its value on the node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationAttribute {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub supplied_value: Value,
    #[serde(default)]
    pub current_value: Option<Value>,
}

impl OperationAttribute {
    pub fn value_text(&self) -> String {
        format_attribute_value(&self.supplied_value, 0)
    }

    pub fn current_value_text(&self) -> Option<String> {
        self.current_value
            .as_ref()
            .map(|value| format_attribute_value(value, 0))
    }

    /// Whether applying the import would change the attribute.
    pub fn differs(&self) -> bool {
        self.current_value
            .as_ref()
            .is_some_and(|current| current != &self.supplied_value)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationFailure {
    #[serde(default, deserialize_with = "null_as_default")]
    pub failure_reason: String,
}

/// Render a (possibly nested) attribute value as indented text.
///
/// Maps print one `key: value` per line, nested structures go on the next
/// lines indented by three more spaces and list items are separated by `,`.
pub fn format_attribute_value(value: &Value, level: usize) -> String {
    let tab = " ".repeat(level);
    match value {
        Value::String(s) => format!("{tab}{s}"),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| match item {
                Value::Object(_) | Value::Array(_) => {
                    format!("{tab}{key}:\n{}", format_attribute_value(item, level + 3))
                }
                _ => format!("{tab}{key}: {}", format_attribute_value(item, 0)),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Array(items) => items
            .iter()
            .map(|item| format_attribute_value(item, level))
            .collect::<Vec<_>>()
            .join(",\n"),
        other => format!("{tab}{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn formats_scalars_and_lists() {
        assert_eq!(format_attribute_value(&json!("abc"), 0), "abc");
        assert_eq!(format_attribute_value(&json!(12), 2), "  12");
        assert_eq!(format_attribute_value(&json!(["a", "b"]), 0), "a,\nb");
    }

    #[test]
    fn formats_nested_structs() {
        let value = json!({"id": 1, "list": ["x", "y"]});
        assert_eq!(format_attribute_value(&value, 0), "id: 1\nlist:\n   x,\n   y");
    }

    #[test]
    fn decodes_operations_page() {
        let ops: ImportOperations = serde_json::from_value(json!({
            "totalCount": "2",
            "operations": [
                {"id": 1, "type": "update", "fdn": "MeContext=A", "status": "executed",
                 "attributes": [{"name": "userLabel", "suppliedValue": "new", "currentValue": "old"}]},
                {"id": 2, "type": "delete", "fdn": "MeContext=B", "status": "invalid",
                 "failures": [{"failureReason": "MO not found"}]}
            ],
            "_links": {"self": {"href": "https://enm/jobs/1/operations?offset=0"}}
        }))
        .unwrap();

        assert_eq!(ops.total_count, 2);
        assert_eq!(ops.self_link(), Some("https://enm/jobs/1/operations"));
        assert!(ops.operations[0].modifies_attributes());
        assert!(ops.operations[0].attributes[0].differs());
        assert!(!ops.operations[1].modifies_attributes());
        assert_eq!(ops.operations[1].failures[0].failure_reason, "MO not found");
    }
}
