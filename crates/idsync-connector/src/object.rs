//! External object model
//!
//! Types describing objects as observed in a target system: attribute
//! values, attribute sets, object snapshots, and search filters.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A value for an attribute, which may be single or multi-valued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// No value (null).
    Null,
    /// A single string value.
    String(String),
    /// A single integer value.
    Integer(i64),
    /// A single boolean value.
    Boolean(bool),
    /// Multiple values.
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Get as a string if this is a single string value.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as strings (works for both single and multi-valued).
    pub fn as_strings(&self) -> Vec<&str> {
        match self {
            AttributeValue::String(s) => vec![s.as_str()],
            AttributeValue::Array(arr) => arr.iter().filter_map(|v| v.as_string()).collect(),
            _ => vec![],
        }
    }

    /// Get as an integer if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        AttributeValue::Array(values.into_iter().map(AttributeValue::String).collect())
    }
}

/// A set of named attributes as observed from an external system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    /// Map of attribute name to attribute value(s).
    #[serde(flatten)]
    attributes: HashMap<String, AttributeValue>,
}

impl AttributeSet {
    /// Create a new empty attribute set.
    pub fn new() -> Self {
        Self {
            attributes: HashMap::new(),
        }
    }

    /// Set an attribute value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Set an attribute using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get an attribute value.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Get a single-valued string attribute.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_string())
    }

    /// Check if an attribute exists.
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    /// Get all attribute names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(|s| s.as_str())
    }

    /// Get the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// An object as observed in an external system.
///
/// Immutable snapshot for the duration of one reconciliation decision:
/// the engine never mutates it, only reads attributes off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalObject {
    /// Object class in the external system (e.g. "account", "group").
    pub object_class: String,
    /// Unique identifier assigned by the external system.
    pub uid: String,
    /// Human-readable name for reports and logs.
    pub name: String,
    /// Attribute values as observed.
    pub attributes: AttributeSet,
}

impl ExternalObject {
    /// Create a new external object snapshot.
    pub fn new(
        object_class: impl Into<String>,
        uid: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            object_class: object_class.into(),
            uid: uid.into(),
            name: name.into(),
            attributes: AttributeSet::new(),
        }
    }

    /// Attach attributes using builder pattern.
    #[must_use]
    pub fn with_attributes(mut self, attributes: AttributeSet) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set a single attribute using builder pattern.
    #[must_use]
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.set(name, value);
        self
    }

    /// Get a single-valued string attribute.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.attributes.get_string(name)
    }
}

impl std::fmt::Display for ExternalObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.object_class, self.uid)
    }
}

/// A search filter for enumerating objects in a target system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Attribute equals value exactly.
    Equals {
        /// Attribute name.
        attribute: String,
        /// Expected value.
        value: String,
    },
    /// Attribute contains the value as a substring.
    Contains {
        /// Attribute name.
        attribute: String,
        /// Substring to look for.
        value: String,
    },
    /// All sub-filters must match.
    And(Vec<Filter>),
    /// Any sub-filter must match.
    Or(Vec<Filter>),
    /// Negation of a sub-filter.
    Not(Box<Filter>),
}

impl Filter {
    /// Create an equality filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Evaluate this filter against an object's attributes.
    ///
    /// Connectors that cannot push a filter down to the target system can
    /// use this to filter client-side.
    pub fn matches(&self, object: &ExternalObject) -> bool {
        match self {
            Filter::Equals { attribute, value } => {
                object.get_string(attribute).is_some_and(|v| v == value)
                    || (attribute == "uid" && object.uid == *value)
            }
            Filter::Contains { attribute, value } => object
                .get_string(attribute)
                .is_some_and(|v| v.contains(value.as_str())),
            Filter::And(filters) => filters.iter().all(|f| f.matches(object)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(object)),
            Filter::Not(filter) => !filter.matches(object),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_set_builder() {
        let attrs = AttributeSet::new()
            .with("email", "jane@example.com")
            .with("active", true)
            .with("logins", 42i64);

        assert_eq!(attrs.get_string("email"), Some("jane@example.com"));
        assert_eq!(attrs.get("logins").and_then(|v| v.as_integer()), Some(42));
        assert!(attrs.has("active"));
        assert_eq!(attrs.len(), 3);
    }

    #[test]
    fn test_multi_valued_attribute() {
        let attrs =
            AttributeSet::new().with("groups", vec!["admins".to_string(), "users".to_string()]);

        let groups = attrs.get("groups").unwrap().as_strings();
        assert_eq!(groups, vec!["admins", "users"]);
    }

    #[test]
    fn test_external_object_display() {
        let obj = ExternalObject::new("account", "u1", "Jane Doe");
        assert_eq!(obj.to_string(), "account[u1]");
    }

    #[test]
    fn test_filter_matches() {
        let obj = ExternalObject::new("account", "u1", "Jane Doe")
            .with_attribute("email", "jane@example.com")
            .with_attribute("dept", "engineering");

        assert!(Filter::eq("email", "jane@example.com").matches(&obj));
        assert!(!Filter::eq("email", "other@example.com").matches(&obj));
        assert!(Filter::eq("uid", "u1").matches(&obj));

        let and = Filter::And(vec![
            Filter::eq("dept", "engineering"),
            Filter::Contains {
                attribute: "email".to_string(),
                value: "@example.com".to_string(),
            },
        ]);
        assert!(and.matches(&obj));

        let not = Filter::Not(Box::new(Filter::eq("dept", "engineering")));
        assert!(!not.matches(&obj));
    }

    #[test]
    fn test_attribute_value_json_roundtrip() {
        let attrs = AttributeSet::new().with("name", "test").with("count", 7i64);
        let json = serde_json::to_string(&attrs).unwrap();
        let back: AttributeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_string("name"), Some("test"));
    }
}
