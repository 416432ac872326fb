//! Property bags carried by endpoints, references and proxy registrations.

use std::collections::BTreeMap;
use std::fmt;

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// Plain string.
    String(String),
    /// Ordered list of strings (e.g. `objectClass`).
    List(Vec<String>),
    /// Signed integer.
    Int(i64),
    /// Boolean flag.
    Bool(bool),
}

impl PropertyValue {
    /// The value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String view of the value: a single string yields one item, a list
    /// yields every item, scalars yield nothing.
    pub fn strings(&self) -> Vec<&str> {
        match self {
            Self::String(s) => vec![s.as_str()],
            Self::List(items) => items.iter().map(String::as_str).collect(),
            Self::Int(_) | Self::Bool(_) => Vec::new(),
        }
    }

    /// Compare against the textual form used in filter expressions.
    ///
    /// Lists match when any element matches.
    pub fn matches_text(&self, expected: &str) -> bool {
        match self {
            Self::String(s) => s == expected,
            Self::List(items) => items.iter().any(|i| i == expected),
            Self::Int(i) => expected.trim().parse::<i64>().is_ok_and(|e| e == *i),
            Self::Bool(b) => expected.trim().eq_ignore_ascii_case(if *b { "true" } else { "false" }),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<&[&str]> for PropertyValue {
    fn from(items: &[&str]) -> Self {
        Self::List(items.iter().map(|s| (*s).to_owned()).collect())
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Key→value property map with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    /// Create an empty property map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a property, returning the previous value for the key.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a property.
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    /// Look up a property by exact key.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    /// Look up a property ignoring ASCII case of the key.
    pub fn get_ignore_case(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    /// Look up a string property.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    /// All string items stored under `key` (empty if absent or scalar).
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| v.strings().into_iter().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate over all keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Properties
where
    K: Into<String>,
    V: Into<PropertyValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K, V> Extend<(K, V)> for Properties
where
    K: Into<String>,
    V: Into<PropertyValue>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique() {
        let mut props = Properties::new();
        assert!(props.insert("a", "1").is_none());
        assert_eq!(props.insert("a", "2"), Some(PropertyValue::from("1")));
        assert_eq!(props.len(), 1);
        assert_eq!(props.get_str("a"), Some("2"));
    }

    #[test]
    fn strings_flattens_lists() {
        let props = Properties::new()
            .with("objectClass", &["IFoo", "IBar"][..])
            .with("single", "IBaz")
            .with("count", 3i64);
        assert_eq!(props.get_strings("objectClass"), vec!["IFoo", "IBar"]);
        assert_eq!(props.get_strings("single"), vec!["IBaz"]);
        assert!(props.get_strings("count").is_empty());
        assert!(props.get_strings("missing").is_empty());
    }

    #[test]
    fn text_matching_per_type() {
        assert!(PropertyValue::from(42i64).matches_text("42"));
        assert!(!PropertyValue::from(42i64).matches_text("x"));
        assert!(PropertyValue::from(true).matches_text("TRUE"));
        assert!(PropertyValue::from(&["a", "b"][..]).matches_text("b"));
    }

    #[test]
    fn case_insensitive_lookup() {
        let props = Properties::new().with("Service.Ranking", 5i64);
        assert_eq!(
            props.get_ignore_case("service.ranking").and_then(PropertyValue::as_int),
            Some(5)
        );
    }
}
