//! Ordered, case-insensitive header list.

/// HTTP header fields in arrival order.
///
/// Names compare case-insensitively (RFC 9110 §5.1); repeated names keep every
/// value. Crash reports copy the list verbatim with [`Headers::to_pairs`].
///
/// ```
/// use ravel::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Host", "localhost");
/// headers.insert("Accept", "text/plain");
/// assert_eq!(headers.get("host"), Some("localhost"));
/// assert_eq!(headers.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Appends a field; an existing field with the same name is kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replaces every field named `name` (ignoring ASCII case) with a single
    /// field at the end of the list.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// Drops every field named `name`, ignoring ASCII case. Returns how many
    /// were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.fields.len()
    }

    /// First value for `name`, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every field in arrival order, repeats included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Owned copy of every field, for values that must outlive the request.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.fields.clone()
    }
}
