/// Settings shared by every template compiled in an
/// [`Environment`](crate::Environment).
///
/// With the `serde` feature enabled a `Config` can be deserialized from an
/// embedder's own configuration file; missing fields take their defaults.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Config {
    /// HTML-escape the output of every `{{ }}` interpolation.
    pub autoescape: bool,
    /// Remove a line that holds nothing but a single tag, along with its
    /// indentation and line break.
    pub trim_tag_lines: bool,
    /// How deeply `include` may nest before a render fails.
    pub max_include_depth: usize,
    /// How deeply template callables may call each other.
    pub max_call_depth: usize,
    /// Number of compiled templates kept by the environment. `0` disables
    /// caching.
    pub cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            autoescape: false,
            trim_tag_lines: true,
            max_include_depth: 32,
            max_call_depth: 64,
            cache_capacity: 128,
        }
    }
}
