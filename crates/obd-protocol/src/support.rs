//! Vehicle PID support, as reported by the bitmap probe

use std::collections::HashMap;

/// Parameter id → supported, filled once per connection
///
/// Absent ids count as supported, so an empty map (no probe yet, or a probe the
/// vehicle did not answer) lets every parameter through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportMap {
    entries: HashMap<String, bool>,
}

impl SupportMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the probe result for a parameter
    pub fn set(&mut self, id: &str, supported: bool) {
        self.entries.insert(id.to_ascii_uppercase(), supported);
    }

    /// Whether the vehicle supports `id`
    pub fn is_supported(&self, id: &str) -> bool {
        self.entries
            .get(&id.to_ascii_uppercase())
            .copied()
            .unwrap_or(true)
    }

    /// Explicit entry for `id`, if probed
    pub fn get(&self, id: &str) -> Option<bool> {
        self.entries.get(&id.to_ascii_uppercase()).copied()
    }

    /// Number of probed entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been probed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget all probe results
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
