use parking_lot::Mutex;
use serde_json::Value;

/// Insertion-ordered variable store scoped to one playback run.
///
/// `store`, `storeWindowHandle` and content-script variable requests all go
/// through here; re-setting a name keeps its original position.
pub struct VariableStore {
    entries: Mutex<Vec<(String, Value)>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|(key, _)| *key == name) {
            entry.1 = value;
        } else {
            entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries
            .lock()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.entries.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}
