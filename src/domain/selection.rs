// Variables picked for single- or two-variable plotting
use serde::Serialize;

/// Up to three keys. Single mode holds one key; two-variable mode holds
/// `[first, second, combined]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionState {
    keys: Vec<String>,
}

impl SelectionState {
    pub fn select_single(&mut self, key: String) {
        self.keys.clear();
        self.keys.push(key);
    }

    pub fn select_pair(&mut self, first: String, second: String, combined: String) {
        self.keys.clear();
        self.keys.push(first);
        self.keys.push(second);
        self.keys.push(combined);
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}
