// Weather station domain model
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct WeatherStation {
    pub id: String,
    pub name: String,
}

impl WeatherStation {
    pub fn new(id: String) -> Self {
        let name = Self::format_name(&id);
        Self { id, name }
    }

    fn format_name(id: &str) -> String {
        // Convert "Bloomsburg_University_" to "Bloomsburg University"
        id.trim_end_matches('_').replace('_', " ")
    }

    /// Two stations are the same data source when they share an id.
    pub fn is_same_source(&self, other: &WeatherStation) -> bool {
        self.id == other.id
    }
}
