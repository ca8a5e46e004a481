// Personal records consumed by the document processor
//
// Shapes mirror what the CRUD layer hands over. Activity data and goal
// metrics are JSON objects whose key order is preserved for rendering.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl JournalEntry {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            mood: None,
            tags: Vec::new(),
            created_at: None,
        }
    }

    /// Canonical text rendering
    pub fn render(&self) -> String {
        let mut text = format!("Journal Entry:\n{}\n", self.content);
        if let Some(mood) = self.mood.as_deref().filter(|m| !m.is_empty()) {
            text.push_str(&format!("Mood: {}\n", mood));
        }
        if !self.tags.is_empty() {
            text.push_str(&format!("Tags: {}\n", self.tags.join(", ")));
        }
        text
    }
}

/// A tracked activity with free-form data fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Activity {
    pub fn new(activity_type: impl Into<String>) -> Self {
        Self {
            activity_type: activity_type.into(),
            data: Map::new(),
            timestamp: None,
        }
    }

    /// Builder-style data field, appended in call order
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Canonical text rendering
    pub fn render(&self) -> String {
        let mut text = format!("Activity Type: {}\n", self.activity_type);
        push_fields(&mut text, &self.data, "");
        text
    }
}

/// A goal with progress tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub status: String,
    /// Percent complete; kept as JSON so `50` and `50.5` render as given
    #[serde(default = "zero_progress")]
    pub progress: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

fn zero_progress() -> Value {
    Value::from(0)
}

impl Goal {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            category: String::new(),
            status: String::new(),
            progress: zero_progress(),
            metrics: None,
            created_at: None,
        }
    }

    /// Canonical text rendering
    pub fn render(&self) -> String {
        let mut text = format!(
            "Goal: {}\nDescription: {}\nCategory: {}\nStatus: {}\nProgress: {}%\n",
            self.title,
            self.description,
            self.category,
            self.status,
            render_value(&self.progress)
        );
        if let Some(metrics) = self.metrics.as_ref().filter(|m| !m.is_empty()) {
            text.push_str("Metrics:\n");
            push_fields(&mut text, metrics, "- ");
        }
        text
    }
}

/// Everything the goal suggester looks at
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub journal_entries: Vec<JournalEntry>,
    #[serde(default)]
    pub goals: Vec<Goal>,
}

fn push_fields(text: &mut String, fields: &Map<String, Value>, prefix: &str) {
    for (key, value) in fields {
        text.push_str(&format!("{}{}: {}\n", prefix, key, render_value(value)));
    }
}

/// Display form of a JSON value: strings bare, null empty, the rest as JSON
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
