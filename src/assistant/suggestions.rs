// Goal suggestions and the free-text parser for model output
//
// Generated suggestions arrive as loosely formatted blocks:
//
//     Title: ...
//     Description: ...
//     Category: ...
//     Metrics: ...
//
// Parsing is best effort. Blocks are split on the literal "Title:" marker,
// the other fields are looked up by label, and whatever is missing is
// reported rather than treated as an error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SuggestedMetrics {
    Structured(Map<String, Value>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSuggestion {
    pub title: String,
    pub description: String,
    pub category: String,
    pub suggested_metrics: SuggestedMetrics,
}

impl GoalSuggestion {
    /// Candidate for a frequent activity type with no matching goal yet
    pub fn for_activity(activity_type: &str) -> Self {
        let mut metrics = Map::new();
        metrics.insert("frequency".to_string(), Value::from("weekly"));
        metrics.insert("target".to_string(), Value::from("30 minutes per session"));

        Self {
            title: format!("Improve {}", activity_type),
            description: format!("Based on your frequent {} activities", activity_type),
            category: activity_type.to_string(),
            suggested_metrics: SuggestedMetrics::Structured(metrics),
        }
    }
}

/// Outcome of parsing one "Title:" block
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedGoal {
    Complete(GoalSuggestion),
    /// Some fields were absent or empty; they are left blank
    Partial {
        goal: GoalSuggestion,
        missing: Vec<&'static str>,
    },
    /// Nothing usable in the block
    Unparseable(String),
}

pub fn parse_goal_suggestions(text: &str) -> Vec<ParsedGoal> {
    text.split("Title:").skip(1).map(parse_block).collect()
}

fn parse_block(block: &str) -> ParsedGoal {
    let mut lines = block.trim().lines();
    let title = lines.next().unwrap_or_default().trim().to_string();

    let mut description = String::new();
    let mut category = String::new();
    let mut metrics = String::new();
    for line in lines {
        let line = line.trim();
        if let Some(v) = line.strip_prefix("Description:") {
            description = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("Category:") {
            category = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("Metrics:") {
            metrics = v.trim().to_string();
        }
    }

    let mut missing = Vec::new();
    for (name, value) in [
        ("title", &title),
        ("description", &description),
        ("category", &category),
        ("metrics", &metrics),
    ] {
        if value.is_empty() {
            missing.push(name);
        }
    }

    if missing.len() == 4 {
        return ParsedGoal::Unparseable(block.to_string());
    }

    let goal = GoalSuggestion {
        title,
        description,
        category,
        suggested_metrics: SuggestedMetrics::Text(metrics),
    };

    if missing.is_empty() {
        ParsedGoal::Complete(goal)
    } else {
        ParsedGoal::Partial { goal, missing }
    }
}
