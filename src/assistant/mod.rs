// Assistant - grounded generation, sentiment, goal suggestions and
// activity categorization over the session's model and the document index
//
// Two states: uninitialized until `initialize` has loaded a model and built
// both pipelines, ready afterwards. Every other operation checks first.

pub mod pipelines;
pub mod sentiment;
pub mod suggestions;

pub use pipelines::{LocalPipelines, PipelineFactory};
pub use sentiment::{
    aggregate_sentiment, Classification, OnnxSentimentClassifier, Sentiment, SentimentClassifier, SentimentResult,
};
pub use suggestions::{parse_goal_suggestions, GoalSuggestion, ParsedGoal, SuggestedMetrics};

use anyhow::Result;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::documents::{
    render_value, Activity, DocumentProcessor, MetadataFilter, UserData, ACTIVITY, GOAL, JOURNAL_ENTRY,
};
use crate::errors::AiError;
use crate::models::{ModelManager, ModelSession, TextGenerator};

/// Closed label set offered to the model when categorizing activities
pub const ACTIVITY_CATEGORIES: [&str; 7] = [
    "Work",
    "Exercise",
    "Learning",
    "Entertainment",
    "Social",
    "Personal Care",
    "Other",
];

/// Chunks retrieved for a grounded response
const CONTEXT_CHUNKS: usize = 5;

/// Similar activities shown when categorizing
const SIMILAR_ACTIVITIES: usize = 3;

/// Frequent activity types turned into goal candidates
const TOP_ACTIVITY_TYPES: usize = 3;

struct Pipelines {
    generator: Box<dyn TextGenerator>,
    sentiment: Box<dyn SentimentClassifier>,
}

pub struct Assistant {
    processor: DocumentProcessor,
    factory: Box<dyn PipelineFactory>,
    pipelines: Option<Pipelines>,
    max_length: usize,
}

impl Assistant {
    pub fn new(processor: DocumentProcessor, factory: Box<dyn PipelineFactory>) -> Self {
        Self {
            processor,
            factory,
            pipelines: None,
            max_length: 0,
        }
    }

    pub fn processor(&self) -> &DocumentProcessor {
        &self.processor
    }

    pub fn is_ready(&self) -> bool {
        self.pipelines.is_some()
    }

    /// Load the fine-tuned model at `model_path` (or the base model when no
    /// path is given) and build the pipelines
    pub fn initialize(
        &mut self,
        manager: &mut ModelManager,
        session: &mut ModelSession,
        model_path: Option<&Path>,
        base_id: Option<&str>,
    ) -> Result<()> {
        match model_path {
            Some(path) => manager.load_fine_tuned(session, path, base_id)?,
            None => manager.load_model(session, base_id, None)?,
        }

        let generator = self.factory.generator(manager.settings())?;
        let sentiment = self.factory.sentiment()?;

        self.max_length = manager.settings().max_length;
        self.pipelines = Some(Pipelines { generator, sentiment });

        info!("Assistant initialized");
        Ok(())
    }

    fn pipelines_mut(&mut self) -> Result<&mut Pipelines> {
        Ok(self.pipelines.as_mut().ok_or(AiError::AssistantNotInitialized)?)
    }

    /// Generate a reply to `prompt`, optionally grounded in indexed chunks
    /// of the given types. The echoed prompt is stripped from the output.
    pub fn generate_response(
        &mut self,
        session: &mut ModelSession,
        prompt: &str,
        context_types: Option<&[String]>,
        max_length: Option<usize>,
    ) -> Result<String> {
        if !self.is_ready() {
            return Err(AiError::AssistantNotInitialized.into());
        }

        let context_text = match context_types {
            Some(types) => {
                let filter = MetadataFilter::types(types);
                self.processor
                    .search_similar(prompt, Some(&filter), CONTEXT_CHUNKS)?
                    .into_iter()
                    .map(|c| c.text)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            None => String::new(),
        };

        let full_prompt = if context_text.is_empty() {
            prompt.to_string()
        } else {
            format!("Context:\n{}\n\nUser: {}\nAssistant:", context_text, prompt)
        };

        let max_length = max_length.unwrap_or(self.max_length);
        let pipelines = self.pipelines_mut()?;
        let output = pipelines.generator.generate(session, &full_prompt, max_length)?;

        let reply = output.strip_prefix(full_prompt.as_str()).unwrap_or(output.as_str());
        Ok(reply.trim().to_string())
    }

    /// Sentiment of a journal entry, classified in 512-character windows
    pub fn analyze_sentiment(&self, text: &str) -> Result<SentimentResult> {
        let pipelines = self.pipelines.as_ref().ok_or(AiError::AssistantNotInitialized)?;

        let classifications = sentiment::sentiment_windows(text)
            .iter()
            .map(|w| pipelines.sentiment.classify(w))
            .collect::<Result<Vec<_>>>()?;

        debug!("Classified {} sentiment windows", classifications.len());
        Ok(aggregate_sentiment(&classifications))
    }

    /// Heuristic candidates from frequent activity types, followed by
    /// model-generated suggestions when there is journal or goal context.
    ///
    /// Generated suggestions are parsed best effort; incomplete ones are kept
    /// with blank fields and unusable blocks are dropped.
    pub fn suggest_goals(&mut self, session: &mut ModelSession, user_data: &UserData) -> Result<Vec<GoalSuggestion>> {
        if !self.is_ready() {
            return Err(AiError::AssistantNotInitialized.into());
        }

        let counts = activity_type_counts(&user_data.activities);
        let mut suggestions = heuristic_goal_suggestions(&counts, user_data);

        let filter = MetadataFilter::types(&[JOURNAL_ENTRY, GOAL]);
        let context = self
            .processor
            .search_similar("goal suggestions", Some(&filter), CONTEXT_CHUNKS)?;
        if context.is_empty() {
            return Ok(suggestions);
        }

        let activity_types: Vec<&str> = counts.iter().map(|(t, _)| t.as_str()).collect();
        let context_text: Vec<&str> = context.iter().map(|c| c.text.as_str()).collect();
        let prompt = format!(
            "Based on the user's activities and interests, suggest 2-3 specific goals.\n\
             Current activities: {}\n\
             Context: {}\n\
             \n\
             Format each goal as:\n\
             Title: [goal title]\n\
             Description: [brief description]\n\
             Category: [relevant category]\n\
             Metrics: [suggested metrics]\n",
            activity_types.join(", "),
            context_text.join(" ")
        );

        let response = self.generate_response(session, &prompt, None, None)?;

        for parsed in parse_goal_suggestions(&response) {
            match parsed {
                ParsedGoal::Complete(goal) => suggestions.push(goal),
                ParsedGoal::Partial { goal, missing } => {
                    debug!("Generated goal '{}' missing {:?}", goal.title, missing);
                    suggestions.push(goal);
                }
                ParsedGoal::Unparseable(block) => {
                    warn!("Dropping unparseable goal suggestion: {:?}", block);
                }
            }
        }

        Ok(suggestions)
    }

    /// Ask the model for one of ACTIVITY_CATEGORIES.
    ///
    /// Returns the last line of the reply as is; it is not checked against
    /// the category list.
    pub fn categorize_activity(&mut self, session: &mut ModelSession, activity: &Activity) -> Result<String> {
        if !self.is_ready() {
            return Err(AiError::AssistantNotInitialized.into());
        }

        let mut activity_text = format!("Activity: {}\n", activity.activity_type);
        for (key, value) in &activity.data {
            activity_text.push_str(&format!("{}: {}\n", key, render_value(value)));
        }

        let filter = MetadataFilter::new().eq("type", ACTIVITY);
        let similar: Vec<String> = self
            .processor
            .search_similar(&activity_text, Some(&filter), SIMILAR_ACTIVITIES)?
            .into_iter()
            .map(|c| c.text)
            .collect();

        let categories: Vec<String> = ACTIVITY_CATEGORIES.iter().map(|c| format!("- {}", c)).collect();
        let prompt = format!(
            "Categorize the following activity into one of these categories:\n\
             {}\n\
             \n\
             Activity to categorize:\n\
             {}\n\
             Similar activities:\n\
             {}\n\
             \n\
             Category:\n",
            categories.join("\n"),
            activity_text,
            similar.join(" ")
        );

        let response = self.generate_response(session, &prompt, None, None)?;
        Ok(response.lines().last().unwrap_or_default().to_string())
    }
}

/// Activity type frequencies in first-encounter order
fn activity_type_counts(activities: &[Activity]) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for activity in activities {
        match counts.iter_mut().find(|(t, _)| *t == activity.activity_type) {
            Some((_, n)) => *n += 1,
            None => counts.push((activity.activity_type.clone(), 1)),
        }
    }
    counts
}

/// One candidate per top activity type without a goal in that category.
/// Equal counts keep first-encounter order.
fn heuristic_goal_suggestions(counts: &[(String, usize)], user_data: &UserData) -> Vec<GoalSuggestion> {
    let mut ranked = counts.to_vec();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    ranked
        .iter()
        .take(TOP_ACTIVITY_TYPES)
        .filter(|(t, _)| !user_data.goals.iter().any(|g| g.category == *t))
        .map(|(t, _)| GoalSuggestion::for_activity(t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{Goal, HashingEmbedding, VectorStore};
    use std::sync::Arc;

    fn user_data(types: &[&str], goal_categories: &[&str]) -> UserData {
        UserData {
            activities: types.iter().map(|t| Activity::new(*t)).collect(),
            journal_entries: Vec::new(),
            goals: goal_categories
                .iter()
                .map(|c| Goal {
                    category: c.to_string(),
                    ..Goal::new("existing")
                })
                .collect(),
        }
    }

    #[test]
    fn test_counts_keep_first_encounter_order() {
        let data = user_data(&["Reading", "Exercise", "Reading", "Cooking"], &[]);
        let counts = activity_type_counts(&data.activities);
        assert_eq!(
            counts,
            vec![
                ("Reading".to_string(), 2),
                ("Exercise".to_string(), 1),
                ("Cooking".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_heuristic_top_three_with_stable_ties() {
        let data = user_data(&["A", "B", "C", "D", "D", "B"], &[]);
        let counts = activity_type_counts(&data.activities);
        let titles: Vec<String> = heuristic_goal_suggestions(&counts, &data)
            .into_iter()
            .map(|g| g.category)
            .collect();
        assert_eq!(titles, vec!["B", "D", "A"]);
    }

    #[test]
    fn test_heuristic_skips_existing_goal_categories() {
        let data = user_data(&["Exercise", "Exercise", "Reading"], &["Exercise"]);
        let counts = activity_type_counts(&data.activities);
        let suggestions = heuristic_goal_suggestions(&counts, &data);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].title, "Improve Reading");
    }

    #[test]
    fn test_operations_require_initialize() {
        let store = VectorStore::in_memory("t", Arc::new(HashingEmbedding::new())).unwrap();
        let mut assistant = Assistant::new(DocumentProcessor::new(store), Box::new(LocalPipelines::new("c".into())));
        let mut session = ModelSession::new();

        let err = assistant
            .generate_response(&mut session, "hi", None, None)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<AiError>(), Some(AiError::AssistantNotInitialized)));
        assert!(assistant.analyze_sentiment("fine").is_err());
        assert!(assistant.suggest_goals(&mut session, &UserData::default()).is_err());
        assert!(assistant
            .categorize_activity(&mut session, &Activity::new("Run"))
            .is_err());
    }
}
