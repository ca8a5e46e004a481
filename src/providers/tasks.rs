// Task analysis prompts sent to an external provider
//
// Responses are requested "in JSON format" but returned as raw text;
// nothing here validates what the model sends back.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::LlmProvider;

/// The task fields the prompts need
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

pub struct TaskAdvisor {
    provider: Arc<dyn LlmProvider>,
}

impl TaskAdvisor {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub async fn analyze_task(&self, title: &str, description: &str) -> Result<String> {
        let prompt = format!(
            "Analyze this task:\n\
             Title: {title}\n\
             Description: {description}\n\
             \n\
             Provide analysis in JSON format with:\n\
             - priority (high/medium/low)\n\
             - estimated_hours (number)\n\
             - tags (list of relevant tags)\n\
             - complexity_analysis (text)\n\
             - potential_challenges (list)"
        );
        self.provider.generate(&prompt).await
    }

    pub async fn generate_task_summary(&self, tasks: &[TaskInfo]) -> Result<String> {
        let prompt = format!(
            "Analyze these tasks and provide a summary:\n\
             {}\n\
             \n\
             Provide analysis in JSON format with:\n\
             - overall_workload (text)\n\
             - key_priorities (list)\n\
             - suggested_order (list of task titles)\n\
             - time_estimate (total hours)",
            task_lines(tasks)
        );
        self.provider.generate(&prompt).await
    }

    pub async fn suggest_task_optimization(&self, task: &TaskInfo, all_tasks: &[TaskInfo]) -> Result<String> {
        let prompt = format!(
            "Analyze this task in the context of all tasks:\n\
             Current Task: {}\n\
             Description: {}\n\
             \n\
             Other Tasks:\n\
             {}\n\
             \n\
             Provide optimization suggestions in JSON format with:\n\
             - dependencies (list of related tasks)\n\
             - optimization_suggestions (list)\n\
             - resource_allocation (text)\n\
             - timeline_recommendations (text)",
            task.title,
            task.description,
            task_lines(all_tasks)
        );
        self.provider.generate(&prompt).await
    }
}

fn task_lines(tasks: &[TaskInfo]) -> String {
    tasks
        .iter()
        .map(|t| format!("- {}: {}", t.title, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Echoes the prompt back
    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn generate(&self, prompt: &str) -> Result<String> {
            Ok(prompt.to_string())
        }
        fn name(&self) -> &str {
            "echo"
        }
        fn model(&self) -> &str {
            "echo"
        }
    }

    fn task(title: &str, description: &str) -> TaskInfo {
        TaskInfo {
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    #[tokio::test]
    async fn test_analyze_task_prompt() {
        let advisor = TaskAdvisor::new(Arc::new(EchoProvider));
        let prompt = advisor.analyze_task("Write report", "Q3 numbers").await.unwrap();
        assert!(prompt.starts_with("Analyze this task:\nTitle: Write report\nDescription: Q3 numbers\n\n"));
        assert!(prompt.ends_with("- potential_challenges (list)"));
    }

    #[tokio::test]
    async fn test_summary_lists_every_task() {
        let advisor = TaskAdvisor::new(Arc::new(EchoProvider));
        let tasks = vec![task("A", "first"), task("B", "second")];
        let prompt = advisor.generate_task_summary(&tasks).await.unwrap();
        assert!(prompt.contains("- A: first\n- B: second\n\n"));
    }

    #[tokio::test]
    async fn test_optimization_prompt_includes_context() {
        let advisor = TaskAdvisor::new(Arc::new(EchoProvider));
        let all = vec![task("A", "first"), task("B", "second")];
        let prompt = advisor.suggest_task_optimization(&all[0], &all).await.unwrap();
        assert!(prompt.contains("Current Task: A\nDescription: first"));
        assert!(prompt.contains("Other Tasks:\n- A: first\n- B: second"));
    }
}
