use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use siteguard_agent::{
    DecisionRequest, HeuristicMemoryJudge, KeywordRetriever, LlmMemoryJudge, OpenAiCompatibleClient, OpenMeteoClient,
    WorkflowCoordinator, WorkflowSettings,
};
use siteguard_core::config::{AppConfig, JudgeKind};
use siteguard_core::domain::SafetyDecision;
use siteguard_core::errors::WorkflowError;
use siteguard_core::memory::{CommitOutcome, MemoryJudge, MemoryPolicy};
use siteguard_db::MarkdownMemoryStore;

use super::CommandResult;

const COMMAND: &str = "check";

/// Exit code for a completed check that does not clear operations.
pub const EXIT_BLOCKED: u8 = 1;

#[derive(Debug, Clone)]
pub struct CheckArgs {
    pub site: String,
    pub operation: String,
    pub rules: PathBuf,
    pub message: Option<String>,
    pub no_weather: bool,
    pub json: bool,
}

#[derive(Serialize)]
struct CheckPayload<'a> {
    command: &'static str,
    status: &'static str,
    decision: &'a SafetyDecision,
    committed: Vec<String>,
}

pub async fn run(args: CheckArgs, config: &AppConfig) -> CommandResult {
    let retriever = match KeywordRetriever::from_dir(&args.rules).await {
        Ok(retriever) if retriever.chunk_count() > 0 => retriever,
        Ok(_) => {
            return CommandResult::failure(
                COMMAND,
                "rules_unavailable",
                format!("no rule documents found in `{}`", args.rules.display()),
                2,
            )
        }
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "rules_unavailable",
                format!("could not read rules from `{}`: {error}", args.rules.display()),
                2,
            )
        }
    };

    let coordinator = match build_coordinator(retriever, config, args.no_weather) {
        Ok(coordinator) => coordinator,
        Err(error) => return CommandResult::failure(COMMAND, "startup", format!("{error:#}"), 2),
    };

    let mut request = DecisionRequest::new(args.site, args.operation);
    if let Some(message) = args.message {
        request = request.with_interaction(message);
    }

    match coordinator.check(request).await {
        Ok(outcome) => {
            let exit_code = if outcome.decision.can_proceed { 0 } else { EXIT_BLOCKED };
            let committed = committed_lines(&outcome.commits);
            let output = if args.json {
                render_json(&outcome.decision, committed)
            } else {
                render_text(&outcome.decision, &committed)
            };
            CommandResult::text(exit_code, output)
        }
        Err(WorkflowError::Fatal(message)) => CommandResult::failure(COMMAND, "workflow_fatal", message, 3),
        Err(error) => CommandResult::failure(COMMAND, "workflow", error.to_string(), 3),
    }
}

fn build_coordinator(
    retriever: KeywordRetriever,
    config: &AppConfig,
    no_weather: bool,
) -> anyhow::Result<WorkflowCoordinator> {
    let store = MarkdownMemoryStore::new(&config.memory.user_path, &config.memory.organization_path);
    let judge: Arc<dyn MemoryJudge> = match config.memory.judge {
        JudgeKind::Heuristic => Arc::new(HeuristicMemoryJudge::new()),
        JudgeKind::Llm => Arc::new(LlmMemoryJudge::new(OpenAiCompatibleClient::from_config(&config.llm)?)),
    };

    let mut coordinator = WorkflowCoordinator::new(Arc::new(retriever), Arc::new(store), judge)
        .with_policy(MemoryPolicy::new(config.memory.min_confidence))
        .with_settings(WorkflowSettings::from(&config.workflow));

    if config.weather.enabled && !no_weather {
        let timeout = Duration::from_millis(config.workflow.weather_timeout_ms);
        let weather = OpenMeteoClient::from_config(&config.weather, timeout).context("weather client")?;
        coordinator = coordinator.with_weather(Arc::new(weather));
    }
    Ok(coordinator)
}

fn committed_lines(commits: &[CommitOutcome]) -> Vec<String> {
    commits
        .iter()
        .filter_map(|commit| match commit {
            CommitOutcome::Committed(entry) => Some(format!("[{}] [{}] {}", entry.scope, entry.category, entry.content)),
            CommitOutcome::Rejected(_) => None,
        })
        .collect()
}

fn render_json(decision: &SafetyDecision, committed: Vec<String>) -> String {
    let payload = CheckPayload { command: COMMAND, status: "ok", decision, committed };
    serde_json::to_string_pretty(&payload).unwrap_or_else(|error| {
        CommandResult::failure(COMMAND, "serialization", error.to_string(), 3).output
    })
}

fn render_text(decision: &SafetyDecision, committed: &[String]) -> String {
    let verdict = if decision.can_proceed { "CLEAR" } else { "HOLD" };
    let mut lines = vec![format!("{verdict}: {} at {}", decision.operation, decision.site), String::new()];
    lines.push(decision.reasoning.clone());

    if !decision.recommendations.is_empty() {
        lines.push(String::new());
        lines.push("Recommendations:".to_string());
        lines.extend(decision.recommendations.iter().map(|recommendation| format!("- {recommendation}")));
    }
    if !decision.citations.is_empty() {
        lines.push(String::new());
        lines.push("Sources:".to_string());
        lines.extend(
            decision
                .citations
                .iter()
                .map(|citation| format!("{citation} (relevance {:.2})", citation.relevance)),
        );
    }
    if !committed.is_empty() {
        lines.push(String::new());
        lines.push("Remembered:".to_string());
        lines.extend(committed.iter().map(|line| format!("- {line}")));
    }
    lines.join("\n")
}
