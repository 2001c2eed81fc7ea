use siteguard_core::config::AppConfig;
use siteguard_core::domain::MemoryScope;
use siteguard_core::memory::MemoryStore;
use siteguard_db::MarkdownMemoryStore;

use super::CommandResult;

const COMMAND: &str = "memory";

/// Lists committed memories, optionally for one scope only.
pub async fn run(config: &AppConfig, scope: Option<MemoryScope>) -> CommandResult {
    let store = MarkdownMemoryStore::new(&config.memory.user_path, &config.memory.organization_path);
    let entries = match scope {
        Some(scope) => store.read(scope).await,
        None => store.read_all().await,
    };

    match entries {
        Ok(entries) if entries.is_empty() => CommandResult::text(0, "no memories recorded"),
        Ok(entries) => {
            let lines: Vec<String> = entries
                .iter()
                .map(|entry| {
                    format!(
                        "- [{}] [{}] [{}] {}",
                        entry.created_at.format("%Y-%m-%d %H:%M"),
                        entry.scope,
                        entry.category,
                        entry.content
                    )
                })
                .collect();
            CommandResult::text(0, lines.join("\n"))
        }
        Err(error) => CommandResult::failure(COMMAND, "memory_store", error.to_string(), 2),
    }
}
