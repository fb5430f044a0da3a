//! Prompt templates for the text generator.
//!
//! Each builder returns a `(system, user)` pair. JSON-producing prompts spell
//! out the exact shape that [`codewiki_core::schema`] accepts.

use crate::traits::{AnswerRequest, OverviewRequest, PageRequest, TopicRequest};
use codewiki_core::retrieval::truncate_chars;

/// Per-file character cap inside a page prompt.
const MAX_FILE_CHARS: usize = 12_000;
/// Character cap for all file sections of one page prompt together.
const MAX_PAGE_SOURCE_CHARS: usize = 120_000;
const MAX_README_CHARS: usize = 8_000;
const MAX_MANIFEST_CHARS: usize = 4_000;

pub fn topic_prompt(req: &TopicRequest) -> (String, String) {
    let system = format!(
        "You are a senior engineer writing onboarding documentation. \
         Identify the user-facing features and major subsystems of a repository. \
         Respond with a JSON object only:\n\
         {{\"topics\": [{{\"id\": \"kebab-case-id\", \"title\": \"...\", \"summary\": \"one or two sentences\", \"files\": [\"path/in/tree\"]}}]}}\n\
         Return at most {} topics, most important first. Only list files that appear in the tree.",
        req.max_topics
    );

    let mut user = format!("Repository: {}\n", req.repo);
    if let Some(description) = &req.description {
        user.push_str(&format!("Description: {}\n", description));
    }
    if let Some(language) = &req.language {
        user.push_str(&format!("Primary language: {}\n", language));
    }
    user.push_str("\nFile tree:\n");
    user.push_str(&req.tree);

    if let Some(readme) = &req.readme {
        user.push_str("\nREADME:\n");
        user.push_str(&truncate_chars(readme, MAX_README_CHARS));
        user.push('\n');
    }
    for (path, content) in &req.manifests {
        user.push_str(&format!("\n{}:\n", path));
        user.push_str(&truncate_chars(content, MAX_MANIFEST_CHARS));
        user.push('\n');
    }
    (system, user)
}

pub fn page_prompt(req: &PageRequest) -> (String, String) {
    let system = "You write one wiki page about a single feature of a codebase, \
        for a developer who has never seen it. Explain how the feature works end to end, \
        using level-2 markdown headings (## ) for sections. Ground every claim in the \
        source shown; cite line ranges. Respond with a JSON object only:\n\
        {\"body\": \"markdown\", \"entry_points\": [{\"file\": \"path\", \"line\": 1, \"symbol\": \"name\"}], \
        \"citations\": [{\"file\": \"path\", \"start_line\": 1, \"end_line\": 10}]}"
        .to_string();

    let mut user = format!(
        "Repository: {} (branch {})\nFeature: {}\nSummary: {}\n\nSource files (line-numbered):\n",
        req.repo, req.branch, req.topic.title, req.topic.summary
    );

    let mut budget = MAX_PAGE_SOURCE_CHARS;
    for (path, content) in &req.files {
        if budget == 0 {
            break;
        }
        let numbered = number_lines(&truncate_chars(content, MAX_FILE_CHARS.min(budget)));
        budget = budget.saturating_sub(numbered.len());
        user.push_str(&format!("\n=== {} ===\n{}", path, numbered));
    }
    (system, user)
}

pub fn overview_prompt(req: &OverviewRequest) -> (String, String) {
    let system = "You write the landing page of a repository wiki: what the project is, \
        who it is for, and how its features fit together. Plain markdown, no JSON, \
        at most a few paragraphs."
        .to_string();

    let mut user = format!("Repository: {}\n", req.repo);
    if let Some(description) = &req.description {
        user.push_str(&format!("Description: {}\n", description));
    }
    if let Some(readme) = &req.readme {
        user.push_str("\nREADME:\n");
        user.push_str(&truncate_chars(readme, MAX_README_CHARS));
        user.push('\n');
    }
    user.push_str("\nDocumented features:\n");
    if req.topics.is_empty() {
        user.push_str("(none could be documented)\n");
    }
    for (title, summary) in &req.topics {
        user.push_str(&format!("- {}: {}\n", title, summary));
    }
    (system, user)
}

pub fn answer_prompt(req: &AnswerRequest) -> (String, String) {
    let system = format!(
        "You answer questions about the repository {} using only the context provided. \
         Mention source files when you rely on them. If the context does not contain \
         the answer, say so.",
        req.repo
    );
    let user = format!("Context:\n{}\n\nQuestion: {}", req.context.text, req.question);
    (system, user)
}

fn number_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for (i, line) in text.lines().enumerate() {
        out.push_str(&format!("{:>5} | {}\n", i + 1, line));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use codewiki_core::models::{IdentifiedTopic, RepoRef};

    #[test]
    fn test_page_prompt_numbers_lines() {
        let req = PageRequest {
            repo: RepoRef::new("acme", "widgets"),
            branch: "main".to_string(),
            topic: IdentifiedTopic {
                id: "auth".to_string(),
                title: "Auth".to_string(),
                summary: "Login flow".to_string(),
                files: vec!["src/auth.rs".to_string()],
            },
            files: vec![("src/auth.rs".to_string(), "fn login() {}\nfn logout() {}\n".to_string())],
        };
        let (_, user) = page_prompt(&req);
        assert!(user.contains("=== src/auth.rs ==="));
        assert!(user.contains("    2 | fn logout() {}"));
    }

    #[test]
    fn test_topic_prompt_states_cap() {
        let req = TopicRequest {
            repo: RepoRef::new("acme", "widgets"),
            description: None,
            language: Some("Rust".to_string()),
            tree: "src/\n  lib.rs\n".to_string(),
            readme: Some("# Widgets".to_string()),
            manifests: vec![("Cargo.toml".to_string(), "[package]".to_string())],
            max_topics: 7,
        };
        let (system, user) = topic_prompt(&req);
        assert!(system.contains("at most 7 topics"));
        assert!(user.contains("Primary language: Rust"));
        assert!(user.contains("Cargo.toml:\n[package]"));
    }
}
