use std::path::Path;
use std::process::Command;
use std::time::Duration;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use log::{error, warn};
use thiserror::Error;

pub const BOT_COMMENT_HEADER: &str = "✨ **MR Summary by Gemini:**";
pub const MAX_PROMPT_CHARS: usize = 800_000;
pub const MAX_FILES_TO_ANALYZE: usize = 40;

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("api call failed with status {0}")]
    Status(reqwest::StatusCode),
    #[error("git diff failed: {0}")]
    Diff(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
pub struct DiffRefs {
    pub base_sha: String,
    pub start_sha: String,
    pub head_sha: String,
}

#[derive(Debug, Deserialize)]
pub struct MrDetails {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub diff_refs: DiffRefs,
}

#[derive(Debug, Deserialize)]
pub struct FileChange {
    pub new_path: Option<String>,
    pub old_path: Option<String>,
    #[serde(default)]
    pub new_file: bool,
    #[serde(default)]
    pub deleted_file: bool,
}

#[derive(Debug, Deserialize)]
struct Note {
    id: u64,
    body: String,
    position: Option<serde_json::Value>,
}

/// Everything assembled for one changed file before prompting.
pub struct FileReview {
    pub new_path: String,
    pub new_content: String,
    pub old_content: String,
    pub numbered_diff: String,
}

pub struct GitLabClient {
    http: Client,
    pub api_url: String,
    pub project_id: String,
    token: String,
}

impl GitLabClient {
    pub fn new(api_url: String, project_id: String, token: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build GitLab HTTP client");
        GitLabClient { http, api_url, project_id, token }
    }

    fn mr_url(&self, mr_iid: &str) -> String {
        format!(
            "{}/projects/{}/merge_requests/{}",
            self.api_url, self.project_id, mr_iid
        )
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, BotError> {
        let response = self
            .http
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()?;
        if !response.status().is_success() {
            return Err(BotError::Status(response.status()));
        }
        Ok(response)
    }

    pub fn mr_details(&self, mr_iid: &str) -> Result<MrDetails, BotError> {
        Ok(self.get(&self.mr_url(mr_iid))?.json()?)
    }

    pub fn mr_changes(&self, mr_iid: &str) -> Result<Vec<FileChange>, BotError> {
        #[derive(Deserialize)]
        struct Changes {
            changes: Vec<FileChange>,
        }
        let parsed: Changes = self.get(&format!("{}/changes", self.mr_url(mr_iid)))?.json()?;
        Ok(parsed.changes)
    }

    /// The bot's earlier summary note, if one exists: a top-level note
    /// (no position) whose body starts with the bot header.
    pub fn existing_summary_note(&self, mr_iid: &str) -> Result<Option<u64>, BotError> {
        let notes: Vec<Note> = self.get(&format!("{}/notes", self.mr_url(mr_iid)))?.json()?;
        Ok(notes
            .into_iter()
            .find(|n| n.position.is_none() && n.body.starts_with(BOT_COMMENT_HEADER))
            .map(|n| n.id))
    }

    /// Raw file content at a ref; None when the file cannot be fetched
    /// (the prompt then simply omits it).
    pub fn file_at_ref(&self, file_path: &str, ref_sha: &str) -> Option<String> {
        let url = format!(
            "{}/projects/{}/repository/files/{}/raw?ref={}",
            self.api_url,
            self.project_id,
            urlencoding::encode(file_path),
            ref_sha
        );
        match self.get(&url) {
            Ok(response) => response.text().ok(),
            Err(e) => {
                warn!("Error fetching file content for {} at {}: {}", file_path, ref_sha, e);
                None
            }
        }
    }

    /// Creates the summary note, or updates the existing one in place.
    pub fn post_summary(
        &self,
        mr_iid: &str,
        body: &str,
        existing_note_id: Option<u64>,
    ) -> Result<(), BotError> {
        let (url, is_update) = match existing_note_id {
            Some(id) => (format!("{}/notes/{}", self.mr_url(mr_iid), id), true),
            None => (format!("{}/notes", self.mr_url(mr_iid)), false),
        };
        let request = if is_update { self.http.put(&url) } else { self.http.post(&url) };
        let response = request
            .header("PRIVATE-TOKEN", &self.token)
            .json(&json!({ "body": body }))
            .send()?;
        if !response.status().is_success() {
            error!("Error posting summary comment. Status: {}", response.status());
            return Err(BotError::Status(response.status()));
        }
        Ok(())
    }
}

/// Diff for one file between two commits, produced by the local git binary.
pub fn git_diff(
    project_dir: &Path,
    base_sha: &str,
    head_sha: &str,
    file_path: &str,
) -> Result<String, BotError> {
    let output = Command::new("git")
        .current_dir(project_dir)
        .args(["diff", base_sha, head_sha, "--", file_path])
        .output()?;
    if !output.status.success() {
        return Err(BotError::Diff(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Reformats a unified diff so every added and context line is prefixed
/// with its line number in the new file; removed lines keep a bare marker.
/// Hunk headers pass through untouched.
pub fn format_diff(diff: &str) -> String {
    let mut formatted = Vec::new();
    let mut line_number: Option<usize> = None;

    for line in diff.lines() {
        if line.starts_with("@@") {
            line_number = line
                .split('+')
                .nth(1)
                .and_then(|rest| {
                    rest.split(|c: char| c == ',' || c == ' ')
                        .next()
                        .and_then(|n| n.parse().ok())
                });
            formatted.push(line.to_string());
            continue;
        }
        let current = match line_number {
            Some(n) => n,
            None => continue, // preamble before the first hunk
        };
        match line.chars().next() {
            Some('-') => formatted.push(format!("   : -{}", &line[1..])),
            Some('+') => {
                formatted.push(format!("{:<3}: +{}", current, &line[1..]));
                line_number = Some(current + 1);
            }
            _ => {
                let content = if line.is_empty() { "" } else { &line[1..] };
                formatted.push(format!("{:<3}:  {}", current, content));
                line_number = Some(current + 1);
            }
        }
    }
    formatted.join("\n")
}

/// The full summarization prompt: reviewer instructions, the MR title and
/// description, then each file's before/after content and numbered diff.
pub fn build_summary_prompt(title: &str, description: &str, files: &[FileReview]) -> String {
    let mut parts = vec![format!(
        "You are a staff-level software engineer and a highly skilled technical writer.\n\
         Your task is to analyze a Merge Request and provide a concise yet detailed summary of its changes.\n\
         You will be provided with the MR's title and description, and then details for each changed file.\n\n\
         **Merge Request Title:** {}\n\
         **Merge Request Description:**\n{}\n\n\
         Your summary should:\n\
         1. Briefly explain the purpose of the MR based on its title, description, and changes.\n\
         2. Describe the key changes made across all files.\n\
         3. Mention notable patterns or improvements that span multiple files.\n\
         4. Be concise, in Markdown bullet points of at most 3 sentences each.\n\
         5. Assume the reader is a technical expert; describe the changes, do not evaluate them.\n\
         6. For entirely new files, state that the file was added and its high-level purpose only.\n\n\
         Divide your summary into two sections: Key Changes, then Notable Patterns / Improvements.\n\n\
         --- Start of Changed Files Data ---",
        title, description
    )];

    for file in files {
        parts.push(format!("\n### File: {}\n", file.new_path));
        if !file.old_content.is_empty() {
            parts.push(format!(
                "Full File Content (Before Changes):\n```\n{}\n```\n",
                file.old_content
            ));
        }
        parts.push(format!(
            "Full File Content (After Changes):\n```\n{}\n```\n\nNumbered Diff for {}:\n```diff\n{}\n```\n",
            file.new_content, file.new_path, file.numbered_diff
        ));
    }

    parts.push("--- End of Changed Files Data ---".to_string());
    parts.join("\n")
}

/// Minimal client for the text-generation API; only `generateContent` is
/// used, with the key passed as a query parameter.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    pub base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to build Gemini HTTP client");
        GeminiClient {
            http,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    pub fn generate(&self, model: &str, prompt: &str) -> Result<String, BotError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        let response = self.http.post(&url).json(&body).send()?;
        if !response.status().is_success() {
            return Err(BotError::Status(response.status()));
        }
        let parsed: serde_json::Value = response.json()?;
        Ok(parsed["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}
