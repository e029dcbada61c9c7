use canvass_scraper_lib::gitlab::{
    build_summary_prompt, format_diff, git_diff, FileReview, GeminiClient, GitLabClient,
    BOT_COMMENT_HEADER, MAX_FILES_TO_ANALYZE, MAX_PROMPT_CHARS,
};
use canvass_scraper_lib::logger;
use canvass_scraper_lib::telemetry::require_env;

use std::error::Error;
use std::path::PathBuf;
use log::{info, warn};

const SUMMARY_MODEL: &str = "gemini-2.5-pro";

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();

    let project_id = require_env("CI_MERGE_REQUEST_PROJECT_ID")?;
    let mr_iid = require_env("CI_MERGE_REQUEST_IID")?;
    let api_url = require_env("CI_API_V4_URL")?;
    let token = require_env("GITLAB_TOKEN")?;
    let gemini_key = require_env("GEMINI_API_KEY")?;
    let project_dir = PathBuf::from(require_env("CI_PROJECT_DIR")?);

    let gitlab = GitLabClient::new(api_url, project_id, token);
    let existing_note = gitlab.existing_summary_note(&mr_iid)?;

    let details = gitlab.mr_details(&mr_iid)?;
    let changes = gitlab.mr_changes(&mr_iid)?;
    if changes.is_empty() {
        info!("No changed files; nothing to summarize.");
        return Ok(());
    }
    if changes.len() > MAX_FILES_TO_ANALYZE {
        info!(
            "Skipping summary: more than {} files were changed.",
            MAX_FILES_TO_ANALYZE
        );
        return Ok(());
    }

    let base_sha = &details.diff_refs.base_sha;
    let head_sha = &details.diff_refs.head_sha;

    let mut files = Vec::new();
    for change in &changes {
        let path = match change.new_path.as_deref().or(change.old_path.as_deref()) {
            Some(p) => p,
            None => continue,
        };
        let diff = match git_diff(&project_dir, base_sha, head_sha, path) {
            Ok(d) if !d.trim().is_empty() => d,
            Ok(_) => continue,
            Err(e) => {
                warn!("Could not diff {}: {}", path, e);
                continue;
            }
        };

        let new_content = match (&change.new_path, change.deleted_file) {
            (Some(new_path), false) => gitlab.file_at_ref(new_path, head_sha).unwrap_or_default(),
            _ => String::new(),
        };
        let old_content = match (&change.old_path, change.new_file) {
            (Some(old_path), false) => gitlab.file_at_ref(old_path, base_sha).unwrap_or_default(),
            _ => String::new(),
        };

        files.push(FileReview {
            new_path: path.to_string(),
            new_content,
            old_content,
            numbered_diff: format_diff(&diff),
        });
    }
    if files.is_empty() {
        info!("No reviewable diffs; nothing to summarize.");
        return Ok(());
    }

    let prompt = build_summary_prompt(&details.title, &details.description, &files);
    if prompt.len() > MAX_PROMPT_CHARS {
        warn!(
            "Prompt size ({} chars) exceeds the {} char limit. This MR is too large for a single request.",
            prompt.len(),
            MAX_PROMPT_CHARS
        );
        return Ok(());
    }

    let summary = GeminiClient::new(gemini_key).generate(SUMMARY_MODEL, &prompt)?;
    if summary.is_empty() {
        warn!("Model returned an empty summary; not posting.");
        return Ok(());
    }

    let comment = format!("{}\n\n{}", BOT_COMMENT_HEADER, summary);
    gitlab.post_summary(&mr_iid, &comment, existing_note)?;
    info!("Summary comment {}.", if existing_note.is_some() { "updated" } else { "posted" });
    Ok(())
}
