//! Locating artifacts a tool produced on an earlier run.
//!
//! When a phase is not re-run, the orchestrator falls back to whatever the
//! tool left behind. Tools have written their outputs to several places
//! over time; the canonical location is always tried first.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Pre-existing artifacts older than this many whole days are stale.
pub const STALE_THRESHOLD_DAYS: i64 = 14;

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Entries of `dir`, empty when it cannot be read.
fn entries(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|rd| rd.filter_map(Result::ok).map(|e| e.path()).collect())
        .unwrap_or_default()
}

/// Most recently modified of `paths`, judged by `stamp`.
fn newest_by<F>(paths: impl IntoIterator<Item = PathBuf>, stamp: F) -> Option<PathBuf>
where
    F: Fn(&Path) -> Option<SystemTime>,
{
    paths
        .into_iter()
        .filter_map(|p| stamp(&p).map(|t| (t, p)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, p)| p)
}

/// Newest `output.json` a tool has written.
///
/// Order:
/// 1. `evaluation/results/output.json`
/// 2. newest `evaluation/results/<dir>/output.json`, by file mtime
/// 3. newest `outputs/<run>/output.json`, by run directory mtime
pub fn find_latest_output(tool_root: &Path) -> Option<PathBuf> {
    let results = tool_root.join("evaluation").join("results");
    let canonical = results.join("output.json");
    if canonical.exists() {
        return Some(canonical);
    }

    let nested = entries(&results)
        .into_iter()
        .filter(|p| p.is_dir())
        .map(|p| p.join("output.json"))
        .filter(|p| p.exists());
    if let Some(found) = newest_by(nested, modified) {
        return Some(found);
    }

    let runs = entries(&tool_root.join("outputs"))
        .into_iter()
        .filter(|p| p.join("output.json").exists());
    newest_by(runs, modified).map(|run| run.join("output.json"))
}

/// `evaluation/scorecard.md`, or a non-empty `evaluation/results`.
pub fn find_evaluation_output(tool_root: &Path) -> Option<PathBuf> {
    let scorecard = tool_root.join("evaluation").join("scorecard.md");
    if scorecard.exists() {
        return Some(scorecard);
    }
    let results = tool_root.join("evaluation").join("results");
    (results.is_dir() && !entries(&results).is_empty()).then_some(results)
}

/// LLM evaluation output, JSON preferred over Markdown.
///
/// Order:
/// 1. newest `evaluation/llm/results/*.json`
/// 2. `evaluation/results/llm_evaluation.json`
/// 3. newest `evaluation/llm/results/*.md`
pub fn find_llm_evaluation_output(tool_root: &Path) -> Option<PathBuf> {
    let llm_results = tool_root.join("evaluation").join("llm").join("results");
    let with_ext = |ext: &str| -> Vec<PathBuf> {
        entries(&llm_results)
            .into_iter()
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(ext))
            .collect()
    };

    if let Some(found) = newest_by(with_ext("json"), modified) {
        return Some(found);
    }
    let alternate = tool_root
        .join("evaluation")
        .join("results")
        .join("llm_evaluation.json");
    if alternate.exists() {
        return Some(alternate);
    }
    newest_by(with_ext("md"), modified)
}

/// Whole days since `path` was last modified.
pub fn age_days(path: &Path) -> Option<i64> {
    let mtime: DateTime<Utc> = modified(path)?.into();
    Some((Utc::now() - mtime).num_days())
}

/// Staleness of a located artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub age_days: i64,
}

impl Freshness {
    pub fn of(path: &Path) -> Self {
        Self {
            age_days: age_days(path).unwrap_or(0),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_days > STALE_THRESHOLD_DAYS
    }

    /// Suffix appended to a phase message.
    pub fn suffix(&self) -> &'static str {
        if self.is_stale() {
            " (stale)"
        } else {
            ""
        }
    }

    pub fn warning(&self) -> Option<String> {
        self.is_stale().then(|| {
            format!(
                "WARNING: Output is {} days old (threshold: {} days)",
                self.age_days, STALE_THRESHOLD_DAYS
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(path: &Path, days_ago: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "{}").unwrap();
        let when = SystemTime::now() - Duration::from_secs(days_ago * 86_400);
        File::options().write(true).open(path).unwrap().set_modified(when).unwrap();
    }

    #[test]
    fn test_canonical_output_wins() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("outputs/run-1/output.json"), 0);
        touch(&root.join("evaluation/results/output.json"), 30);
        assert_eq!(find_latest_output(root), Some(root.join("evaluation/results/output.json")));
    }

    #[test]
    fn test_newest_nested_output() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("evaluation/results/healthy/output.json"), 3);
        touch(&root.join("evaluation/results/broken/output.json"), 1);
        assert_eq!(
            find_latest_output(root),
            Some(root.join("evaluation/results/broken/output.json"))
        );
    }

    #[test]
    fn test_outputs_dir_fallback() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        assert!(find_latest_output(root).is_none());
        touch(&root.join("outputs/run-1/output.json"), 0);
        fs::create_dir_all(root.join("outputs/empty")).unwrap();
        assert_eq!(find_latest_output(root), Some(root.join("outputs/run-1/output.json")));
    }

    #[test]
    fn test_evaluation_output_requires_content() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("evaluation/results")).unwrap();
        assert!(find_evaluation_output(root).is_none());
        touch(&root.join("evaluation/results/checks.json"), 0);
        assert_eq!(find_evaluation_output(root), Some(root.join("evaluation/results")));
        touch(&root.join("evaluation/scorecard.md"), 0);
        assert_eq!(find_evaluation_output(root), Some(root.join("evaluation/scorecard.md")));
    }

    #[test]
    fn test_llm_output_prefers_json() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("evaluation/llm/results/summary.md"), 0);
        assert_eq!(
            find_llm_evaluation_output(root),
            Some(root.join("evaluation/llm/results/summary.md"))
        );
        touch(&root.join("evaluation/results/llm_evaluation.json"), 5);
        assert_eq!(
            find_llm_evaluation_output(root),
            Some(root.join("evaluation/results/llm_evaluation.json"))
        );
        touch(&root.join("evaluation/llm/results/run.json"), 9);
        assert_eq!(
            find_llm_evaluation_output(root),
            Some(root.join("evaluation/llm/results/run.json"))
        );
    }

    #[test]
    fn test_freshness_threshold() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("old.json");
        let recent = dir.path().join("recent.json");
        touch(&old, 20);
        touch(&recent, 14);

        let stale = Freshness::of(&old);
        assert!(stale.is_stale());
        assert_eq!(stale.suffix(), " (stale)");
        assert_eq!(
            stale.warning().as_deref(),
            Some("WARNING: Output is 20 days old (threshold: 14 days)")
        );

        let fresh = Freshness::of(&recent);
        assert!(!fresh.is_stale());
        assert!(fresh.warning().is_none());
    }
}
