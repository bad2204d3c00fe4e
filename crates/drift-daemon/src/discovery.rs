//! Related-track discovery via yt-dlp.
//!
//! One run = one yt-dlp invocation. The runner spawns the tool, streams its
//! stdout into an in-memory accumulator, and only after the process has
//! exited parses the JSON-per-line output, drops the just-played url, and
//! draws a winner from the top of what remains. The terminal outcome is
//! delivered exactly once on the daemon event channel; the runner task never
//! touches shared state itself.
//!
//! There is no timeout: a run with a hung yt-dlp stays alive until the
//! process exits.

use rand::Rng;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use drift_core::config::DiscoveryConfig;

use crate::core::DaemonEvent;

/// One possible next track, parsed from a line of yt-dlp output.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayCandidate {
    pub url: String,
    pub title: String,
}

/// Terminal failures of one discovery run. None of these are fatal to the
/// daemon; each surfaces as a single warning notice.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("could not launch yt-dlp: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("yt-dlp reported an error (exit code {0:?})")]
    Tool(Option<i32>),
    #[error("no related tracks found")]
    NoCandidates,
}

/// Decode one output line into a candidate, or reject it.
///
/// Rejects on malformed JSON, a non-object value, or an empty url. Prefers
/// `webpage_url` over `url`; the title falls back to "Unknown".
pub fn parse_candidate(line: &str) -> Option<PlayCandidate> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    let obj = value.as_object()?;

    let url = obj
        .get("webpage_url")
        .and_then(Value::as_str)
        .or_else(|| obj.get("url").and_then(Value::as_str))
        .unwrap_or("");
    if url.is_empty() {
        return None;
    }

    let title = obj.get("title").and_then(Value::as_str).unwrap_or("Unknown");
    Some(PlayCandidate {
        url: url.to_string(),
        title: title.to_string(),
    })
}

/// Drop any candidate matching `excluded`, then pick uniformly at random
/// among the first `shortlist` survivors. Search results arrive most-relevant
/// first, so bounding the draw keeps playback on-topic while still varying.
pub fn select_candidate<R: Rng>(
    candidates: Vec<PlayCandidate>,
    excluded: &str,
    shortlist: usize,
    rng: &mut R,
) -> Option<PlayCandidate> {
    let mut filtered: Vec<PlayCandidate> = candidates
        .into_iter()
        .filter(|c| c.url != excluded)
        .collect();
    if filtered.is_empty() {
        return None;
    }
    let bound = filtered.len().min(shortlist.max(1));
    let idx = rng.gen_range(0..bound);
    Some(filtered.swap_remove(idx))
}

/// Fire off one discovery run. Returns immediately; the outcome arrives as a
/// [`DaemonEvent::Discovery`] on `event_tx`.
pub fn spawn_search(seed: String, config: DiscoveryConfig, event_tx: mpsc::Sender<DaemonEvent>) {
    tokio::spawn(async move {
        let program =
            drift_core::platform::find_ytdlp_binary().unwrap_or_else(|| PathBuf::from("yt-dlp"));
        let outcome = run_tool(&program, &seed, &config).await;
        let _ = event_tx.send(DaemonEvent::Discovery(outcome)).await;
    });
}

async fn run_tool(
    program: &Path,
    seed: &str,
    config: &DiscoveryConfig,
) -> Result<PlayCandidate, DiscoveryError> {
    let query = format!("ytsearch{}:related to {}", config.result_count, seed);
    debug!("discovery: {} {:?}", program.display(), query);

    let mut child = Command::new(program)
        .arg("--flat-playlist")
        .arg("-j")
        .arg("--no-warnings")
        .arg("--default-search")
        .arg("ytsearch")
        .arg(&query)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    // Stream stdout chunks into the accumulator in arrival order. Parsing
    // waits until the process has exited, so a record can never be split
    // across a partial read.
    let mut output = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        let mut chunk = [0u8; 4096];
        loop {
            match stdout.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => output.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    debug!("discovery: stdout read ended early: {}", e);
                    break;
                }
            }
        }
    }

    let status = child.wait().await?;
    if !status.success() {
        return Err(DiscoveryError::Tool(status.code()));
    }

    let text = String::from_utf8_lossy(&output);
    let candidates: Vec<PlayCandidate> = text.lines().filter_map(parse_candidate).collect();
    info!(
        "discovery: {} usable candidate(s) from {} line(s)",
        candidates.len(),
        text.lines().count()
    );

    select_candidate(candidates, seed, config.shortlist, &mut rand::thread_rng())
        .ok_or(DiscoveryError::NoCandidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cand(url: &str) -> PlayCandidate {
        PlayCandidate {
            url: url.to_string(),
            title: "t".to_string(),
        }
    }

    // ── parser ────────────────────────────────────────────────────────────

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_candidate("").is_none());
        assert!(parse_candidate("not json at all").is_none());
        assert!(parse_candidate("{\"broken\":").is_none());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(parse_candidate("42").is_none());
        assert!(parse_candidate("[1, 2, 3]").is_none());
        assert!(parse_candidate("\"just a string\"").is_none());
        assert!(parse_candidate("null").is_none());
    }

    #[test]
    fn test_parse_rejects_missing_or_empty_url() {
        assert!(parse_candidate(r#"{"title": "Song"}"#).is_none());
        assert!(parse_candidate(r#"{"webpage_url": "", "title": "Song"}"#).is_none());
        assert!(parse_candidate(r#"{"webpage_url": 7, "url": 7}"#).is_none());
    }

    #[test]
    fn test_parse_prefers_webpage_url() {
        let c = parse_candidate(r#"{"webpage_url": "https://x/b", "url": "https://x/raw", "title": "Song B"}"#)
            .unwrap();
        assert_eq!(c.url, "https://x/b");
        assert_eq!(c.title, "Song B");
    }

    #[test]
    fn test_parse_falls_back_to_url_field() {
        let c = parse_candidate(r#"{"url": "https://x/a"}"#).unwrap();
        assert_eq!(c.url, "https://x/a");
        assert_eq!(c.title, "Unknown");
    }

    #[test]
    fn test_parse_non_string_title_defaults() {
        let c = parse_candidate(r#"{"url": "https://x/a", "title": 12}"#).unwrap();
        assert_eq!(c.title, "Unknown");
    }

    // ── selector ──────────────────────────────────────────────────────────

    #[test]
    fn test_select_never_returns_excluded() {
        let candidates = vec![cand("https://x/a"), cand("https://x/b"), cand("https://x/c")];
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let winner = select_candidate(candidates.clone(), "https://x/a", 3, &mut rng).unwrap();
            assert_ne!(winner.url, "https://x/a");
        }
    }

    #[test]
    fn test_select_none_iff_filtered_empty() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(select_candidate(vec![], "https://x/a", 3, &mut rng).is_none());
        assert!(select_candidate(vec![cand("https://x/a")], "https://x/a", 3, &mut rng).is_none());
        assert!(select_candidate(vec![cand("https://x/b")], "https://x/a", 3, &mut rng).is_some());
    }

    #[test]
    fn test_select_winner_within_shortlist() {
        let candidates: Vec<PlayCandidate> =
            (0..6).map(|i| cand(&format!("https://x/{i}"))).collect();
        let head: Vec<String> = candidates[..3].iter().map(|c| c.url.clone()).collect();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let winner = select_candidate(candidates.clone(), "none", 3, &mut rng).unwrap();
            assert!(head.contains(&winner.url), "winner {} outside top 3", winner.url);
        }
    }

    #[test]
    fn test_select_narrows_below_shortlist() {
        let candidates = vec![cand("https://x/a"), cand("https://x/b")];
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            // Must not index out of bounds with only 2 survivors
            assert!(select_candidate(candidates.clone(), "none", 3, &mut rng).is_some());
        }
    }

    #[test]
    fn test_parse_and_select_scenario() {
        let stdout = concat!(
            "{\"webpage_url\":\"https://x/b\",\"title\":\"Song B\"}\n",
            "{\"url\":\"https://x/a\",\"title\":\"Song A\"}\n",
            "{\"webpage_url\":\"https://x/c\",\"title\":\"Song C\"}",
        );
        let candidates: Vec<PlayCandidate> = stdout.lines().filter_map(parse_candidate).collect();
        assert_eq!(candidates.len(), 3);
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let winner =
                select_candidate(candidates.clone(), "https://x/a", 3, &mut rng).unwrap();
            assert!(winner.url == "https://x/b" || winner.url == "https://x/c");
        }
    }

    // ── runner (against a stand-in tool) ──────────────────────────────────

    #[cfg(unix)]
    fn fake_tool(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_success() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = fake_tool(
            &dir,
            r#"cat <<'EOF'
{"webpage_url":"https://x/b","title":"Song B"}
garbage line
{"webpage_url":"https://x/c","title":"Song C"}
EOF"#,
        );
        let winner = run_tool(&tool, "https://x/a", &DiscoveryConfig::default())
            .await
            .unwrap();
        assert!(winner.url == "https://x/b" || winner.url == "https://x/c");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_nonzero_exit_is_tool_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        // Partial output before a failing exit must not produce a winner
        let tool = fake_tool(
            &dir,
            "echo '{\"webpage_url\":\"https://x/b\",\"title\":\"Song B\"}'\nexit 1",
        );
        let err = run_tool(&tool, "https://x/a", &DiscoveryConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Tool(Some(1))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_only_excluded_is_no_candidates() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = fake_tool(
            &dir,
            "echo '{\"webpage_url\":\"https://x/a\",\"title\":\"Song A\"}'",
        );
        let err = run_tool(&tool, "https://x/a", &DiscoveryConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoCandidates));
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary_is_spawn_failure() {
        let err = run_tool(
            Path::new("/nonexistent/definitely-not-yt-dlp"),
            "https://x/a",
            &DiscoveryConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DiscoveryError::Spawn(_)));
    }
}
