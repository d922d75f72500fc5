//! M3U8 playlist parsing utilities
//!
//! Only the subset the workflow needs: relative segment paths under the
//! `ts/` prefix and the `segment_size=` hints carried on `#EXTINF:` lines.

use regex::Regex;
use std::sync::OnceLock;

use crate::core::models::{WorkflowError, WorkflowResult};

/// Prefix identifying a segment path line
pub const SEGMENT_PATH_PREFIX: &str = "ts/";

/// Metadata tag carrying the per-segment size hint
pub const SEGMENT_INFO_TAG: &str = "#EXTINF:";

/// Segments parsed from a playlist, in playback order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentList {
    pub segments: Vec<String>,
    pub total_size: u64,
}

fn segment_size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"segment_size=(\d+)").expect("valid segment_size pattern"))
}

/// Segments are stored under their final path component, which must name a file
fn has_file_name(segment: &str) -> bool {
    let name = segment.rsplit('/').next().unwrap_or_default();
    !matches!(name, "" | "." | "..")
}

/// Parse playlist text into its ordered segment list and declared total size.
///
/// Fails with `InvalidContent` when no segment lines are found, a segment
/// path ends without a file name (`ts/`, `ts/..`), or the declared sizes
/// sum to zero.
pub fn parse_segment_list(content: &str) -> WorkflowResult<SegmentList> {
    let mut segments = Vec::new();
    let mut total_size = 0u64;

    for line in content.lines() {
        let line = line.trim();

        if line.starts_with(SEGMENT_PATH_PREFIX) {
            if !has_file_name(line) {
                return Err(WorkflowError::InvalidContent(format!(
                    "segment path without a file name: {}",
                    line
                )));
            }
            segments.push(line.to_string());
        } else if line.starts_with(SEGMENT_INFO_TAG) {
            if let Some(size) = segment_size_pattern()
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
            {
                total_size = total_size.saturating_add(size);
            }
        }
    }

    if segments.is_empty() {
        return Err(WorkflowError::InvalidContent(
            "playlist contains no segments".to_string(),
        ));
    }
    if total_size == 0 {
        return Err(WorkflowError::InvalidContent(
            "playlist declares no segment sizes".to_string(),
        ));
    }

    tracing::debug!(
        "Parsed {} segments, declared size {} bytes",
        segments.len(),
        total_size
    );

    Ok(SegmentList {
        segments,
        total_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXTINF:9.009,segment_size=1200
ts/lesson-000.ts
#EXTINF:9.009,segment_size=800
ts/lesson-001.ts
#EXTINF:3.003,segment_size=500
ts/lesson-002.ts
#EXT-X-ENDLIST";

    #[test]
    fn test_parse_segments_in_order() {
        let list = parse_segment_list(PLAYLIST).unwrap();

        assert_eq!(
            list.segments,
            vec!["ts/lesson-000.ts", "ts/lesson-001.ts", "ts/lesson-002.ts"]
        );
        assert_eq!(list.total_size, 2500);
    }

    #[test]
    fn test_ignores_lines_without_prefix() {
        let content = "#EXTM3U
#EXTINF:4.0,segment_size=10
https://other.example.com/abs.ts
#EXTINF:4.0,segment_size=20
ts/kept.ts
video/skipped.ts";

        let list = parse_segment_list(content).unwrap();
        assert_eq!(list.segments, vec!["ts/kept.ts"]);
        // sizes are summed independently of which lines were kept
        assert_eq!(list.total_size, 30);
    }

    #[test]
    fn test_handles_crlf_line_endings() {
        let content = "#EXTM3U\r\n#EXTINF:1.0,segment_size=7\r\nts/a.ts\r\n";
        let list = parse_segment_list(content).unwrap();
        assert_eq!(list.segments, vec!["ts/a.ts"]);
        assert_eq!(list.total_size, 7);
    }

    #[test]
    fn test_rejects_empty_segment_list() {
        let content = "#EXTM3U\n#EXTINF:9.0,segment_size=100\n#EXT-X-ENDLIST";
        let result = parse_segment_list(content);
        assert!(matches!(result, Err(WorkflowError::InvalidContent(_))));
    }

    #[test]
    fn test_rejects_zero_total_size() {
        let content = "#EXTM3U\n#EXTINF:9.0,\nts/a.ts\n#EXTINF:9.0,segment_size=0\nts/b.ts";
        let result = parse_segment_list(content);
        assert!(matches!(result, Err(WorkflowError::InvalidContent(_))));
    }

    #[test]
    fn test_rejects_segment_paths_without_file_name() {
        for bad in ["ts/", "ts/..", "ts/.", "ts/sub/"] {
            let content = format!(
                "#EXTINF:1.0,segment_size=2\nts/0.ts\n#EXTINF:1.0,segment_size=2\n{}\n",
                bad
            );
            assert!(
                matches!(
                    parse_segment_list(&content),
                    Err(WorkflowError::InvalidContent(_))
                ),
                "{} should be rejected",
                bad
            );
        }

        // parent components are fine as long as the last one names a file
        let list = parse_segment_list("#EXTINF:1.0,segment_size=2\nts/../x.ts\n").unwrap();
        assert_eq!(list.segments, vec!["ts/../x.ts"]);
    }
}
