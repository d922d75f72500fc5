//! 片段合并
//!
//! Raw byte concatenation of downloaded segments, in playlist order, into
//! the workspace's output file. Blocking I/O; callers run it on a blocking
//! worker thread.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::models::{WorkflowError, WorkflowResult, WorkflowState, WorkspaceLayout};

fn combine_error(path: &Path, source: std::io::Error) -> WorkflowError {
    WorkflowError::Combine {
        path: path.to_path_buf(),
        source,
    }
}

/// 合并片段为最终文件
pub fn merge_segments(
    layout: &WorkspaceLayout,
    state: &WorkflowState,
    buffer_size: usize,
) -> WorkflowResult<PathBuf> {
    let output_path = layout.output_file();
    tracing::info!(
        "合并 {} 个片段到: {}",
        state.segments.len(),
        output_path.display()
    );

    let output = File::create(&output_path).map_err(|e| combine_error(&output_path, e))?;
    let mut writer = BufWriter::with_capacity(buffer_size.max(1), output);

    for (index, segment) in state.segments.iter().enumerate() {
        let segment_path = layout.segment_file(state, segment);
        tracing::debug!(
            "合并片段 {}/{}: {}",
            index + 1,
            state.segments.len(),
            segment_path.display()
        );

        let mut reader = File::open(&segment_path).map_err(|e| combine_error(&segment_path, e))?;
        std::io::copy(&mut reader, &mut writer).map_err(|e| combine_error(&segment_path, e))?;
    }

    writer.flush().map_err(|e| combine_error(&output_path, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| combine_error(&output_path, e))?;

    tracing::info!("片段合并完成");
    Ok(output_path)
}
