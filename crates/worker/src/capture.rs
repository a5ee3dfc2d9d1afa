//! Streaming capture of sandbox output into the durable job log.
//!
//! Each complete line is appended to the log file and flushed before the
//! next one is handled, so a crash loses at most the line in flight.
//! Control lines are pushed to the registry as soon as they are seen.

use std::path::Path;

use alaska_core::output::{control_command, LineSplitter, OutputTail};
use alaska_core::types::DbId;
use alaska_db::WorkRegistry;
use alaska_sandbox::LogStream;
use futures::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::DispatchError;

/// What was observed while draining a sandbox's output.
#[derive(Debug)]
pub struct CaptureSummary {
    pub lines: usize,
    pub commands: usize,
    /// The most recent lines, for failure diagnostics.
    pub tail: String,
}

struct LineSink<'a> {
    file: File,
    job_id: DbId,
    registry: &'a dyn WorkRegistry,
    tail: OutputTail,
    lines: usize,
    commands: usize,
}

impl LineSink<'_> {
    async fn record(&mut self, line: String) -> Result<(), DispatchError> {
        self.file.write_all(format!("{line}\n").as_bytes()).await?;
        self.file.flush().await?;

        tracing::debug!(target: "sandbox_output", job_id = self.job_id, "{line}");
        if let Some(command) = control_command(&line) {
            self.registry.append_job_command(self.job_id, command).await?;
            self.commands += 1;
        }
        self.tail.push(&line);
        self.lines += 1;
        Ok(())
    }
}

/// Drain `output` into the log at `log_path` until the stream ends.
pub async fn capture_output(
    mut output: LogStream,
    log_path: &Path,
    job_id: DbId,
    registry: &dyn WorkRegistry,
    tail_lines: usize,
) -> Result<CaptureSummary, DispatchError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await?;
    let mut sink = LineSink {
        file,
        job_id,
        registry,
        tail: OutputTail::new(tail_lines),
        lines: 0,
        commands: 0,
    };
    let mut splitter = LineSplitter::new();

    while let Some(chunk) = output.next().await {
        for line in splitter.push(&chunk?) {
            sink.record(line).await?;
        }
    }
    if let Some(line) = splitter.finish() {
        sink.record(line).await?;
    }

    Ok(CaptureSummary {
        lines: sink.lines,
        commands: sink.commands,
        tail: sink.tail.render(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use alaska_core::analysis::AnalysisKind;
    use alaska_db::models::analysis::CreateAnalysis;
    use alaska_db::models::project::CreateProject;
    use alaska_db::MemoryRegistry;
    use alaska_sandbox::SandboxError;
    use assert_matches::assert_matches;

    use super::*;

    async fn running_job(registry: &MemoryRegistry) -> DbId {
        let project = registry.insert_project(CreateProject::default());
        let analysis = registry.insert_analysis(CreateAnalysis {
            code: "qc".into(),
            kind: AnalysisKind::Project,
            image: "alaska/qc".into(),
            script: "run_qc.py".into(),
            requires_id: None,
            step: 1,
            active: true,
        });
        registry.create_job(project.id, analysis.id).await.unwrap().id
    }

    fn chunks(parts: &[&[u8]]) -> LogStream {
        let items: Vec<Result<Vec<u8>, SandboxError>> =
            parts.iter().map(|p| Ok(p.to_vec())).collect();
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn lines_are_logged_in_order_across_chunks() {
        let registry = MemoryRegistry::new();
        let job_id = running_job(&registry).await;
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("qc_output.txt");

        let summary = capture_output(
            chunks(&[b"one\ntwo\n## bowtie2 --ver", b"sion\nthree\nfour"]),
            &log,
            job_id,
            &registry,
            2,
        )
        .await
        .unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents, "one\ntwo\n## bowtie2 --version\nthree\nfour\n");
        assert_eq!(summary.lines, 5);
        assert_eq!(summary.commands, 1);
        assert_eq!(summary.tail, "three\nfour");

        let job = registry.get_job(job_id).await.unwrap();
        assert_eq!(job.commands, ["bowtie2 --version"]);
    }

    #[tokio::test]
    async fn existing_log_is_appended_to() {
        let registry = MemoryRegistry::new();
        let job_id = running_job(&registry).await;
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("qc_output.txt");
        std::fs::write(&log, "earlier\n").unwrap();

        capture_output(chunks(&[b"later\n"]), &log, job_id, &registry, 10)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "earlier\nlater\n");
    }

    #[tokio::test]
    async fn stream_error_is_reported() {
        let registry = MemoryRegistry::new();
        let job_id = running_job(&registry).await;
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<Result<Vec<u8>, SandboxError>> = vec![
            Ok(b"partial\n".to_vec()),
            Err(SandboxError::Io(std::io::Error::other("pipe closed"))),
        ];

        let result = capture_output(
            Box::pin(futures::stream::iter(items)),
            &dir.path().join("log.txt"),
            job_id,
            &registry,
            10,
        )
        .await;
        assert_matches!(result, Err(DispatchError::Sandbox(SandboxError::Io(_))));
    }
}
