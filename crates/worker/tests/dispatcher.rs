//! Dispatcher behaviour against the in-memory registry and a scripted
//! sandbox:
//! - Jobs run in queue order, output lands in the log, control lines in
//!   `commands`
//! - Exactly one of the success or failure hooks fires per job
//! - A failed job is not retried and takes its project's queue with it
//! - A busy project releases the job back to its claimed position

mod common;

use std::time::Duration;

use alaska_core::analysis::AnalysisKind;
use alaska_core::paths::PathKey;
use alaska_core::progress::ProjectProgress;
use alaska_db::models::status::JobStatus;
use alaska_db::WorkRegistry;
use alaska_worker::{reconcile, Outcome};
use common::{Fixture, HookCall, Script};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn jobs_run_in_queue_order_and_capture_output() {
    let fx = Fixture::new();
    let project = fx.project().await;
    let qc = fx.analysis("qc", AnalysisKind::Project, None);
    let quant = fx.analysis("quant", AnalysisKind::Project, None);
    let first = fx.enqueue(&project, &qc, false).await;
    let second = fx.enqueue(&project, &quant, false).await;
    fx.sandbox.script(
        &format!("qc-{}", project.id),
        Script::lines(&["## bowtie2 --version", "bowtie2 version 2.5.1"], 0),
    );

    let outcome = fx.dispatcher.run_once().await.unwrap();
    assert_eq!(outcome, Outcome::Succeeded(first.id));
    assert!(!outcome.should_idle());

    let runs = fx.sandbox.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].name, format!("qc-{}", project.id));
    assert_eq!(
        runs[0].command,
        ["python3", "-u", "run_qc.py", project.id.to_string().as_str(), "qc"]
    );
    assert_eq!(runs[0].cpuset.as_deref(), Some("0"));

    let job = fx.registry.get_job(first.id).await.unwrap();
    assert_eq!(job.status(), Some(JobStatus::Success));
    assert_eq!(job.commands, ["bowtie2 --version"]);
    assert!(job.runtime_secs.unwrap() >= 0.0);

    let log_path = fx.project_dir(&project, "qc").join("qc_output.txt");
    assert_eq!(job.output_path.as_deref(), Some(&*log_path.to_string_lossy()));
    let log = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(log, "## bowtie2 --version\nbowtie2 version 2.5.1\n");

    // Non-archive success returns the project to where it was.
    let project_now = fx.registry.get_project(project.id).await.unwrap();
    assert_eq!(project_now.progress, "finalized");
    assert_eq!(project_now.old_progress, None);

    assert_eq!(fx.hooks.successes(), 1);
    assert_eq!(fx.hooks.failures(), 0);

    let outcome = fx.dispatcher.run_once().await.unwrap();
    assert_eq!(outcome, Outcome::Succeeded(second.id));
    assert_eq!(fx.dispatcher.run_once().await.unwrap(), Outcome::Idle);
    assert!(fx.dispatcher.slot().current().is_none());
}

#[tokio::test]
async fn loop_claims_next_job_without_waiting() {
    // An hour-long poll interval: the second job only completes in time if
    // the loop skips the idle wait after a success.
    let fx = Fixture::with_poll_interval(Duration::from_secs(3600));
    let project = fx.project().await;
    let qc = fx.analysis("qc", AnalysisKind::Project, None);
    let quant = fx.analysis("quant", AnalysisKind::Project, None);
    fx.enqueue(&project, &qc, false).await;
    let last = fx.enqueue(&project, &quant, false).await;

    let cancel = CancellationToken::new();
    let dispatcher = fx.dispatcher.clone();
    let loop_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = fx.registry.get_job(last.id).await.unwrap();
            if job.status() == Some(JobStatus::Success) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    cancel.cancel();
    loop_handle.await.unwrap();

    assert!(finished.is_ok(), "second job was not claimed promptly");
    assert_eq!(fx.hooks.successes(), 2);
}

#[tokio::test]
async fn non_zero_exit_fails_once_without_retry() {
    let fx = Fixture::new();
    let project = fx.project().await;
    let quant = fx.analysis("quant", AnalysisKind::Project, None);
    let diff = fx.analysis("diff", AnalysisKind::Project, Some(quant.id));
    let post = fx.analysis("post", AnalysisKind::Project, None);
    let failing = fx.enqueue(&project, &diff, false).await;
    let pending = fx.enqueue(&project, &post, true).await;
    fx.sandbox.script(
        &format!("diff-{}", project.id),
        Script::lines(&["loading so.rds", "Error: model did not converge"], 1),
    );

    let outcome = fx.dispatcher.run_once().await.unwrap();
    assert_eq!(outcome, Outcome::Failed(failing.id));

    let runs = fx.sandbox.runs();
    assert_eq!(
        runs[0].command,
        [
            "python3",
            "-u",
            "run_diff.py",
            project.id.to_string().as_str(),
            "diff",
            "quant"
        ]
    );

    let job = fx.registry.get_job(failing.id).await.unwrap();
    assert_eq!(job.status(), Some(JobStatus::Error));
    let message = job.error_message.unwrap();
    assert!(message.contains("exited with code 1"), "{message}");
    assert!(message.contains("Error: model did not converge"), "{message}");

    let calls = fx.hooks.calls();
    assert_eq!(fx.hooks.failures(), 1);
    assert_eq!(fx.hooks.successes(), 0);
    assert!(calls.contains(&HookCall::Started(failing.id)));

    // The rest of the project's work leaves the queue and the project is
    // marked failed.
    let pending = fx.registry.get_job(pending.id).await.unwrap();
    assert_eq!(pending.queue_position, None);
    assert_eq!(pending.status(), Some(JobStatus::Queued));
    assert_eq!(fx.registry.get_project(project.id).await.unwrap().progress, "failed");

    assert_eq!(fx.dispatcher.run_once().await.unwrap(), Outcome::Idle);
    assert_eq!(fx.sandbox.runs().len(), 1);
    assert_eq!(fx.hooks.failures(), 1);
}

#[tokio::test]
async fn launch_failure_fails_the_job() {
    let fx = Fixture::new();
    let project = fx.project().await;
    let qc = fx.analysis("qc", AnalysisKind::Project, None);
    let job = fx.enqueue(&project, &qc, false).await;
    fx.sandbox.script(
        &format!("qc-{}", project.id),
        Script::LaunchError("Unable to find image 'alaska/qc'".into()),
    );

    assert_eq!(fx.dispatcher.run_once().await.unwrap(), Outcome::Failed(job.id));
    let job = fx.registry.get_job(job.id).await.unwrap();
    assert_eq!(job.status(), Some(JobStatus::Error));
    assert!(job.error_message.unwrap().contains("Unable to find image"));
    assert_eq!(fx.hooks.failures(), 1);
}

#[tokio::test]
async fn archive_success_marks_project_analyzed() {
    let fx = Fixture::new();
    let project = fx.project().await;
    let post = fx.analysis("post", AnalysisKind::Project, None);
    let job = fx.enqueue(&project, &post, true).await;

    assert_eq!(fx.dispatcher.run_once().await.unwrap(), Outcome::Succeeded(job.id));
    assert_eq!(
        fx.sandbox.runs()[0].command.last().map(String::as_str),
        Some("--archive")
    );
    let project = fx.registry.get_project(project.id).await.unwrap();
    assert_eq!(project.progress, "analyzed");
}

#[tokio::test]
async fn busy_project_is_passed_over_while_other_projects_run() {
    let fx = Fixture::new();
    let busy = fx.project().await;
    let other = fx.project().await;
    let qc = fx.analysis("qc", AnalysisKind::Project, None);
    let blocked = fx.enqueue(&busy, &qc, false).await;
    let runnable = fx.enqueue(&other, &qc, false).await;
    fx.registry
        .transition_progress(busy.id, &[ProjectProgress::Finalized], ProjectProgress::Compiling)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(fx.dispatcher.run_once().await.unwrap(), Outcome::Succeeded(runnable.id));
    assert_eq!(fx.dispatcher.run_once().await.unwrap(), Outcome::Idle);

    let waiting = fx.registry.get_job(blocked.id).await.unwrap();
    assert_eq!(waiting.status(), Some(JobStatus::Queued));
    assert_eq!(waiting.queue_position, Some(0));
    assert_eq!(fx.sandbox.runs().len(), 1);
    assert_eq!(fx.registry.get_project(busy.id).await.unwrap().progress, "compiling");

    fx.registry
        .rollback_progress(busy.id, ProjectProgress::Compiling)
        .await
        .unwrap();
    assert_eq!(fx.dispatcher.run_once().await.unwrap(), Outcome::Succeeded(blocked.id));
}

#[tokio::test]
async fn failed_settlement_is_retried_before_the_next_claim() {
    let fx = Fixture::new();
    let project = fx.project().await;
    let other = fx.project().await;
    let qc = fx.analysis("qc", AnalysisKind::Project, None);
    let first = fx.enqueue(&project, &qc, false).await;
    let second = fx.enqueue(&other, &qc, false).await;
    fx.hooks.fail_next_settles(2);

    let outcome = fx.dispatcher.run_once().await.unwrap();
    assert_eq!(outcome, Outcome::Deferred(first.id));
    assert!(outcome.should_idle());
    let slot = fx.dispatcher.slot().current().unwrap();
    assert_eq!(slot.job_id, first.id);

    // Still failing: nothing new is claimed.
    assert!(fx.dispatcher.run_once().await.is_err());
    let queued = fx.registry.get_job(second.id).await.unwrap();
    assert_eq!(queued.status(), Some(JobStatus::Queued));
    assert_eq!(fx.sandbox.runs().len(), 1);

    assert_eq!(fx.dispatcher.run_once().await.unwrap(), Outcome::Succeeded(second.id));
    let settled = fx.registry.get_job(first.id).await.unwrap();
    assert_eq!(settled.status(), Some(JobStatus::Success));
    assert_eq!(fx.registry.get_project(project.id).await.unwrap().progress, "finalized");
    assert_eq!(fx.hooks.successes(), 4);
    assert!(fx.dispatcher.slot().current().is_none());
}

#[tokio::test]
async fn deferred_settlement_is_requeued_at_shutdown_when_still_failing() {
    let fx = Fixture::new();
    let project = fx.project().await;
    let qc = fx.analysis("qc", AnalysisKind::Project, None);
    let job = fx.enqueue(&project, &qc, false).await;
    fx.sandbox.script(&format!("qc-{}", project.id), Script::lines(&["boom"], 2));
    fx.hooks.fail_next_settles(usize::MAX);

    assert_eq!(fx.dispatcher.run_once().await.unwrap(), Outcome::Deferred(job.id));
    assert!(fx.dispatcher.settle_pending().await.is_err());

    let interrupted = reconcile::shutdown(&fx.dispatcher.slot(), fx.registry.as_ref(), &fx.sandbox)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(interrupted.job_id, job.id);
    let job = fx.registry.get_job(job.id).await.unwrap();
    assert_eq!(job.status(), Some(JobStatus::Queued));
    assert_eq!(job.queue_position, Some(0));
    assert_eq!(fx.registry.get_project(project.id).await.unwrap().progress, "finalized");
}

#[tokio::test]
async fn sample_analysis_prepares_each_sample_directory() {
    let fx = Fixture::new();
    let project = fx.project().await;
    let first = fx.sample(&project, "s1");
    let second = fx.sample(&project, "s2");
    let quant = fx.analysis("quant", AnalysisKind::Sample, None);
    fx.enqueue(&project, &quant, false).await;

    fx.dispatcher.run_once().await.unwrap();

    let work_dir = fx.project_dir(&project, "quant");
    assert!(work_dir.is_dir());
    let key = PathKey::analysis("quant").unwrap();
    for sample in fx.registry.list_samples(project.id).await.unwrap() {
        let dir = sample.paths.get(&key).unwrap().to_string();
        assert!(std::path::Path::new(&dir).is_dir(), "{dir} missing");
        assert!(dir.ends_with(&sample.name));
    }
    assert!(work_dir.join(&first.name).is_dir());
    assert!(work_dir.join(&second.name).is_dir());

    let project = fx.registry.get_project(project.id).await.unwrap();
    assert_eq!(project.paths.get(&key), Some(&*work_dir.to_string_lossy()));
}

#[tokio::test]
async fn stale_log_from_an_earlier_run_is_replaced() {
    let fx = Fixture::new();
    let project = fx.project().await;
    let qc = fx.analysis("qc", AnalysisKind::Project, None);
    fx.enqueue(&project, &qc, false).await;

    let log_path = fx.project_dir(&project, "qc").join("qc_output.txt");
    std::fs::create_dir_all(log_path.parent().unwrap()).unwrap();
    std::fs::write(&log_path, "left over\n").unwrap();
    fx.sandbox
        .script(&format!("qc-{}", project.id), Script::lines(&["fresh"], 0));

    fx.dispatcher.run_once().await.unwrap();
    assert_eq!(std::fs::read_to_string(&log_path).unwrap(), "fresh\n");
}

#[tokio::test]
async fn control_lines_split_across_chunks_are_recorded_once_in_order() {
    let fx = Fixture::new();
    let project = fx.project().await;
    let qc = fx.analysis("qc", AnalysisKind::Project, None);
    let job = fx.enqueue(&project, &qc, false).await;
    fx.sandbox.script(
        &format!("qc-{}", project.id),
        Script::Exit {
            chunks: vec![
                b"## fastqc s1.fq\nreading s1\n## multi".to_vec(),
                b"qc .\n##\n".to_vec(),
                b"done".to_vec(),
            ],
            code: 0,
        },
    );

    fx.dispatcher.run_once().await.unwrap();
    let job = fx.registry.get_job(job.id).await.unwrap();
    assert_eq!(job.commands, ["fastqc s1.fq", "multiqc .", ""]);
}
