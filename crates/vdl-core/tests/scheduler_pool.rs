//! Integration tests: bounded admission, FIFO hand-off, and terminal states
//! for download batches driven by a scripted fetcher.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::fake_process::{FakeLauncher, Gate, Script};
use vdl_core::config::VdlConfig;
use vdl_core::format::FormatSelection;
use vdl_core::job::{JobId, JobStatus};
use vdl_core::session::{DownloadRequest, Session};

const WAIT: Duration = Duration::from_secs(10);

fn session(launcher: &Arc<FakeLauncher>) -> Session {
    Session::new(VdlConfig::default(), launcher.clone())
}

fn requests(targets: &[&str]) -> Vec<DownloadRequest> {
    targets
        .iter()
        .map(|t| DownloadRequest::new(*t, FormatSelection::default()))
        .collect()
}

#[test]
fn running_jobs_never_exceed_the_limit() {
    let launcher = FakeLauncher::new();
    let targets: Vec<String> = (0..8).map(|i| format!("https://vimeo.com/{}", i)).collect();
    for t in &targets {
        launcher.script(
            t,
            Script::ok(&["[download]  10%", "[download] 100%"]).slow(Duration::from_millis(15)),
        );
    }
    let session = session(&launcher);
    let refs: Vec<&str> = targets.iter().map(String::as_str).collect();
    let batch = session.download(&requests(&refs), Path::new("/tmp/out"), 2);

    assert!(batch.scheduler().wait_idle_timeout(WAIT));
    assert_eq!(launcher.launch_count(), 8);
    assert!(launcher.max_active() <= 2, "max active {}", launcher.max_active());
    assert!(batch.scheduler().peak_running() <= 2);
    assert_eq!(batch.scheduler().peak_running(), 2);
    assert_eq!(batch.count(JobStatus::Succeeded), 8);
}

#[test]
fn freed_slot_goes_to_the_next_queued_job() {
    let launcher = FakeLauncher::new();
    let gate1 = Gate::new();
    let gate2 = Gate::new();
    launcher.script("https://a.test/j1", Script::ok(&["j1"]).gated(&gate1));
    launcher.script("https://a.test/j2", Script::ok(&["j2"]).gated(&gate2));
    launcher.script("https://a.test/j3", Script::ok(&["j3"]));
    let session = session(&launcher);
    let batch = session.download(
        &requests(&["https://a.test/j1", "https://a.test/j2", "https://a.test/j3"]),
        Path::new("/tmp/out"),
        2,
    );
    let ids = batch.job_ids().to_vec();

    assert!(launcher.wait_for_launches(2, WAIT));
    assert_eq!(batch.scheduler().running_count(), 2);
    assert_eq!(batch.scheduler().queued_count(), 1);
    assert_eq!(batch.scheduler().record(ids[2]).unwrap().status, JobStatus::Queued);

    // J2 finishes first: J3 takes its slot while J1 is still running.
    gate2.release();
    assert!(launcher.wait_for_launches(3, WAIT));
    let launched = launcher.launched_targets();
    assert_eq!(launched[2], "https://a.test/j3");
    assert!(launched[..2].contains(&"https://a.test/j1".to_string()));
    assert_eq!(batch.scheduler().record(ids[0]).unwrap().status, JobStatus::Running);

    gate1.release();
    assert!(batch.scheduler().wait_idle_timeout(WAIT));
    for record in batch.records() {
        assert!(record.status.is_terminal(), "job {} is {}", record.id(), record.status);
    }
    assert_eq!(batch.count(JobStatus::Queued), 0);
    assert_eq!(batch.count(JobStatus::Running), 0);
}

#[test]
fn admission_follows_submission_order_when_saturated() {
    let launcher = FakeLauncher::new();
    let gate = Gate::new();
    launcher.script("https://a.test/first", Script::ok(&["x"]).gated(&gate));
    let session = session(&launcher);
    let batch = session.download(
        &requests(&[
            "https://a.test/first",
            "https://a.test/A",
            "https://a.test/B",
            "https://a.test/C",
        ]),
        Path::new("/tmp/out"),
        1,
    );
    assert!(launcher.wait_for_launches(1, WAIT));
    gate.release();
    assert!(batch.scheduler().wait_idle_timeout(WAIT));
    assert_eq!(
        launcher.launched_targets(),
        vec![
            "https://a.test/first",
            "https://a.test/A",
            "https://a.test/B",
            "https://a.test/C"
        ]
    );
}

#[test]
fn failures_do_not_block_siblings() {
    let launcher = FakeLauncher::new();
    launcher.script(
        "https://a.test/bad",
        Script::failing(1, &["ERROR: [generic] bad: Unsupported URL"]),
    );
    launcher.script(
        "https://a.test/missing",
        Script {
            launch_error: true,
            ..Script::default()
        },
    );
    launcher.script("https://a.test/good", Script::ok(&["ok"]));
    let session = session(&launcher);
    let batch = session.download(
        &requests(&["https://a.test/bad", "https://a.test/missing", "https://a.test/good"]),
        Path::new("/tmp/out"),
        1,
    );
    assert!(batch.scheduler().wait_idle_timeout(WAIT));
    let statuses: Vec<_> = batch.records().iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![JobStatus::Failed, JobStatus::Failed, JobStatus::Succeeded]
    );
}

#[tokio::test]
async fn reset_discards_queued_jobs_only() {
    let launcher = FakeLauncher::new();
    let gate = Gate::new();
    launcher.script("https://a.test/running", Script::ok(&["x"]).gated(&gate));
    let session = session(&launcher);
    let mut batch = session.download(
        &requests(&["https://a.test/running", "https://a.test/q1", "https://a.test/q2"]),
        Path::new("/tmp/out"),
        1,
    );
    let ids = batch.job_ids().to_vec();
    let mut seen: Vec<(JobId, String)> = Vec::new();
    let mut consumer = batch
        .consumer(|id: JobId, text: &str| seen.push((id, text.to_string())))
        .unwrap();
    assert!(launcher.wait_for_launches(1, WAIT));

    let report = session.reset(&[&batch]).unwrap();
    assert_eq!(report.discarded, vec![ids[1], ids[2]]);

    gate.release();
    assert!(batch.scheduler().wait_idle_timeout(WAIT));
    let records = batch.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, JobStatus::Succeeded);
    assert_eq!(launcher.launch_count(), 1);

    // The consumer stops once the job that ran is terminal.
    tokio::time::timeout(WAIT, consumer.run(Duration::from_millis(10)))
        .await
        .expect("consumer stops after queued jobs were discarded");
    let board = consumer.board();
    assert_eq!(board.len(), 1);
    assert_eq!(board.terminal_count(), 1);
    assert!(board.get(ids[1]).is_none());
    drop(consumer);
    assert!(seen.iter().all(|(id, _)| *id == ids[0]));
}
