//! Integration tests: progress events from real batches reach the consumer
//! in per-job order, and the consumer stops once every job is terminal.

mod common;

use std::time::Duration;

use common::fake_process::{FakeLauncher, Script};
use vdl_core::config::VdlConfig;
use vdl_core::format::FormatSelection;
use vdl_core::job::{JobId, JobStatus};
use vdl_core::progress::MAX_RENDERED_CHARS;
use vdl_core::session::{DownloadRequest, Session};

const WAIT: Duration = Duration::from_secs(10);

fn texts_for(seen: &[(JobId, String)], id: JobId) -> Vec<&str> {
    seen.iter()
        .filter(|(job, _)| *job == id)
        .map(|(_, text)| text.as_str())
        .collect()
}

#[tokio::test]
async fn consumer_sees_each_job_in_publish_order() {
    let launcher = FakeLauncher::new();
    let a = "https://www.youtube.com/watch?v=a";
    let b = "https://vimeo.com/b";
    launcher.script(
        a,
        Script::ok(&["[download]  10.0%", "[download]  55.0%", "[download] 100%"])
            .slow(Duration::from_millis(5)),
    );
    launcher.script(b, Script::failing(1, &["ERROR: Unsupported URL: https://vimeo.com/b"]));
    let session = Session::new(VdlConfig::default(), launcher.clone());
    let requests = vec![
        DownloadRequest::new(a, FormatSelection::default()),
        DownloadRequest::new(b, FormatSelection::parse("MP3 - best")),
    ];
    let mut batch = session.download(&requests, std::path::Path::new("/tmp/out"), 2);
    let ids = batch.job_ids().to_vec();

    let mut seen: Vec<(JobId, String)> = Vec::new();
    {
        let mut consumer = batch
            .consumer(|id: JobId, text: &str| seen.push((id, text.to_string())))
            .expect("consumer taken once");
        tokio::time::timeout(WAIT, consumer.run(Duration::from_millis(10)))
            .await
            .expect("consumer stops once all jobs are terminal");
        let board = consumer.board();
        assert_eq!(board.terminal_count(), 2);
        assert_eq!(board.count(JobStatus::Succeeded), 1);
        assert_eq!(board.count(JobStatus::Failed), 1);
    }
    assert!(batch.consumer(|_: JobId, _: &str| {}).is_none());

    assert_eq!(
        texts_for(&seen, ids[0]),
        vec![
            "Downloading from YouTube...",
            "[download]  10.0%",
            "[download]  55.0%",
            "[download] 100%",
            "Done: Unknown",
        ]
    );
    let failed = texts_for(&seen, ids[1]);
    assert_eq!(failed.first(), Some(&"Downloading from Vimeo..."));
    let last = failed.last().unwrap();
    assert!(last.starts_with("Download error: Unknown"), "{}", last);
    assert!(last.contains("Unsupported URL"), "{}", last);
}

#[tokio::test]
async fn long_lines_are_truncated_for_display() {
    let launcher = FakeLauncher::new();
    let target = "https://www.youtube.com/watch?v=long";
    let long_line = "x".repeat(400);
    launcher.script(target, Script::ok(&[long_line.as_str()]));
    let session = Session::new(VdlConfig::default(), launcher.clone());
    let mut batch = session.download(
        &[DownloadRequest::new(target, FormatSelection::default())],
        std::path::Path::new("/tmp/out"),
        1,
    );

    let mut seen: Vec<(JobId, String)> = Vec::new();
    {
        let mut consumer = batch
            .consumer(|id: JobId, text: &str| seen.push((id, text.to_string())))
            .unwrap();
        tokio::time::timeout(WAIT, consumer.run(Duration::from_millis(10)))
            .await
            .unwrap();
    }
    let truncated = &seen[1].1;
    assert_eq!(truncated.chars().count(), MAX_RENDERED_CHARS + 3);
    assert!(truncated.ends_with("..."));
}

#[tokio::test]
async fn probe_batch_reports_summaries() {
    let launcher = FakeLauncher::new();
    let target = "https://www.youtube.com/watch?v=s";
    launcher.script(
        target,
        Script::json(r#"{"title":"Song","duration":185,"filesize":3145728}"#),
    );
    let session = Session::new(VdlConfig::default(), launcher.clone());
    let mut batch = session.prefetch(&[target.to_string()]);
    let id = batch.job_ids()[0];

    let mut seen: Vec<(JobId, String)> = Vec::new();
    {
        let mut consumer = batch
            .consumer(|id: JobId, text: &str| seen.push((id, text.to_string())))
            .unwrap();
        tokio::time::timeout(WAIT, consumer.run(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(consumer.board().get(id).unwrap().status, JobStatus::Succeeded);
    }
    assert_eq!(
        texts_for(&seen, id),
        vec!["Fetching info from YouTube...", "Song (3.0 MB, 3:05)"]
    );
}
