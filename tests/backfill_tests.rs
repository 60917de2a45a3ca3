/// Resume backfill and bounded download tests.
mod common;

use common::*;
use dblogtail::api::ApiError;
use dblogtail::assembler::Passthrough;
use dblogtail::catalog::LogFileRef;
use dblogtail::cursor::StreamCursor;
use dblogtail::engine::{
    plan_gap_backfill, plan_previous_files, run_backfills, FetchWindow, Fetcher, Outcome,
};
use dblogtail::marker::Marker;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn file_ref(name: &str, last_written: i64) -> LogFileRef {
    LogFileRef::from_remote(remote(name, last_written))
}

fn fetcher(api: Arc<ScriptedApi>, cancel: CancellationToken) -> Fetcher {
    Fetcher::new(api, INSTANCE, 100, Duration::from_millis(10), cancel)
}

#[tokio::test]
async fn test_matching_suffix_starts_at_persisted_offset() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let api = Arc::new(
        ScriptedApi::new(cancel.clone())
            .respond("db/log.4", Ok(portion("4:1300", "rest of segment\n", false))),
    );
    let ctx = context(&test_config(dir.path()), api.clone(), None, cancel);

    let persisted = StreamCursor::new(file_ref("db/log.4", 1000), Marker::from("4:1200"));
    let tasks = plan_previous_files(&persisted, &[file_ref("db/log.4", 1000)]);
    assert_eq!(tasks.len(), 1);

    assert_eq!(run_backfills(&ctx, tasks).await.unwrap(), Outcome::Completed);

    let calls = api.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].marker.as_deref(), Some("4:1200"));

    let out = output_dir(dir.path(), "db");
    assert_eq!(
        std::fs::read_to_string(out.join("log.4.1200")).unwrap(),
        "rest of segment\n"
    );
}

#[tokio::test]
async fn test_unmatched_suffix_starts_at_zero() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let api = Arc::new(
        ScriptedApi::new(cancel.clone())
            .respond("db/log.3", Ok(portion("3:20", "whole file\n", false))),
    );
    let ctx = context(&test_config(dir.path()), api.clone(), None, cancel);

    let persisted = StreamCursor::new(file_ref("db/log.4", 1000), Marker::from("4:1200"));
    let tasks = plan_previous_files(&persisted, &[file_ref("db/log.3", 500)]);

    assert_eq!(run_backfills(&ctx, tasks).await.unwrap(), Outcome::Completed);
    assert_eq!(api.calls()[0].marker.as_deref(), Some("0"));

    let out = output_dir(dir.path(), "db");
    assert_eq!(std::fs::read_to_string(out.join("log.3")).unwrap(), "whole file\n");
}

#[tokio::test]
async fn test_backfills_run_concurrently_and_all_finish() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let api = Arc::new(
        ScriptedApi::new(cancel.clone())
            .respond("db/log.1", Ok(portion("1:2", "a\n", false)))
            .respond("db/log.2", Ok(portion("2:2", "b\n", false)))
            .respond("db/log.3", Ok(portion("3:2", "c\n", false))),
    );
    let ctx = context(&test_config(dir.path()), api.clone(), None, cancel);

    let persisted = StreamCursor::new(file_ref("db/log.9", 1000), Marker::from("9:0"));
    let older = [
        file_ref("db/log.1", 100),
        file_ref("db/log.2", 200),
        file_ref("db/log.3", 300),
    ];
    let tasks = plan_previous_files(&persisted, &older);

    assert_eq!(run_backfills(&ctx, tasks).await.unwrap(), Outcome::Completed);
    assert_eq!(api.calls().len(), 3);

    let out = output_dir(dir.path(), "db");
    for (name, body) in [("log.1", "a\n"), ("log.2", "b\n"), ("log.3", "c\n")] {
        assert_eq!(std::fs::read_to_string(out.join(name)).unwrap(), body);
    }
}

#[tokio::test]
async fn test_failed_backfill_is_reported_after_join() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let api = Arc::new(
        ScriptedApi::new(cancel.clone())
            .respond(
                "db/log.1",
                Err(ApiError::Service {
                    code: "InternalFailure".into(),
                    message: "boom".into(),
                }),
            )
            .respond("db/log.2", Ok(portion("2:2", "b\n", false))),
    );
    let ctx = context(&test_config(dir.path()), api.clone(), None, cancel);

    let persisted = StreamCursor::new(file_ref("db/log.9", 1000), Marker::from("9:0"));
    let tasks = plan_previous_files(
        &persisted,
        &[file_ref("db/log.1", 100), file_ref("db/log.2", 200)],
    );

    assert!(run_backfills(&ctx, tasks).await.is_err());

    // The healthy download still completed.
    let out = output_dir(dir.path(), "db");
    assert_eq!(std::fs::read_to_string(out.join("log.2")).unwrap(), "b\n");
}

#[tokio::test]
async fn test_bounded_window_is_truncated_exactly() {
    let cancel = CancellationToken::new();
    let api = Arc::new(
        ScriptedApi::new(cancel.clone())
            .respond("db/log", Ok(portion("1:6", "abcdef", true)))
            .respond("db/log", Ok(portion("1:12", "ghijkl", true))),
    );
    let sink = MemorySink::default();
    let window = FetchWindow::bounded(Marker::end_of_segment(), 10);

    let outcome = fetcher(api.clone(), cancel)
        .download(&file_ref("db/log", 0), &window, &sink, &Passthrough)
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(sink.writes(), vec!["abcdefghij".to_string()]);

    let calls = api.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].marker.as_deref(), Some("0"));
    assert_eq!(calls[1].marker.as_deref(), Some("1:6"));
}

#[tokio::test]
async fn test_bounded_window_from_persisted_offset() {
    let cancel = CancellationToken::new();
    let api = Arc::new(
        ScriptedApi::new(cancel.clone()).respond("db/log", Ok(portion("9:130", "0123456789012345678901234567890", false))),
    );
    let sink = MemorySink::default();

    let persisted = StreamCursor::new(file_ref("db/log", 1000), Marker::from("9:100"));
    let task = plan_gap_backfill(
        &persisted,
        &file_ref("db/log", 2000),
        &Marker::from("9:125"),
        5,
        Duration::from_secs(3600),
    )
    .unwrap();
    assert_eq!(task.window, FetchWindow::bounded(Marker::from("9:100"), 120));

    fetcher(api.clone(), cancel)
        .download(&task.file, &task.window, &sink, &Passthrough)
        .await
        .unwrap();

    assert_eq!(api.calls()[0].marker.as_deref(), Some("9:100"));
    assert_eq!(sink.contents(), "01234567890123456789");
}

#[tokio::test]
async fn test_bounded_window_short_server_writes_partial() {
    let cancel = CancellationToken::new();
    let api = Arc::new(
        ScriptedApi::new(cancel.clone()).respond("db/log", Ok(portion("1:4", "abcd", false))),
    );
    let sink = MemorySink::default();
    let window = FetchWindow::bounded(Marker::end_of_segment(), 10);

    let outcome = fetcher(api, cancel)
        .download(&file_ref("db/log", 0), &window, &sink, &Passthrough)
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(sink.contents(), "abcd");
}

#[tokio::test]
async fn test_unbounded_download_writes_each_page() {
    let cancel = CancellationToken::new();
    let api = Arc::new(
        ScriptedApi::new(cancel.clone())
            .respond("db/log", Ok(portion("1:6", "first\n", true)))
            .respond("db/log", Err(ApiError::RateLimited("Throttling".into())))
            .respond("db/log", Ok(portion("1:13", "second\n", false))),
    );
    let sink = MemorySink::default();
    let window = FetchWindow::from_start(Marker::end_of_segment());

    let outcome = fetcher(api.clone(), cancel)
        .download(&file_ref("db/log", 0), &window, &sink, &Passthrough)
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(sink.writes(), vec!["first\n".to_string(), "second\n".to_string()]);

    // The throttled request is retried with the same marker.
    let markers: Vec<_> = api.calls().into_iter().map(|c| c.marker).collect();
    assert_eq!(
        markers,
        vec![Some("0".to_string()), Some("1:6".to_string()), Some("1:6".to_string())]
    );
}

#[tokio::test]
async fn test_cancelled_download_is_aborted_without_fetching() {
    let cancel = CancellationToken::new();
    let api = Arc::new(ScriptedApi::new(cancel.clone()));
    cancel.cancel();

    let sink = MemorySink::default();
    let outcome = fetcher(api.clone(), cancel)
        .download(
            &file_ref("db/log", 0),
            &FetchWindow::from_start(Marker::end_of_segment()),
            &sink,
            &Passthrough,
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Aborted);
    assert!(api.calls().is_empty());
    assert!(sink.writes().is_empty());
}
