mod common;

use std::time::Duration;

use treewatch::SyncError;

#[tokio::test]
async fn sync_to_now_rendezvous_through_the_watcher() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data"), b"x").unwrap();

    let service = common::start_service(dir.path());
    service.wait_until_ready_to_query().await.unwrap();

    let echo = common::spawn_cookie_echo(&service);
    service.sync_to_now(Duration::from_secs(5)).await.unwrap();
    echo.abort();

    // Cookie files never show up in the view.
    service.view().read_view(|db| {
        let cookies = db
            .root_dir()
            .files
            .keys()
            .filter(|name| name.to_string_lossy().starts_with(".treewatch-cookie-"))
            .count();
        assert_eq!(cookies, 0);
    });
    assert_eq!(service.root().cookies.outstanding_count(), 0);
}

#[tokio::test]
async fn sync_to_now_times_out_when_the_watcher_stays_silent() {
    let dir = tempfile::tempdir().unwrap();
    let service = common::start_service(dir.path());
    service.wait_until_ready_to_query().await.unwrap();

    let timeout = Duration::from_millis(150);
    let err = service.sync_to_now(timeout).await.unwrap_err();
    match err {
        SyncError::Timeout { timeout: reported } => assert_eq!(reported, timeout),
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(service.root().cookies.outstanding_count(), 0);
}

#[tokio::test]
async fn concurrent_syncs_each_get_their_own_cookie() {
    let dir = tempfile::tempdir().unwrap();
    let service = common::start_service(dir.path());
    service.wait_until_ready_to_query().await.unwrap();

    let echo = common::spawn_cookie_echo(&service);
    let (a, b) = tokio::join!(
        service.sync_to_now(Duration::from_secs(5)),
        service.sync_to_now(Duration::from_secs(5)),
    );
    a.unwrap();
    b.unwrap();
    echo.abort();
}
