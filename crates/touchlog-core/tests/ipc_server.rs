//! IPC server behaviour over a real Unix socket.

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use touchlog_core::index::IndexBuilder;
use touchlog_core::ipc::{
    IpcClient, Message, MessageType, PROTOCOL_VERSION, QueryExecuteResponse,
    ReindexPathsResponse, Response, Server, ServerError, StatusResponse,
};
use touchlog_test_utils::TestVault;

async fn started_server(vault: &TestVault) -> Server {
    IndexBuilder::new(vault.root(), vault.config())
        .rebuild()
        .await
        .unwrap();
    let server = Server::new(vault.root(), vault.config().clone()).unwrap();
    server.start().unwrap();
    server
}

async fn shut_down(server: Server) {
    server.stop().await;
    let _ = std::fs::remove_file(server.socket_path());
}

async fn wait_for_done(server: &Server) {
    let mut done = server.done();
    tokio::time::timeout(Duration::from_secs(2), done.wait_for(|d| *d))
        .await
        .expect("server did not signal done")
        .unwrap();
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_all_message_types_on_one_connection() {
    let vault = TestVault::new().await;
    vault.write_note("note", "alpha", "n-alpha", "see [[beta]]");
    vault.write_note("note", "beta", "n-beta", "");
    let server = started_server(&vault).await;

    let client = IpcClient::new(server.socket_path());
    let mut conn = client.connect().await.unwrap();

    let status = conn.request(&Message::status()).await.unwrap();
    assert_eq!(status.version, PROTOCOL_VERSION);
    assert!(status.success);
    let status: StatusResponse = status.decode_data().unwrap();
    assert!(!status.running, "no pid file is written by a bare server");

    let query = conn
        .request(&Message::query("type:note").unwrap())
        .await
        .unwrap();
    assert_eq!(query.version, PROTOCOL_VERSION);
    assert!(query.success);
    let query: QueryExecuteResponse = query.decode_data().unwrap();
    let keys: Vec<_> = query.results.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["alpha", "beta"]);

    let reindex = conn
        .request(&Message::reindex(vec!["note/alpha.Rmd".into()]).unwrap())
        .await
        .unwrap();
    assert_eq!(reindex.version, PROTOCOL_VERSION);
    assert!(reindex.success);
    let reindex: ReindexPathsResponse = reindex.decode_data().unwrap();
    assert_eq!(reindex.processed, 1);

    let shutdown = conn.request(&Message::shutdown()).await.unwrap();
    assert_eq!(shutdown.version, PROTOCOL_VERSION);
    assert!(shutdown.success);

    wait_for_done(&server).await;
    shut_down(server).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_reindex_tolerates_missing_paths() {
    let vault = TestVault::new().await;
    let server = started_server(&vault).await;
    let real = vault.write_note("task", "gamma", "t-gamma", "");
    let missing = vault.root().join("note/never-written.Rmd");

    let client = IpcClient::new(server.socket_path());
    let processed = client
        .reindex(vec![
            missing.display().to_string(),
            real.display().to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(processed, 1);

    let results = client.query("type:task").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "t-gamma");

    shut_down(server).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_errors_are_scoped_to_the_request() {
    let vault = TestVault::new().await;
    let server = started_server(&vault).await;
    let client = IpcClient::new(server.socket_path());
    let mut conn = client.connect().await.unwrap();

    let unknown = conn
        .request(&Message::new(MessageType::Other("Explode".into())))
        .await
        .unwrap();
    assert!(!unknown.success);
    assert_eq!(unknown.error.as_deref(), Some("unknown message type: Explode"));

    let bad_query = conn
        .request(&Message::query("colour:red").unwrap())
        .await
        .unwrap();
    assert!(!bad_query.success);
    assert!(bad_query.error.unwrap().contains("invalid query"));

    let bad_payload = conn
        .request(&Message::with_payload(MessageType::ReindexPaths, &42).unwrap())
        .await
        .unwrap();
    assert!(!bad_payload.success);

    // The same connection still serves requests.
    assert!(conn.request(&Message::status()).await.unwrap().success);

    shut_down(server).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_malformed_json_closes_only_that_connection() {
    let vault = TestVault::new().await;
    let server = started_server(&vault).await;

    let mut raw = UnixStream::connect(server.socket_path()).await.unwrap();
    raw.write_all(b"{this is not json}\n").await.unwrap();
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), raw.read_to_end(&mut rest))
        .await
        .expect("server kept the bad connection open")
        .unwrap();
    assert!(rest.is_empty());

    let client = IpcClient::new(server.socket_path());
    assert!(client.status().await.is_ok());

    shut_down(server).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_requests_missing_envelope_fields_get_a_reply() {
    let vault = TestVault::new().await;
    let server = started_server(&vault).await;

    let mut raw = UnixStream::connect(server.socket_path()).await.unwrap();
    raw.write_all(b"{\"version\":1}\n{\"type\":\"Status\"}\n")
        .await
        .unwrap();
    raw.shutdown().await.unwrap();
    let mut replies = String::new();
    tokio::time::timeout(Duration::from_secs(2), raw.read_to_string(&mut replies))
        .await
        .expect("server did not answer")
        .unwrap();

    let replies: Vec<Response> = replies
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(replies.len(), 2);
    assert!(!replies[0].success);
    assert_eq!(replies[0].error.as_deref(), Some("unknown message type: "));
    assert!(replies[1].success);
    assert_eq!(replies[1].version, PROTOCOL_VERSION);

    shut_down(server).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_unremovable_stale_socket_is_reported() {
    let vault = TestVault::new().await;
    let socket = touchlog_core::daemon::resolve_socket_path(vault.root());
    std::fs::create_dir(&socket).unwrap();

    let result = Server::new(vault.root(), vault.config().clone());
    std::fs::remove_dir(&socket).unwrap();

    let err = result.err().expect("bind over a directory should fail");
    assert!(matches!(err, ServerError::RemoveStale { ref path, .. } if path == &socket));
    assert!(err.to_string().contains("stale socket file"), "{err}");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_concurrent_clients() {
    let vault = TestVault::new().await;
    vault.write_note("note", "alpha", "n-alpha", "");
    let server = started_server(&vault).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = IpcClient::new(server.socket_path());
        handles.push(tokio::spawn(async move { client.query("").await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 1);
    }

    shut_down(server).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_stop_is_idempotent_and_races_with_shutdown() {
    let vault = TestVault::new().await;
    let server = started_server(&vault).await;
    let client = IpcClient::new(server.socket_path());

    let (shutdown, ()) = tokio::join!(client.shutdown(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.stop().await;
    });
    // The listener may already be gone when the shutdown request arrives.
    if let Err(e) = shutdown {
        tracing::debug!(error = %e, "shutdown raced with stop");
    }

    server.stop().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.stop().await;
    assert!(*server.done().borrow());

    shut_down(server).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_stop_closes_listener() {
    let vault = TestVault::new().await;
    let server = started_server(&vault).await;
    let socket = server.socket_path().to_path_buf();

    server.stop().await;
    assert!(UnixStream::connect(&socket).await.is_err());

    shut_down(server).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_new_server_replaces_stale_socket_file() {
    let vault = TestVault::new().await;
    let first = Server::new(vault.root(), vault.config().clone()).unwrap();
    let socket = first.socket_path().to_path_buf();
    drop(first);

    // Leave a regular file where the socket was.
    std::fs::remove_file(&socket).unwrap();
    std::fs::write(&socket, "stale").unwrap();
    let server = Server::new(vault.root(), vault.config().clone()).unwrap();
    server.start().unwrap();

    let mode = std::os::unix::fs::PermissionsExt::mode(
        &std::fs::metadata(&socket).unwrap().permissions(),
    );
    assert_eq!(mode & 0o777, 0o600);
    assert!(IpcClient::new(&socket).status().await.is_ok());

    shut_down(server).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_watcher_changes_reach_the_index() {
    let vault = TestVault::new().await;
    let server = started_server(&vault).await;
    let client = IpcClient::new(server.socket_path());
    tokio::time::sleep(Duration::from_millis(100)).await;

    vault.write_note("note", "fresh", "n-fresh", "");

    let mut found = false;
    for _ in 0..50 {
        if !client.query("type:note").await.unwrap().is_empty() {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(found, "watcher event was not indexed");

    shut_down(server).await;
}
