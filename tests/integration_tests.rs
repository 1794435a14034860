//! Integration tests for dictd
//!
//! Tests the complete system including server, client, and persistence

use dictd::{Client, DictServer, ServerConfig, SnapshotFile};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, NamedTempFile};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn test_config(snapshot_path: &Path) -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        snapshot_path: snapshot_path.to_path_buf(),
        snapshot_interval: Duration::from_secs(3600),
        read_timeout: Some(Duration::from_secs(5)),
        ..ServerConfig::default()
    }
}

/// Helper function to start a test server on an ephemeral port
async fn start_test_server(
    config: ServerConfig,
) -> (Arc<DictServer>, String, JoinHandle<dictd::Result<()>>) {
    let server = Arc::new(DictServer::new(config).await.unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server_clone = Arc::clone(&server);
    let handle = tokio::spawn(async move { server_clone.serve(listener).await });
    (server, addr, handle)
}

/// Send raw bytes and return everything the server writes before closing
async fn raw_request(addr: &str, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_wire_scenarios() {
    let dir = tempdir().unwrap();
    let (server, addr, handle) = start_test_server(test_config(&dir.path().join("data.dat"))).await;

    assert_eq!(raw_request(&addr, b"GET <fruit>\n").await, "404\n");
    assert_eq!(raw_request(&addr, b"PUT <fruit> <apple>\n").await, "200 <apple>\n");
    assert_eq!(raw_request(&addr, b"PUT <fruit> <banana>\n").await, "200 <apple> <banana>\n");
    assert_eq!(raw_request(&addr, b"GET <fruit>\n").await, "200 <apple> <banana>\n");
    assert_eq!(raw_request(&addr, b"DELETE <fruit> <apple>\n").await, "200 <banana>\n");
    assert_eq!(raw_request(&addr, b"GET <fruit>\n").await, "200 <banana>\n");
    assert_eq!(raw_request(&addr, b"DELETE <fruit> <banana>\n").await, "404\n");
    assert_eq!(raw_request(&addr, b"GET <fruit>\n").await, "404\n");
    assert_eq!(raw_request(&addr, b"FOO bar\n").await, "404\n");
    assert_eq!(raw_request(&addr, b"PUT <a> <b>\r\n").await, "200 <b>\n");

    server.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_client_operations() {
    let dir = tempdir().unwrap();
    let (server, addr, handle) = start_test_server(test_config(&dir.path().join("data.dat"))).await;
    let client = Client::new(addr);

    assert!(client.get("colors").await.unwrap().is_empty());
    client.put("colors", "red").await.unwrap();
    client.put("colors", "green").await.unwrap();
    let values = client.put("colors", "red").await.unwrap();
    assert_eq!(values, vec!["red", "green"]);

    let values = client.delete("colors", "red").await.unwrap();
    assert_eq!(values, vec!["green"]);

    // Deleting a value that is not there is a no-op
    let values = client.delete("colors", "blue").await.unwrap();
    assert_eq!(values, vec!["green"]);

    assert!(client.delete("colors", "green").await.unwrap().is_empty());
    assert!(client.get("colors").await.unwrap().is_empty());

    server.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_concurrent_clients_on_one_key() {
    let dir = tempdir().unwrap();
    let (server, addr, handle) = start_test_server(test_config(&dir.path().join("data.dat"))).await;

    let num_clients = 20;
    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let client = Client::new(addr.clone());
        handles.push(tokio::spawn(async move {
            let value = format!("value_{}", client_id);
            let values = client.put("shared", &value).await.unwrap();
            assert!(values.contains(&value));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let client = Client::new(addr);
    let mut values = client.get("shared").await.unwrap();
    assert_eq!(values.len(), num_clients);
    values.sort();
    values.dedup();
    assert_eq!(values.len(), num_clients);

    server.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_persistence_across_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");

    // First server instance writes a final snapshot on shutdown
    let (server, addr, handle) = start_test_server(test_config(&path)).await;
    let client = Client::new(addr);
    client.put("fruit", "apple").await.unwrap();
    client.put("fruit", "banana").await.unwrap();
    client.put("fruit", "cherry").await.unwrap();
    client.put("veg", "leek").await.unwrap();
    client.delete("veg", "leek").await.unwrap();
    server.shutdown();
    handle.await.unwrap().unwrap();

    let saved = SnapshotFile::new(&path).load().unwrap();
    assert_eq!(saved.len(), 1);

    // Second instance loads the same file
    let (server, addr, handle) = start_test_server(test_config(&path)).await;
    let client = Client::new(addr);
    assert_eq!(
        client.get("fruit").await.unwrap(),
        vec!["apple", "banana", "cherry"]
    );
    assert!(client.get("veg").await.unwrap().is_empty());

    server.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_periodic_snapshot_while_serving() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");
    let config = ServerConfig {
        snapshot_interval: Duration::from_millis(100),
        ..test_config(&path)
    };
    let (server, addr, handle) = start_test_server(config).await;

    Client::new(addr).put("k", "v").await.unwrap();

    let mut persisted = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Ok(data) = SnapshotFile::new(&path).load() {
            if data.contains_key("k") {
                persisted = true;
                break;
            }
        }
    }
    assert!(persisted, "periodic snapshot never picked up the write");

    server.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_slow_client_times_out_without_response() {
    let dir = tempdir().unwrap();
    let config = ServerConfig {
        read_timeout: Some(Duration::from_millis(100)),
        ..test_config(&dir.path().join("data.dat"))
    };
    let (server, addr, handle) = start_test_server(config).await;

    // Never send a newline; the server should drop us without answering
    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.write_all(b"GET <fru").await.unwrap();
    let mut response = String::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .expect("server kept the stalled connection open");
    assert!(read.is_err() || response.is_empty());

    // Other clients are unaffected
    assert_eq!(raw_request(&addr, b"GET <fruit>\n").await, "404\n");

    server.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_non_utf8_request_still_gets_a_response() {
    let dir = tempdir().unwrap();
    let (server, addr, handle) = start_test_server(test_config(&dir.path().join("data.dat"))).await;

    // Latin-1 "café"
    assert_eq!(raw_request(&addr, b"PUT <caf\xe9> <x>\n").await, "200 <x>\n");
    assert_eq!(raw_request(&addr, b"GET <caf\xe9>\n").await, "200 <x>\n");
    assert_eq!(
        raw_request(&addr, b"PUT <k> <\xe9t\xe9>\n").await,
        "200 <\u{FFFD}t\u{FFFD}>\n"
    );
    assert_eq!(raw_request(&addr, b"FOO \xff\n").await, "404\n");

    server.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_oversized_request_is_dropped() {
    let dir = tempdir().unwrap();
    let config = ServerConfig {
        read_timeout: Some(Duration::from_secs(30)),
        ..test_config(&dir.path().join("data.dat"))
    };
    let (server, addr, handle) = start_test_server(config).await;

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    let mut request = b"GET <".to_vec();
    request.extend(std::iter::repeat(b'k').take(5000));
    // The server may hang up before taking all of it
    let _ = stream.write_all(&request).await;

    let mut response = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("server waited past the request size limit");
    assert!(read.is_err() || response.is_empty());

    assert_eq!(raw_request(&addr, b"GET <fruit>\n").await, "404\n");

    server.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connection_limit_drops_extra_clients() {
    let dir = tempdir().unwrap();
    let config = ServerConfig {
        max_connections: 1,
        ..test_config(&dir.path().join("data.dat"))
    };
    let (server, addr, handle) = start_test_server(config).await;

    // Holds the only slot without ever sending a line
    let stalled = TcpStream::connect(&addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut extra = TcpStream::connect(&addr).await.unwrap();
    let _ = extra.write_all(b"GET <fruit>\n").await;
    let mut response = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), extra.read_to_end(&mut response))
        .await
        .expect("extra connection was queued instead of closed");
    assert!(read.is_err() || response.is_empty());

    // Freeing the slot lets new clients in again
    drop(stalled);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(raw_request(&addr, b"GET <fruit>\n").await, "404\n");

    server.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stalled_client_does_not_block_shutdown() {
    let dir = tempdir().unwrap();
    let config = ServerConfig {
        read_timeout: None,
        ..test_config(&dir.path().join("data.dat"))
    };
    let (server, addr, handle) = start_test_server(config).await;

    let _stalled = TcpStream::connect(&addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("shutdown waited on a client that never sent a line")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_acknowledged_writes_survive_shutdown() {
    for i in 0..10 {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.dat");
        let (server, addr, handle) = start_test_server(test_config(&path)).await;

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        let value = format!("v{}", i);
        stream
            .write_all(format!("PUT <k> <{}>\n", value).as_bytes())
            .await
            .unwrap();
        server.shutdown();

        let mut response = Vec::new();
        let _ = stream.read_to_end(&mut response).await;
        handle.await.unwrap().unwrap();

        // Either the write was answered and saved, or it was never answered
        let saved = SnapshotFile::new(&path).load().unwrap();
        if response == format!("200 <{}>\n", value).into_bytes() {
            assert_eq!(saved["k"], vec![value]);
        } else {
            assert!(response.is_empty());
            assert!(!saved.contains_key("k"));
        }
    }
}

#[tokio::test]
async fn test_corrupt_snapshot_fails_startup() {
    let mut file = NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, b"\x00\x01 not json").unwrap();

    let result = DictServer::new(test_config(file.path())).await;
    assert!(matches!(result, Err(dictd::DictError::Snapshot(_))));
}

#[tokio::test]
async fn test_error_handling() {
    // Nothing listens on this port
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = Client::new(addr).get("fruit").await;
    assert!(result.is_err());
}
