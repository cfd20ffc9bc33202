//! TCP line source tests

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use capline_config::TcpSourceConfig;

use crate::MessageSource;
use crate::tcp::TcpLineSource;

// ============================================================================
// Helper Functions
// ============================================================================

fn local_config() -> TcpSourceConfig {
    TcpSourceConfig {
        address: "127.0.0.1".into(),
        port: 0,
        max_line_size: 64,
        channel_capacity: 16,
        nodelay: true,
    }
}

async fn poll_payload(source: &mut TcpLineSource) -> (u64, Vec<u8>) {
    let message = source
        .poll(Duration::from_secs(5))
        .await
        .unwrap()
        .expect("message before timeout");
    (message.partition(), message.payload().to_vec())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_bind_failure_is_error() {
    let first = TcpLineSource::bind(&local_config()).await.unwrap();
    let taken = TcpSourceConfig {
        port: first.local_addr().port(),
        ..local_config()
    };
    assert!(TcpLineSource::bind(&taken).await.is_err());
}

#[tokio::test]
async fn test_lines_become_messages() {
    let mut source = TcpLineSource::bind(&local_config()).await.unwrap();
    let mut client = TcpStream::connect(source.local_addr()).await.unwrap();
    client
        .write_all(b"{\"a\":1}\n{\"b\":2}\r\n\n")
        .await
        .unwrap();

    assert_eq!(poll_payload(&mut source).await.1, b"{\"a\":1}");
    assert_eq!(poll_payload(&mut source).await.1, b"{\"b\":2}");
    assert_eq!(poll_payload(&mut source).await.1, b"");

    let snapshot = source.metrics_handle().snapshot();
    assert_eq!(snapshot.messages_received, 3);
}

#[tokio::test]
async fn test_poll_times_out_without_data() {
    let mut source = TcpLineSource::bind(&local_config()).await.unwrap();
    let polled = source.poll(Duration::from_millis(20)).await.unwrap();
    assert!(polled.is_none());
    assert!(!source.is_exhausted());
}

#[tokio::test]
async fn test_connections_get_distinct_partitions() {
    let mut source = TcpLineSource::bind(&local_config()).await.unwrap();

    let mut first = TcpStream::connect(source.local_addr()).await.unwrap();
    first.write_all(b"one\n").await.unwrap();
    let (p1, _) = poll_payload(&mut source).await;

    let mut second = TcpStream::connect(source.local_addr()).await.unwrap();
    second.write_all(b"two\n").await.unwrap();
    let (p2, _) = poll_payload(&mut source).await;

    assert_ne!(p1, p2);
}

#[tokio::test]
async fn test_oversized_line_skipped() {
    let mut source = TcpLineSource::bind(&local_config()).await.unwrap();
    let mut client = TcpStream::connect(source.local_addr()).await.unwrap();
    let long = vec![b'x'; 200];
    client.write_all(&long).await.unwrap();
    client.write_all(b"\nshort\n").await.unwrap();

    assert_eq!(poll_payload(&mut source).await.1, b"short");
    assert_eq!(source.metrics_handle().snapshot().lines_too_long, 1);
}

#[tokio::test]
async fn test_commit_counted_once() {
    let mut source = TcpLineSource::bind(&local_config()).await.unwrap();
    let mut client = TcpStream::connect(source.local_addr()).await.unwrap();
    client.write_all(b"line\n").await.unwrap();

    let message = source.poll(Duration::from_secs(5)).await.unwrap().unwrap();
    assert!(message.commit().unwrap());
    assert!(!message.commit().unwrap());
    assert_eq!(source.metrics_handle().snapshot().commits, 1);
}
