use echoperf::{Client, Config, ProgressCallback, ProgressEvent, RunOutcome, Server};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// Custom callback implementation using a struct
struct TestCallback {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl TestCallback {
    fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ProgressCallback for TestCallback {
    fn on_progress(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

async fn start_echo_server(packet_size: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(Config::server(addr.port()).with_packet_size(packet_size));
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

#[tokio::test]
async fn test_custom_callback_struct() {
    let addr = start_echo_server(64).await;

    let callback = TestCallback::new();
    let events_ref = callback.events.clone();

    let config = Config::client(addr.ip().to_string(), addr.port())
        .with_packet_size(64)
        .with_duration(Duration::from_secs(1))
        .with_interval(Duration::from_millis(500))
        .with_bandwidth(100_000)
        .with_json(true);

    let client = Client::new(config).unwrap().with_callback(callback);
    let report = client.run().await.unwrap();

    let events = events_ref.lock().unwrap();

    assert!(
        matches!(events.first(), Some(ProgressEvent::TestStarted)),
        "TestStarted should come first"
    );

    let samples: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Sample(sample) => Some(*sample),
            _ => None,
        })
        .collect();
    assert_eq!(samples, report.samples);

    match events.last() {
        Some(ProgressEvent::TestCompleted {
            samples,
            duration,
            outcome,
        }) => {
            assert_eq!(*samples, 2);
            assert!(*duration >= Duration::from_secs(1));
            assert_eq!(*outcome, RunOutcome::Completed);
        }
        other => panic!("Expected TestCompleted last, got {:?}", other),
    }

    assert!(!events.iter().any(|e| matches!(e, ProgressEvent::Error(_))));
}

#[tokio::test]
async fn test_closure_callback() {
    let addr = start_echo_server(32).await;
    let count = Arc::new(Mutex::new(0usize));
    let count_clone = count.clone();

    let config = Config::client(addr.ip().to_string(), addr.port())
        .with_packet_size(32)
        .with_duration(Duration::from_secs(1))
        .with_interval(Duration::from_millis(250))
        .with_bandwidth(50_000)
        .with_json(true);

    let client = Client::new(config)
        .unwrap()
        .with_callback(move |event: ProgressEvent| {
            if let ProgressEvent::Sample(_) = event {
                *count_clone.lock().unwrap() += 1;
            }
        });

    client.run().await.unwrap();

    assert_eq!(*count.lock().unwrap(), 4);
}

#[tokio::test]
async fn test_callback_reports_connection_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let callback = TestCallback::new();
    let events_ref = callback.events.clone();

    let client = Client::new(Config::client("127.0.0.1".to_string(), port).with_json(true))
        .unwrap()
        .with_callback(callback);
    client.run().await.unwrap();

    let events = events_ref.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], ProgressEvent::Error(_)));
    assert!(matches!(
        events[1],
        ProgressEvent::TestCompleted {
            samples: 0,
            outcome: RunOutcome::ConnectionFailed(_),
            ..
        }
    ));
}
