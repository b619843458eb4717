//! End-to-end scenarios driving a real broker against real
//! `plantd-client`/`plantd-worker` endpoints over TCP.

use std::time::Duration;

use bytes::Bytes;
use plantd_broker::BrokerConfig;
use plantd_client::Client;
use plantd_worker::{Worker, WorkerConfig};

fn test_addr() -> std::net::SocketAddr {
    let port = portpicker::pick_unused_port().expect("free port");
    format!("127.0.0.1:{port}").parse().unwrap()
}

async fn spawn_broker(addr: std::net::SocketAddr, config: BrokerConfig) -> flume::Sender<()> {
    let (shutdown_tx, shutdown_rx) = flume::unbounded();
    compio::runtime::spawn(async move {
        let _ = plantd_broker::run(addr, config, shutdown_rx).await;
    })
    .detach();
    compio::time::sleep(Duration::from_millis(30)).await;
    shutdown_tx
}

#[compio::test]
async fn single_worker_happy_path() {
    let addr = test_addr();
    let _shutdown = spawn_broker(addr, BrokerConfig::default()).await;

    let mut worker = Worker::new(addr, Bytes::from_static(b"echo"), WorkerConfig::default());
    compio::runtime::spawn(async move {
        let _ = worker
            .serve(|payload: Vec<Bytes>| payload)
            .await;
    })
    .detach();
    compio::time::sleep(Duration::from_millis(50)).await;

    let mut client = Client::connect(addr).await.expect("client connects");
    let reply = client
        .send("echo", vec![Bytes::from_static(b"hello")])
        .await
        .expect("reply arrives");
    assert_eq!(reply, vec![Bytes::from_static(b"hello")]);
}

#[compio::test]
async fn mmi_discovery_reports_present_and_absent_services() {
    let addr = test_addr();
    let _shutdown = spawn_broker(addr, BrokerConfig::default()).await;

    let mut worker = Worker::new(addr, Bytes::from_static(b"known"), WorkerConfig::default());
    compio::runtime::spawn(async move {
        let _ = worker.serve(|payload: Vec<Bytes>| payload).await;
    })
    .detach();
    compio::time::sleep(Duration::from_millis(50)).await;

    let mut client = Client::connect(addr).await.expect("client connects");

    let present = client
        .lookup_service("known")
        .await
        .expect("mmi reply arrives");
    assert!(present);

    let absent = client
        .lookup_service("unknown-service")
        .await
        .expect("mmi reply arrives");
    assert!(!absent);
}

#[compio::test]
async fn concurrent_clients_each_get_their_own_reply_through_one_worker() {
    let addr = test_addr();
    let _shutdown = spawn_broker(addr, BrokerConfig::default()).await;

    let mut worker = Worker::new(addr, Bytes::from_static(b"sequencer"), WorkerConfig::default());
    compio::runtime::spawn(async move {
        let _ = worker
            .serve(|payload: Vec<Bytes>| {
                std::thread::sleep(Duration::from_millis(20));
                payload
            })
            .await;
    })
    .detach();
    compio::time::sleep(Duration::from_millis(50)).await;

    let mut handles = Vec::new();
    for i in 0u8..3 {
        let addr = addr;
        handles.push(compio::runtime::spawn(async move {
            let mut client = Client::connect(addr).await.expect("client connects");
            client
                .send("sequencer", vec![Bytes::from(vec![i])])
                .await
                .expect("reply arrives")
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let reply = handle.await.unwrap();
        assert_eq!(reply, vec![Bytes::from(vec![i as u8])]);
    }
}

#[compio::test]
async fn three_workers_split_nine_requests_round_robin_by_ready_order() {
    let addr = test_addr();
    let _shutdown = spawn_broker(addr, BrokerConfig::default()).await;

    for tag in 0u8..3 {
        let mut worker = Worker::new(addr, Bytes::from_static(b"rr"), WorkerConfig::default());
        compio::runtime::spawn(async move {
            let _ = worker
                .serve(move |_payload: Vec<Bytes>| vec![Bytes::from(vec![tag])])
                .await;
        })
        .detach();
        // Stagger READY arrival so the broker's idle queue has a
        // deterministic order to round-robin against.
        compio::time::sleep(Duration::from_millis(30)).await;
    }

    let mut client = Client::connect(addr).await.expect("client connects");
    let mut order = Vec::new();
    for _ in 0..9 {
        let reply = client
            .send("rr", vec![Bytes::from_static(b"ping")])
            .await
            .expect("reply arrives");
        order.push(reply[0][0]);
    }

    assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
}

#[compio::test]
async fn worker_expiry_removes_dead_worker_from_idle_queue() {
    let addr = test_addr();
    let mut config = BrokerConfig::default();
    config.heartbeat_interval = Duration::from_millis(40);
    config.heartbeat_liveness = 2;
    let _shutdown = spawn_broker(addr, config).await;

    let mut worker = Worker::new(addr, Bytes::from_static(b"flaky"), WorkerConfig::default());
    let worker_task = compio::runtime::spawn(async move {
        let _ = compio::time::timeout(
            Duration::from_millis(60),
            worker.serve(|payload: Vec<Bytes>| payload),
        )
        .await;
    });
    compio::time::sleep(Duration::from_millis(30)).await;
    worker_task.await.unwrap();

    // The worker's task has stopped sending heartbeats (it timed out and
    // returned); after the liveness window the broker should drop it and
    // report the service as having no idle worker.
    compio::time::sleep(Duration::from_millis(150)).await;

    let mut client = Client::connect(addr).await.expect("client connects");
    client.set_timeout(Duration::from_millis(150));
    client.set_retries(0);
    let present = client
        .lookup_service("flaky")
        .await
        .expect("mmi reply arrives");
    assert!(!present);
}
