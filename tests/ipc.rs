//! IPC transport tests over real Unix sockets.
//!
//! Each test gets its own temp directory so sockets never collide.

mod common;

use common::*;

use aetheric_bus::bus::ipc::frame::{encode, read_message, WireMessage, WireType};
use aetheric_bus::bus::ipc::DEFAULT_MAX_FRAME_BYTES;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};

#[tokio::test]
async fn test_client_subscribed_before_connect_receives_after_connect() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;

    let client = IpcTransport::client(path.clone()).unwrap();
    let handler = RecordingHandler::new();
    client
        .subscribe("orders.#", handler.handler(), &token())
        .await
        .unwrap();
    client.start(&token()).await.unwrap();

    let env = event("orders.created");
    server.publish(env.clone(), &token()).await.unwrap();

    assert!(eventually(DELIVERY_TIMEOUT, || handler.ids() == vec![env.id()]).await);

    client.stop(&token()).await.unwrap();
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_fan_out_to_server_and_every_matching_client() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let local = CountingHandler::new();
    server.subscribe("orders.*", local.handler(), &token()).await.unwrap();

    let a = start_client(&path).await;
    let b = start_client(&path).await;
    let c = start_client(&path).await;
    let on_a = CountingHandler::new();
    let on_b = CountingHandler::new();
    let on_c = CountingHandler::new();
    a.subscribe("orders.created", on_a.handler(), &token()).await.unwrap();
    b.subscribe("#", on_b.handler(), &token()).await.unwrap();
    c.subscribe("billing.#", on_c.handler(), &token()).await.unwrap();

    let publisher = start_client(&path).await;
    publisher.publish(event("orders.created"), &token()).await.unwrap();

    assert!(
        eventually(DELIVERY_TIMEOUT, || {
            local.get() == 1 && on_a.get() == 1 && on_b.get() == 1
        })
        .await
    );
    settle().await;
    assert_eq!(on_c.get(), 0);

    for transport in [&publisher, &c, &b, &a, &server] {
        transport.stop(&token()).await.unwrap();
    }
}

#[tokio::test]
async fn test_publisher_receives_own_envelope_when_subscribed() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let client = start_client(&path).await;
    let handler = CountingHandler::new();
    client.subscribe("echo", handler.handler(), &token()).await.unwrap();

    client.publish(event("echo"), &token()).await.unwrap();

    assert!(eventually(DELIVERY_TIMEOUT, || handler.get() == 1).await);
    client.stop(&token()).await.unwrap();
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_ordering_preserved_per_publisher() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let subscriber = start_client(&path).await;
    let publisher = start_client(&path).await;
    let handler = RecordingHandler::new();
    subscriber.subscribe("seq.#", handler.handler(), &token()).await.unwrap();

    let mut sent = Vec::new();
    for i in 0..50 {
        let env = event(&format!("seq.{i}"));
        sent.push(env.id());
        publisher.publish(env, &token()).await.unwrap();
    }

    assert!(eventually(DELIVERY_TIMEOUT, || handler.seen().len() == 50).await);
    assert_eq!(handler.ids(), sent);

    publisher.stop(&token()).await.unwrap();
    subscriber.stop(&token()).await.unwrap();
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_duplicate_pattern_on_client_delivers_once_per_handler() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let client = start_client(&path).await;
    let first = CountingHandler::new();
    let second = CountingHandler::new();
    client.subscribe("x.y", first.handler(), &token()).await.unwrap();
    client.subscribe("x.y", second.handler(), &token()).await.unwrap();

    server.publish(event("x.y"), &token()).await.unwrap();

    assert!(eventually(DELIVERY_TIMEOUT, || first.get() == 1 && second.get() == 1).await);
    settle().await;
    assert_eq!(first.get() + second.get(), 2);

    client.stop(&token()).await.unwrap();
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_raw_client_subscribe_gets_ack_and_deliveries() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;

    let mut stream = UnixStream::connect(&path).await.unwrap();
    let frame = encode(&WireMessage::subscribe("raw.*"), DEFAULT_MAX_FRAME_BYTES).unwrap();
    stream.write_all(&frame).await.unwrap();

    let ack = read_message(&mut stream, DEFAULT_MAX_FRAME_BYTES)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ack.kind, WireType::Subscribed);
    assert_eq!(ack.pattern.as_deref(), Some("raw.*"));

    let env = event("raw.hello");
    server.publish(env.clone(), &token()).await.unwrap();

    let delivery = read_message(&mut stream, DEFAULT_MAX_FRAME_BYTES)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.kind, WireType::Envelope);
    assert_eq!(delivery.envelope.unwrap().id(), env.id());

    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_raw_client_publish_reaches_server_handlers() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let handler = RecordingHandler::new();
    server.subscribe("svc.op", handler.handler(), &token()).await.unwrap();

    let mut stream = UnixStream::connect(&path).await.unwrap();
    let env = request("svc", "op");
    let frame = encode(&WireMessage::publish(env.clone()), DEFAULT_MAX_FRAME_BYTES).unwrap();
    stream.write_all(&frame).await.unwrap();

    assert!(eventually(DELIVERY_TIMEOUT, || handler.ids() == vec![env.id()]).await);
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_invalid_inbound_envelope_dropped_connection_kept() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let handler = CountingHandler::new();
    server.subscribe("#", handler.handler(), &token()).await.unwrap();

    let mut stream = UnixStream::connect(&path).await.unwrap();
    // Request without verb
    let invalid = Arc::new(Envelope::new(EnvelopeKind::Request, json!({})).with_service("svc"));
    let frame = encode(&WireMessage::publish(invalid), DEFAULT_MAX_FRAME_BYTES).unwrap();
    stream.write_all(&frame).await.unwrap();

    // Same connection still usable afterwards
    let frame = encode(&WireMessage::subscribe("after"), DEFAULT_MAX_FRAME_BYTES).unwrap();
    stream.write_all(&frame).await.unwrap();
    let ack = read_message(&mut stream, DEFAULT_MAX_FRAME_BYTES)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ack.kind, WireType::Subscribed);
    assert_eq!(handler.get(), 0);

    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_bad_length_drops_only_that_connection() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let good = start_client(&path).await;
    let handler = CountingHandler::new();
    good.subscribe("ok", handler.handler(), &token()).await.unwrap();

    for bad_length in [0i32, -1, (DEFAULT_MAX_FRAME_BYTES + 1) as i32] {
        let mut rogue = UnixStream::connect(&path).await.unwrap();
        rogue.write_all(&bad_length.to_le_bytes()).await.unwrap();

        // Server closes the rogue connection without waiting for a body
        let closed = tokio::time::timeout(
            DELIVERY_TIMEOUT,
            read_message(&mut rogue, DEFAULT_MAX_FRAME_BYTES),
        )
        .await
        .expect("rogue connection was not closed");
        assert!(matches!(closed, Ok(None) | Err(_)));
    }

    assert!(eventually(DELIVERY_TIMEOUT, || server.connection_count() == Some(1)).await);

    server.publish(event("ok"), &token()).await.unwrap();
    assert!(eventually(DELIVERY_TIMEOUT, || handler.get() == 1).await);

    good.stop(&token()).await.unwrap();
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_unexpected_frame_from_client_closes_connection() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;

    let mut rogue = UnixStream::connect(&path).await.unwrap();
    let frame = encode(&WireMessage::deliver(event("x")), DEFAULT_MAX_FRAME_BYTES).unwrap();
    rogue.write_all(&frame).await.unwrap();

    let closed = tokio::time::timeout(
        DELIVERY_TIMEOUT,
        read_message(&mut rogue, DEFAULT_MAX_FRAME_BYTES),
    )
    .await
    .expect("connection was not closed");
    assert!(matches!(closed, Ok(None) | Err(_)));
    assert!(eventually(DELIVERY_TIMEOUT, || server.connection_count() == Some(0)).await);

    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_oversize_publish_refused_before_write() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let config = IpcConfig::client(path.clone()).with_max_frame_bytes(512);
    let client = IpcTransport::new(config).unwrap();
    client.start(&token()).await.unwrap();

    let big = Arc::new(Envelope::event("big", json!("x".repeat(2048))));
    let result = client.publish(big, &token()).await;
    assert!(matches!(result, Err(BusError::Protocol(_))));

    // Nothing half-written: the connection still works
    let handler = CountingHandler::new();
    client.subscribe("small", handler.handler(), &token()).await.unwrap();
    server.publish(event("small"), &token()).await.unwrap();
    assert!(eventually(DELIVERY_TIMEOUT, || handler.get() == 1).await);

    client.stop(&token()).await.unwrap();
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_stop_deletes_socket_and_is_idempotent() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    assert!(path.exists());

    server.stop(&token()).await.unwrap();
    assert!(!path.exists());
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_socket_kept_when_delete_disabled() {
    let (_dir, path) = temp_socket();
    let config = IpcConfig {
        delete_socket_on_stop: false,
        ..IpcConfig::server(path.clone())
    };
    let server = IpcTransport::new(config).unwrap();
    server.start(&token()).await.unwrap();
    server.stop(&token()).await.unwrap();
    assert!(path.exists());

    // The leftover is stale and is cleared by the next server
    let next = start_server(&path).await;
    next.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_second_server_on_live_socket_fails() {
    let (_dir, path) = temp_socket();
    let first = start_server(&path).await;

    let second = IpcTransport::server(path.clone()).unwrap();
    let result = second.start(&token()).await;
    assert!(
        matches!(&result, Err(BusError::Io(e)) if e.kind() == std::io::ErrorKind::AddrInUse),
        "unexpected: {result:?}"
    );

    // First server unaffected
    let client = start_client(&path).await;
    client.stop(&token()).await.unwrap();
    first.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_stale_socket_removed_on_start() {
    let (_dir, path) = temp_socket();
    {
        // Bound then dropped: file remains, nobody listens
        let _stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
    }
    assert!(path.exists());

    let server = start_server(&path).await;
    let client = start_client(&path).await;
    client.stop(&token()).await.unwrap();
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_regular_file_at_socket_path_is_not_removed() {
    let (_dir, path) = temp_socket();
    std::fs::write(&path, b"not a socket").unwrap();

    let server = IpcTransport::server(path.clone()).unwrap();
    let result = server.start(&token()).await;

    assert!(matches!(result, Err(BusError::Config(_))), "unexpected: {result:?}");
    assert!(!server.is_started());
    assert_eq!(std::fs::read(&path).unwrap(), b"not a socket");
}

#[tokio::test]
async fn test_server_creates_missing_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("bus.sock");

    let server = start_server(&path).await;
    assert!(path.exists());
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_server_restart_after_stop() {
    let (_dir, path) = temp_socket();
    let server = IpcTransport::server(path.clone()).unwrap();
    let handler = CountingHandler::new();
    server.subscribe("a", handler.handler(), &token()).await.unwrap();

    server.start(&token()).await.unwrap();
    server.stop(&token()).await.unwrap();
    server.start(&token()).await.unwrap();

    server.publish(event("a"), &token()).await.unwrap();
    assert_eq!(handler.get(), 1);
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_client_restart_resubscribes() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let client = start_client(&path).await;
    let handler = CountingHandler::new();
    client.subscribe("r.#", handler.handler(), &token()).await.unwrap();

    client.stop(&token()).await.unwrap();
    client.start(&token()).await.unwrap();

    server.publish(event("r.1"), &token()).await.unwrap();
    assert!(eventually(DELIVERY_TIMEOUT, || handler.get() == 1).await);

    client.stop(&token()).await.unwrap();
    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_client_start_without_server_fails() {
    let (_dir, path) = temp_socket();
    let client = IpcTransport::client(path).unwrap();

    let result = client.start(&token()).await;
    assert!(matches!(result, Err(BusError::Io(_))));
    assert!(!client.is_started());
}

#[tokio::test]
async fn test_client_subscribe_times_out_without_ack() {
    let (_dir, path) = temp_socket();
    // Accepts and reads, never answers
    let listener = UnixListener::bind(&path).unwrap();
    let silent = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        while let Ok(Some(_)) = read_message(&mut stream, DEFAULT_MAX_FRAME_BYTES).await {}
    });

    let config = IpcConfig::client(path.clone()).with_subscribe_timeout(Duration::from_millis(100));
    let client = IpcTransport::new(config).unwrap();
    client.start(&token()).await.unwrap();

    let result = client
        .subscribe("never", CountingHandler::new().handler(), &token())
        .await;
    assert!(matches!(result, Err(BusError::Timeout(_))));

    client.stop(&token()).await.unwrap();
    silent.abort();
}

#[tokio::test]
async fn test_client_subscribe_cancelled_while_waiting() {
    let (_dir, path) = temp_socket();
    let listener = UnixListener::bind(&path).unwrap();
    let silent = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        while let Ok(Some(_)) = read_message(&mut stream, DEFAULT_MAX_FRAME_BYTES).await {}
    });

    let client = IpcTransport::client(path.clone()).unwrap();
    client.start(&token()).await.unwrap();

    let cancel = token();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = client
        .subscribe("never", CountingHandler::new().handler(), &cancel)
        .await;
    assert!(matches!(result, Err(BusError::Cancelled)));

    client.stop(&token()).await.unwrap();
    silent.abort();
}

#[tokio::test]
async fn test_client_publish_after_server_gone_fails() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let client = start_client(&path).await;

    server.stop(&token()).await.unwrap();

    let mut last = Ok(());
    for _ in 0..50 {
        last = client.publish(event("a"), &token()).await;
        if last.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(matches!(last, Err(BusError::ConnectionClosed) | Err(BusError::Io(_))));

    client.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_cancelled_start_leaves_nothing_bound() {
    let (_dir, path) = temp_socket();
    let server = IpcTransport::server(path.clone()).unwrap();
    let cancel = token();
    cancel.cancel();

    let result = server.start(&cancel).await;
    assert!(matches!(result, Err(BusError::Cancelled)));
    assert!(!server.is_started());
    assert!(!path.exists());
}

/// Connect a raw peer, subscribe it to `pattern`, then never read again.
async fn stalled_subscriber(path: &PathBuf, pattern: &str) -> UnixStream {
    let mut stream = UnixStream::connect(path).await.unwrap();
    let frame = encode(&WireMessage::subscribe(pattern), DEFAULT_MAX_FRAME_BYTES).unwrap();
    stream.write_all(&frame).await.unwrap();
    let ack = read_message(&mut stream, DEFAULT_MAX_FRAME_BYTES)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ack.kind, WireType::Subscribed);
    stream
}

fn bulk_event(topic: &str) -> Arc<Envelope> {
    Arc::new(Envelope::event(topic, json!("x".repeat(200 * 1024))))
}

#[tokio::test]
async fn test_stalled_subscriber_dropped_without_blocking_others() {
    let (_dir, path) = temp_socket();
    let config = IpcConfig::server(path.clone()).with_write_timeout(Duration::from_millis(200));
    let server = IpcTransport::new(config).unwrap();
    server.start(&token()).await.unwrap();

    let stalled = stalled_subscriber(&path, "#").await;

    let receiver = start_client(&path).await;
    let received = CountingHandler::new();
    receiver
        .subscribe("bulk.#", received.handler(), &token())
        .await
        .unwrap();
    let publisher = start_client(&path).await;

    const COUNT: usize = 20;
    for i in 0..COUNT {
        let published = tokio::time::timeout(
            Duration::from_secs(5),
            publisher.publish(bulk_event(&format!("bulk.{i}")), &token()),
        )
        .await;
        assert!(matches!(published, Ok(Ok(()))), "publish {i}: {published:?}");
    }

    // Server-side publish is not held up either
    let direct = tokio::time::timeout(
        Duration::from_secs(5),
        server.publish(bulk_event("bulk.direct"), &token()),
    )
    .await;
    assert!(matches!(direct, Ok(Ok(()))));

    assert!(eventually(Duration::from_secs(10), || received.get() == COUNT + 1).await);
    // Only the stalled peer was dropped
    assert!(eventually(DELIVERY_TIMEOUT, || server.connection_count() == Some(2)).await);

    for transport in [&publisher, &receiver] {
        let stopped = tokio::time::timeout(Duration::from_secs(5), transport.stop(&token())).await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }
    let stopped = tokio::time::timeout(Duration::from_secs(5), server.stop(&token())).await;
    assert!(matches!(stopped, Ok(Ok(()))));
    assert!(!path.exists());
    drop(stalled);
}

#[tokio::test]
async fn test_server_stop_with_stalled_subscriber_completes() {
    let (_dir, path) = temp_socket();
    // Long enough that only stop can end the blocked write
    let config = IpcConfig::server(path.clone()).with_write_timeout(Duration::from_secs(60));
    let server = Arc::new(IpcTransport::new(config).unwrap());
    server.start(&token()).await.unwrap();
    let stalled = stalled_subscriber(&path, "#").await;

    let publishing = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            for i in 0..100 {
                server
                    .publish(bulk_event(&format!("bulk.{i}")), &token())
                    .await?;
            }
            Ok::<(), BusError>(())
        })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stopped = tokio::time::timeout(Duration::from_secs(5), server.stop(&token())).await;
    assert!(matches!(stopped, Ok(Ok(()))));

    // The blocked publish returns once stop closes the connection
    let finished = tokio::time::timeout(Duration::from_secs(5), publishing).await;
    assert!(finished.is_ok());
    drop(stalled);
}

#[tokio::test]
async fn test_client_stop_aborts_publish_blocked_on_server() {
    let (_dir, path) = temp_socket();
    // A server that accepts and never reads
    let listener = UnixListener::bind(&path).unwrap();
    let config = IpcConfig::client(path.clone()).with_write_timeout(Duration::from_secs(60));
    let client = Arc::new(IpcTransport::new(config).unwrap());
    client.start(&token()).await.unwrap();
    let (_held, _) = listener.accept().await.unwrap();

    let publishing = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            loop {
                if let Err(e) = client.publish(bulk_event("bulk"), &token()).await {
                    return e;
                }
            }
        })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stopped = tokio::time::timeout(Duration::from_secs(5), client.stop(&token())).await;
    assert!(matches!(stopped, Ok(Ok(()))));

    let outcome = tokio::time::timeout(Duration::from_secs(5), publishing).await;
    assert!(matches!(
        outcome,
        Ok(Ok(BusError::ConnectionClosed | BusError::NotStarted))
    ));
}

#[tokio::test]
async fn test_client_publish_times_out_when_server_stops_reading() {
    let (_dir, path) = temp_socket();
    let listener = UnixListener::bind(&path).unwrap();
    let config = IpcConfig::client(path.clone()).with_write_timeout(Duration::from_millis(200));
    let client = IpcTransport::new(config).unwrap();
    client.start(&token()).await.unwrap();
    let (_held, _) = listener.accept().await.unwrap();

    let mut last = Ok(());
    for _ in 0..100 {
        last = client.publish(bulk_event("bulk"), &token()).await;
        if last.is_err() {
            break;
        }
    }
    assert!(matches!(last, Err(BusError::Timeout(_))), "got {last:?}");

    // Connection is gone for good
    assert!(matches!(
        client.publish(event("after"), &token()).await,
        Err(BusError::ConnectionClosed)
    ));
    client.stop(&token()).await.unwrap();
}

async fn stop_while_handler_subscribes<F>(transport: Arc<IpcTransport>, trigger: F)
where
    F: Fn() -> BoxFuture<'static, ()>,
{
    let entered = Arc::new(tokio::sync::Notify::new());
    let late = CountingHandler::new().handler();
    let handler = {
        let transport = Arc::clone(&transport);
        let entered = Arc::clone(&entered);
        handler_fn(move |_envelope, _cancel| {
            let transport = Arc::clone(&transport);
            let entered = Arc::clone(&entered);
            let late = Arc::clone(&late);
            async move {
                entered.notify_one();
                // Let stop begin first
                tokio::time::sleep(Duration::from_millis(100)).await;
                transport.subscribe("late.topic", late, &token()).await
            }
        })
    };
    transport.subscribe("trigger", handler, &token()).await.unwrap();

    trigger().await;
    entered.notified().await;

    let stopped = tokio::time::timeout(Duration::from_secs(5), transport.stop(&token())).await;
    assert!(matches!(stopped, Ok(Ok(()))));
}

#[tokio::test]
async fn test_client_stop_while_handler_subscribes() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let client = start_client(&path).await;

    let publisher = Arc::clone(&server);
    stop_while_handler_subscribes(client, move || -> BoxFuture<'static, ()> {
        let publisher = Arc::clone(&publisher);
        Box::pin(async move {
            publisher.publish(event("trigger"), &token()).await.unwrap();
        })
    })
    .await;

    server.stop(&token()).await.unwrap();
}

#[tokio::test]
async fn test_server_stop_while_handler_subscribes() {
    let (_dir, path) = temp_socket();
    let server = start_server(&path).await;
    let client = start_client(&path).await;

    // Published by a client, so the handler runs on the server's connection task
    let publisher = Arc::clone(&client);
    stop_while_handler_subscribes(server, move || -> BoxFuture<'static, ()> {
        let publisher = Arc::clone(&publisher);
        Box::pin(async move {
            publisher.publish(event("trigger"), &token()).await.unwrap();
        })
    })
    .await;

    client.stop(&token()).await.unwrap();
}
