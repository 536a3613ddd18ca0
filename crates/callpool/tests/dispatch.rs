use callpool::{
    Client, ClientConfig, Data, Error, Payload, ProducerOptions, RemoteError, Request,
};
use core::time::Duration;
use serde_json::{Value, json};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use tokio::{sync::Semaphore, time::timeout};

fn config(concurrency: usize) -> ClientConfig {
    ClientConfig {
        concurrency,
        ..ClientConfig::default()
    }
    .with_endpoint("completions")
}

fn numbered(id: u64) -> Request {
    Request::from_value(json!({ "id": id })).meta("id", id)
}

async fn echo(_endpoint: String, data: Data) -> Result<Value, RemoteError> {
    Ok(Value::Object(data))
}

async fn collect(completions: &mut callpool::Completions) -> Vec<Payload> {
    let mut released = Vec::new();
    while let Some(payload) = completions.recv().await {
        released.push(payload);
    }
    released
}

#[tokio::test]
async fn unordered_delivers_every_payload_once() {
    let (client, mut completions) = Client::new(config(10), echo).unwrap();

    let producer = client.run_request_function(|client| async move {
        for id in 1..=5 {
            client.request(numbered(id)).await?;
        }
        Ok::<_, Error>(())
    });
    drop(client);

    let released = collect(&mut completions).await;
    assert_eq!(released.len(), 5);

    let ids: HashSet<u64> = released.iter().map(Payload::id).collect();
    assert_eq!(ids, (1..=5).collect());
    assert!(released.iter().all(Payload::succeeded));
    assert!(completions.is_done());

    producer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn ordered_delivery_restores_submission_order() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&finished);
    let slow_first = move |_endpoint: String, data: Data| {
        let log = Arc::clone(&log);
        async move {
            let id = data["id"].as_u64().unwrap();
            tokio::time::sleep(Duration::from_millis((6 - id) * 100)).await;
            log.lock().unwrap().push(id);
            Ok::<_, RemoteError>(json!(id))
        }
    };

    let (client, mut completions) = Client::new(config(5).ordered(), slow_first).unwrap();
    let producer = client.run_request_function(|client| async move {
        for id in 1..=5 {
            client.request(numbered(id)).await?;
        }
        Ok::<_, Error>(())
    });
    drop(client);

    let released: Vec<u64> = collect(&mut completions)
        .await
        .iter()
        .map(Payload::id)
        .collect();

    assert_eq!(*finished.lock().unwrap(), [5, 4, 3, 2, 1]);
    assert_eq!(released, [1, 2, 3, 4, 5]);
    producer.await.unwrap();
}

/// Fails ids divisible by 7 terminally and ids divisible by 3 transiently on
/// their first two attempts.
fn flaky() -> impl Fn(String, Data) -> futures::future::Ready<Result<Value, RemoteError>>
+ Send
+ Sync
+ 'static {
    let attempts = Arc::new(Mutex::new(HashMap::<u64, u32>::new()));
    move |_endpoint: String, data: Data| {
        let id = data["id"].as_u64().unwrap();
        let attempt = {
            let mut attempts = attempts.lock().unwrap();
            let n = attempts.entry(id).or_default();
            *n += 1;
            *n
        };
        let outcome = if id % 7 == 0 {
            Err(RemoteError::terminal(format!("rejected {id}")))
        } else if id % 3 == 0 && attempt < 3 {
            Err(RemoteError::transient(format!("busy {id}")))
        } else {
            Ok(json!(id))
        };
        futures::future::ready(outcome)
    }
}

async fn run_flaky(config: ClientConfig) -> Vec<Payload> {
    let (client, mut completions) = Client::new(config, flaky()).unwrap();
    let producer = client.run_request_function(|client| async move {
        for id in 1..=200 {
            client.request(numbered(id)).await?;
        }
        Ok::<_, Error>(())
    });
    drop(client);

    let released = collect(&mut completions).await;
    producer.await.unwrap();
    released
}

fn flaky_config() -> ClientConfig {
    let mut config = config(8);
    config.queue_capacity = 4;
    config.retry.max_retries = 5;
    config.retry.wait_interval = Duration::from_millis(10);
    config.retry.retry_multiplier = 2.0;
    config
}

fn check_flaky_outcomes(released: &[Payload]) {
    assert_eq!(released.len(), 200);
    let ids: HashSet<u64> = released.iter().map(Payload::id).collect();
    assert_eq!(ids.len(), 200);

    for payload in released {
        let id = payload.id();
        assert_eq!(payload.metadata()["id"], json!(id));
        if id % 7 == 0 {
            assert!(payload.failed());
            assert_eq!(payload.attempt(), 1);
            assert_eq!(
                payload.error(),
                Some(&RemoteError::terminal(format!("rejected {id}")))
            );
        } else if id % 3 == 0 {
            assert!(payload.succeeded());
            assert_eq!(payload.attempt(), 3);
        } else {
            assert!(payload.succeeded());
            assert_eq!(payload.attempt(), 1);
            assert_eq!(payload.response(), Some(&json!(id)));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn no_payload_is_lost_or_duplicated_under_failures() {
    let released = run_flaky(flaky_config()).await;
    check_flaky_outcomes(&released);
}

#[tokio::test(start_paused = true)]
async fn ordered_delivery_holds_under_retries() {
    let released = run_flaky(flaky_config().ordered()).await;
    check_flaky_outcomes(&released);

    let ids: Vec<u64> = released.iter().map(Payload::id).collect();
    assert_eq!(ids, (1..=200).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn full_queue_blocks_the_next_submission() {
    let gate = Arc::new(Semaphore::new(0));
    let remote = {
        let gate = Arc::clone(&gate);
        move |_endpoint: String, _data: Data| {
            let gate = Arc::clone(&gate);
            async move {
                gate.acquire().await.unwrap().forget();
                Ok::<_, RemoteError>(Value::Null)
            }
        }
    };

    let mut config = config(1);
    config.queue_capacity = 2;
    let (client, mut completions) = Client::new(config, remote).unwrap();

    // The only worker takes the first payload and stays busy with it.
    client.request(numbered(1)).await.unwrap();
    timeout(Duration::from_secs(1), async {
        while client.free_slots() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    client.request(numbered(2)).await.unwrap();
    client.request(numbered(3)).await.unwrap();
    assert_eq!(client.free_slots(), 0);

    let blocked = timeout(Duration::from_millis(100), client.request(numbered(4))).await;
    assert!(blocked.is_err());
    assert_eq!(client.submitted(), 3);

    gate.add_permits(1);
    let id = timeout(Duration::from_secs(1), client.request(numbered(4)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 4);

    gate.add_permits(3);
    client.close();
    assert_eq!(completions.pull_all().await, 4);
}

#[tokio::test]
async fn templates_merge_under_request_fields() {
    let remote = |endpoint: String, data: Data| async move {
        Ok::<_, RemoteError>(json!({ "endpoint": endpoint, "data": data }))
    };
    let config = config(2)
        .with_data_template(
            json!({ "model": "gpt-3.5-turbo", "temperature": 0 })
                .as_object()
                .cloned()
                .unwrap(),
        )
        .with_metadata_template(json!({ "run": "nightly" }).as_object().cloned().unwrap());
    let (client, mut completions) = Client::new(config, remote).unwrap();

    client
        .request(Request::from_value(json!({ "temperature": 1, "prompt": "hi" })).meta("id", 1))
        .await
        .unwrap();
    client
        .request(Request::from_value(json!({ "prompt": "yo" })).endpoint("embeddings"))
        .await
        .unwrap();
    client.close();

    let mut released = collect(&mut completions).await;
    released.sort_by_key(Payload::id);

    assert_eq!(
        released[0].response(),
        Some(&json!({
            "endpoint": "completions",
            "data": { "model": "gpt-3.5-turbo", "temperature": 1, "prompt": "hi" }
        }))
    );
    assert_eq!(
        Value::Object(released[0].metadata().clone()),
        json!({ "run": "nightly", "id": 1 })
    );
    assert_eq!(released[1].endpoint(), "embeddings");
    assert_eq!(released[1].data()["temperature"], json!(0));
}

#[tokio::test]
async fn missing_endpoint_is_rejected() {
    let (client, _completions) = Client::new(ClientConfig::default(), echo).unwrap();

    let err = client.request(numbered(1)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));
    assert_eq!(client.submitted(), 0);

    let id = client
        .request(numbered(1).endpoint("completions"))
        .await
        .unwrap();
    assert_eq!(id, 1);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let config = ClientConfig {
        concurrency: 0,
        ..ClientConfig::default()
    };
    assert!(matches!(
        Client::new(config, echo),
        Err(Error::InvalidConfig { .. })
    ));
}

#[tokio::test]
async fn requests_after_end_of_stream_are_refused() {
    let (client, mut completions) = Client::new(config(2), echo).unwrap();

    client.close();
    assert!(client.is_ended());
    assert!(completions.recv().await.is_none());
    assert!(completions.recv().await.is_none());

    assert_eq!(client.request(numbered(1)).await, Err(Error::Closed));
}

#[tokio::test]
async fn producer_error_is_reported_and_stream_still_ends() {
    let (client, mut completions) = Client::new(config(4), echo).unwrap();

    let producer = client.run_request_function(|client| async move {
        for id in 1..=3 {
            client.request(numbered(id)).await.map_err(|e| e.to_string())?;
        }
        Err::<(), _>("source exhausted early".to_string())
    });
    drop(client);

    assert_eq!(completions.pull_all().await, 3);
    assert_eq!(
        producer.await,
        Err(Error::Producer("source exhausted early".to_string()))
    );
}

#[tokio::test]
async fn producer_panic_is_reported_and_stream_still_ends() {
    let (client, mut completions) = Client::new(config(4), echo).unwrap();

    let producer = client.run_request_function(|client| async move {
        client.request(numbered(1)).await.unwrap();
        let explode = client.submitted() == 1;
        if explode {
            panic!("producer exploded");
        }
    });
    drop(client);

    assert_eq!(completions.pull_all().await, 1);
    assert_eq!(producer.await, Err(Error::ProducerPanicked));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_producer_submits_from_the_blocking_pool() {
    let (client, mut completions) = Client::new(config(4), echo).unwrap();

    let producer = client.run_blocking_request_function(|client| {
        for id in 1..=20 {
            client.blocking_request(numbered(id))?;
        }
        Ok::<_, Error>(())
    });
    drop(client);

    let mut ids: Vec<u64> = collect(&mut completions)
        .await
        .iter()
        .map(Payload::id)
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    producer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn producer_without_stop_at_end_leaves_the_client_open() {
    let (client, mut completions) = Client::new(config(2), echo).unwrap();

    let producer = client.run_request_function_with(
        ProducerOptions { stop_at_end: false },
        |client| async move { client.request(numbered(1)).await.map(|_| ()) },
    );
    producer.await.unwrap();

    assert_eq!(completions.recv().await.map(|p| p.id()), Some(1));
    assert!(!client.is_ended());
    assert!(
        timeout(Duration::from_secs(1), completions.recv())
            .await
            .is_err()
    );

    client.close();
    assert!(completions.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn callbacks_fire_once_in_release_order() {
    let slow_first = |_endpoint: String, data: Data| async move {
        let id = data["id"].as_u64().unwrap();
        tokio::time::sleep(Duration::from_millis((6 - id) * 10)).await;
        Ok::<_, RemoteError>(json!(id))
    };
    let (client, mut completions) = Client::new(config(5).ordered(), slow_first).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for id in 1..=5 {
        let seen = Arc::clone(&seen);
        client
            .request(numbered(id).callback(move |payload| {
                assert!(payload.succeeded());
                seen.lock().unwrap().push(payload.id());
            }))
            .await
            .unwrap();
    }
    client.close();

    assert_eq!(completions.pull_all().await, 5);
    assert_eq!(*seen.lock().unwrap(), [1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn panicking_remote_fails_the_payload_and_keeps_the_worker() {
    let remote = |_endpoint: String, data: Data| async move {
        let id = data["id"].as_u64().unwrap();
        if id == 2 {
            panic!("remote blew up on {id}");
        }
        Ok::<_, RemoteError>(json!(id))
    };
    let (client, mut completions) = Client::new(config(1), remote).unwrap();
    for id in 1..=4 {
        client.request(numbered(id)).await.unwrap();
    }
    client.close();

    let released = timeout(Duration::from_secs(5), collect(&mut completions))
        .await
        .unwrap();
    assert_eq!(released.len(), 4);
    assert!(completions.is_done());

    for payload in &released {
        if payload.id() == 2 {
            assert!(payload.failed());
            assert_eq!(payload.attempt(), 1);
            assert_eq!(
                payload.error(),
                Some(&RemoteError::terminal("remote call panicked"))
            );
        } else {
            assert!(payload.succeeded());
        }
    }
    assert_eq!(client.snapshot().outstanding, 0);
    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn panicking_callback_does_not_stall_ordered_delivery() {
    let (client, mut completions) = Client::new(config(4).ordered(), echo).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for id in 1..=4 {
        let seen = Arc::clone(&seen);
        client
            .request(numbered(id).callback(move |payload| {
                if payload.id() == 1 {
                    panic!("callback blew up");
                }
                seen.lock().unwrap().push(payload.id());
            }))
            .await
            .unwrap();
    }
    client.close();

    let released: Vec<u64> = timeout(Duration::from_secs(5), collect(&mut completions))
        .await
        .unwrap()
        .iter()
        .map(Payload::id)
        .collect();
    assert_eq!(released, [1, 2, 3, 4]);
    assert_eq!(*seen.lock().unwrap(), [2, 3, 4]);
    assert_eq!(client.snapshot().outstanding, 0);
}

#[tokio::test]
async fn shutdown_drains_and_joins_the_pool() {
    let (client, mut completions) = Client::new(config(3), echo).unwrap();
    for id in 1..=10 {
        client.request(numbered(id)).await.unwrap();
    }

    client.shutdown().await.unwrap();
    assert!(client.is_ended());
    assert_eq!(client.snapshot().outstanding, 0);
    assert_eq!(completions.pull_all().await, 10);

    // A second shutdown finds nothing left to join.
    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_work_after_the_timeout() {
    let stuck = |_endpoint: String, _data: Data| async move {
        futures::future::pending::<()>().await;
        Ok::<_, RemoteError>(Value::Null)
    };
    let mut config = config(1);
    config.shutdown_timeout = Duration::from_secs(5);
    let (client, mut completions) = Client::new(config, stuck).unwrap();

    client.request(numbered(1)).await.unwrap();
    client.request(numbered(2)).await.unwrap();

    client.shutdown().await.unwrap();
    assert!(client.is_ended());
    assert_eq!(completions.pull_all().await, 0);
}
