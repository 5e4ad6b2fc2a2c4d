//! Redis integration tests.
//!
//! These require a running Redis instance (REDIS_URL) and are ignored by
//! default.

use estudio_models::{JobPriority, RenderSpec, SceneSpec};
use estudio_queue::{ControlChannel, ControlCommand, JobQueue, ProgressChannel, QueueJob, RenderVideoJob};

fn sample_job(user: &str, project: &str) -> RenderVideoJob {
    RenderVideoJob::new(
        user,
        RenderSpec::new(
            project,
            vec![SceneSpec {
                id: "s1".into(),
                image: "s1.png".into(),
                title: "Slide".into(),
                duration_secs: 3.0,
                transition: Default::default(),
                transition_duration_secs: 0.5,
            }],
        ),
    )
}

/// Test Redis connection and queue initialization.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let stats = queue.stats().await.expect("Failed to get stats");
    println!("Queue depth: {}", stats.total_queued());
}

/// Test job enqueue and dequeue cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_job_enqueue_dequeue() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job = sample_job("test_user_123", "test-project-dq");
    let job_id = job.job_id.clone();

    queue
        .enqueue(QueueJob::RenderVideo(job))
        .await
        .expect("Failed to enqueue");

    let messages = queue
        .consume("test-consumer", 1000, 1)
        .await
        .expect("Failed to consume");

    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.job.job_id(), &job_id);

    queue
        .ack(&message.stream, &message.id)
        .await
        .expect("Failed to ack");
    queue
        .clear_dedup(&message.job)
        .await
        .expect("Failed to clear dedup");
}

/// Test duplicate jobs are rejected while the dedup key lives.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_rejected() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job = sample_job("test_dup_user", "test-project-dup");

    queue
        .enqueue(QueueJob::RenderVideo(job.clone()))
        .await
        .expect("First enqueue should succeed");

    let dup = queue.enqueue(QueueJob::RenderVideo(job.clone())).await;
    assert!(dup.is_err(), "Duplicate enqueue should be rejected");

    queue
        .clear_dedup(&QueueJob::RenderVideo(job))
        .await
        .expect("Failed to clear dedup");
}

/// Urgent jobs dispatch before normal ones.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_priority_dispatch_order() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let normal = sample_job("test_prio_user", "test-project-normal");
    let urgent = sample_job("test_prio_user", "test-project-urgent")
        .with_priority(JobPriority::Urgent);
    let urgent_id = urgent.job_id.clone();

    queue
        .enqueue(QueueJob::RenderVideo(normal.clone()))
        .await
        .expect("enqueue normal");
    queue
        .enqueue(QueueJob::RenderVideo(urgent.clone()))
        .await
        .expect("enqueue urgent");

    let messages = queue
        .consume("test-prio-consumer", 1000, 10)
        .await
        .expect("consume");

    assert!(!messages.is_empty());
    assert_eq!(
        messages[0].job.job_id(),
        &urgent_id,
        "urgent job should dispatch first"
    );

    for message in &messages {
        queue.ack(&message.stream, &message.id).await.ok();
        queue.clear_dedup(&message.job).await.ok();
    }
}

/// Test DLQ functionality.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dlq() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job = sample_job("test_dlq_user", "test-project-dlq");

    queue
        .enqueue(QueueJob::RenderVideo(job))
        .await
        .expect("Failed to enqueue");

    let messages = queue
        .consume("test-dlq-consumer", 1000, 1)
        .await
        .expect("Failed to consume");
    assert!(!messages.is_empty());

    queue
        .dlq(&messages[0], "Test error")
        .await
        .expect("Failed to move to DLQ");

    let stats = queue.stats().await.expect("stats");
    assert!(stats.dlq > 0);

    queue.clear_dedup(&messages[0].job).await.ok();
}

/// Test progress channel pub/sub roundtrip.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_progress_pubsub() {
    use futures_util::StreamExt;

    dotenvy::dotenv().ok();
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

    let channel = ProgressChannel::new(&redis_url).expect("channel");
    let job_id = estudio_models::JobId::new();

    let mut stream = channel.subscribe(&job_id).await.expect("subscribe");

    channel.log(&job_id, "hello").await.expect("publish");

    let event = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next())
        .await
        .expect("event should arrive")
        .expect("stream open");
    match event {
        estudio_models::JobEvent::Log { message, .. } => assert_eq!(message, "hello"),
        other => panic!("unexpected event: {other:?}"),
    }
}

/// Test control channel pub/sub roundtrip.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_control_pubsub() {
    use futures_util::StreamExt;

    dotenvy::dotenv().ok();
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

    let channel = ControlChannel::new(&redis_url).expect("channel");
    let job_id = estudio_models::JobId::new();

    let mut stream = channel.subscribe(&job_id).await.expect("subscribe");

    channel
        .publish(&job_id, ControlCommand::Pause)
        .await
        .expect("publish");

    let command = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next())
        .await
        .expect("command should arrive")
        .expect("stream open");
    assert_eq!(command, ControlCommand::Pause);
}
