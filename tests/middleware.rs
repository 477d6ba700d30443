mod common;

use std::convert::Infallible;
use std::time::Duration;

use common::{manager, manual_config, simple_config, Primitive};
use tokenwell::{LocalBucket, ManualClock, RateLimitError, RateLimitLayer};
use tower::{service_fn, ServiceBuilder, ServiceExt};

#[tokio::test]
async fn proxied_bucket_limits_a_tower_service() {
    let clock = ManualClock::new(0);
    let manager = manager(Primitive::SelectForUpdate, manual_config(&clock));
    let bucket = manager
        .proxy("api".to_string())
        .configuration(simple_config(3, Duration::from_secs(3)))
        .build()
        .unwrap();
    let service = ServiceBuilder::new()
        .layer(RateLimitLayer::new(bucket))
        .service(service_fn(|name: &'static str| async move { Ok::<_, Infallible>(format!("hello {name}")) }));

    for _ in 0..3 {
        assert_eq!(service.clone().oneshot("world").await.unwrap(), "hello world");
    }
    match service.clone().oneshot("world").await {
        Err(RateLimitError::Denied { wait }) => assert_eq!(wait, Duration::from_secs(1)),
        other => panic!("expected denial, got {other:?}"),
    }

    clock.advance(Duration::from_secs(1));
    assert!(service.oneshot("again").await.is_ok());
}

#[tokio::test]
async fn layers_can_share_one_local_bucket() {
    let clock = ManualClock::new(0);
    let bucket = LocalBucket::builder(simple_config(2, Duration::from_secs(60))).clock(clock).lock_free().unwrap();
    let layer = RateLimitLayer::new(bucket);
    let echo = |req: u8| async move { Ok::<_, Infallible>(req) };
    let first = ServiceBuilder::new().layer(layer.clone()).service(service_fn(echo));
    let second = ServiceBuilder::new().layer(layer).service(service_fn(echo));

    assert_eq!(first.clone().oneshot(1).await.unwrap(), 1);
    assert_eq!(second.clone().oneshot(2).await.unwrap(), 2);
    assert!(first.oneshot(3).await.unwrap_err().is_denied());
    assert!(second.oneshot(4).await.unwrap_err().is_denied());
}
