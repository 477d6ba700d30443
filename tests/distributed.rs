mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, manager, manual_config, simple_config, Primitive};
use tokenwell::distributed::{ExpirationAfterWriteStrategy, InMemoryLockStorage, ProxyManager, RecoveryStrategy};
use tokenwell::{
    Bandwidth, BucketConfiguration, CommandResult, ExecutionError, ManualClock, RemoteCommand,
    SerializationError, TokensInheritanceStrategy, Version,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_capacity_is_granted_under_contention() {
    init_tracing();
    for primitive in Primitive::ALL {
        let clock = ManualClock::new(0);
        let manager = manager(primitive, manual_config(&clock));
        let bucket = manager
            .proxy("shared".to_string())
            .configuration(simple_config(10, Duration::from_secs(60)))
            .build()
            .unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let bucket = bucket.clone();
                tokio::spawn(async move { bucket.try_consume(1).await })
            })
            .collect();
        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 10, "{primitive:?}");
        assert_eq!(bucket.available_tokens().await.unwrap(), 0, "{primitive:?}");
    }
}

#[tokio::test]
async fn multi_results_are_index_aligned() {
    for primitive in Primitive::ALL {
        let clock = ManualClock::new(0);
        let manager = manager(primitive, manual_config(&clock));
        let bucket = manager
            .proxy("multi".to_string())
            .configuration(simple_config(5, Duration::from_secs(60)))
            .build()
            .unwrap();

        let commands = vec![
            RemoteCommand::TryConsume { tokens: 3 },
            RemoteCommand::TryConsume { tokens: 3 },
            RemoteCommand::GetAvailableTokens,
            RemoteCommand::ConsumeAsMuchAsPossible { limit: 10 },
        ];
        let results = bucket.execute(RemoteCommand::Multi { commands }).await.unwrap().into_multi().unwrap();

        assert_eq!(results.len(), 4);
        assert!(results[0].clone().into_bool().unwrap());
        assert!(!results[1].clone().into_bool().unwrap());
        assert_eq!(results[2].clone().into_long().unwrap(), 2);
        assert_eq!(results[3].clone().into_long().unwrap(), 2);
    }
}

#[tokio::test]
async fn multi_against_missing_bucket_reports_each_command() {
    let clock = ManualClock::new(0);
    let manager = manager(Primitive::CompareAndSwap, manual_config(&clock));
    let bucket = manager
        .proxy("gone".to_string())
        .configuration(simple_config(5, Duration::from_secs(60)))
        .recovery_strategy(RecoveryStrategy::ThrowBucketNotFound)
        .build()
        .unwrap();
    let commands = vec![RemoteCommand::GetAvailableTokens, RemoteCommand::CreateSnapshot];
    assert!(matches!(
        bucket.execute(RemoteCommand::Multi { commands: commands.clone() }).await,
        Err(ExecutionError::BucketNotFound)
    ));

    let results = manager
        .proxy("gone".to_string())
        .configuration(simple_config(5, Duration::from_secs(60)))
        .build()
        .unwrap()
        .execute(RemoteCommand::Multi { commands })
        .await
        .unwrap()
        .into_multi()
        .unwrap();
    assert_eq!(results[0], CommandResult::success(tokenwell::command::Payload::Long(5), false));
}

#[tokio::test]
async fn fixed_ttl_buckets_expire_and_are_collected() {
    for primitive in Primitive::ALL {
        let clock = ManualClock::new(0);
        let config = manual_config(&clock).with_expiration(ExpirationAfterWriteStrategy::FixedTtl(Duration::from_secs(1)));
        let manager = manager(primitive, config);
        assert!(manager.is_expire_after_write_supported());

        for key in ["a", "b", "c"] {
            let bucket = manager
                .proxy(key.to_string())
                .configuration(simple_config(5, Duration::from_secs(60)))
                .build()
                .unwrap();
            bucket.try_consume(1).await.unwrap();
        }
        assert_eq!(manager.remove_expired(10).await.unwrap(), 0, "{primitive:?}");

        clock.advance(Duration::from_secs(2));
        assert_eq!(manager.get_proxy_configuration(&"a".to_string()).await.unwrap(), None);
        assert_eq!(manager.remove_expired(2).await.unwrap(), 2, "{primitive:?}");
        assert_eq!(manager.remove_expired(2).await.unwrap(), 1, "{primitive:?}");
    }
}

#[tokio::test]
async fn refill_based_ttl_tracks_time_to_full_bucket() {
    let clock = ManualClock::new(0);
    let strategy = ExpirationAfterWriteStrategy::BasedOnTimeForRefillingBucketUpToMax(Duration::from_millis(500));
    let storage = tokenwell::distributed::InMemoryCasStorage::new(Arc::new(clock.clone()));
    let manager = ProxyManager::<String>::builder()
        .config(manual_config(&clock).with_expiration(strategy))
        .compare_and_swap(storage.clone());
    let key = "refill".to_string();
    let bucket = manager.proxy(key.clone()).configuration(simple_config(10, Duration::from_secs(10))).build().unwrap();

    bucket.try_consume(4).await.unwrap();
    // 4 tokens at 1/s take 4s to come back, kept 500ms longer.
    assert_eq!(storage.expires_at_millis(&key), Some(4_500));
}

#[tokio::test]
async fn old_format_peers_share_storage() {
    let clock = ManualClock::new(0);
    let storage = tokenwell::distributed::InMemoryCasStorage::new(Arc::new(clock.clone()));
    let v1 = ProxyManager::<String>::builder()
        .config(manual_config(&clock).with_backward_compatibility_version(Version::V1))
        .compare_and_swap(storage.clone());
    let v2 = ProxyManager::<String>::builder().config(manual_config(&clock)).compare_and_swap(storage.clone());
    let key = "compat".to_string();

    let old = v1.proxy(key.clone()).configuration(simple_config(10, Duration::from_secs(60))).build().unwrap();
    let new = v2.proxy(key.clone()).configuration(simple_config(10, Duration::from_secs(60))).build().unwrap();
    assert!(old.try_consume(3).await.unwrap());
    assert!(new.try_consume(3).await.unwrap());
    assert!(old.try_consume(3).await.unwrap());
    assert_eq!(new.available_tokens().await.unwrap(), 1);

    // Bandwidth ids cannot be written in the first format.
    let with_id = BucketConfiguration::single(
        Bandwidth::simple(10, Duration::from_secs(60)).unwrap().with_id("per-minute").unwrap(),
    );
    let result = old
        .replace_configuration(with_id, TokensInheritanceStrategy::AsIs)
        .await;
    assert!(matches!(result, Err(ExecutionError::Serialization(SerializationError::UnsupportedForVersion { .. }))));
    assert_eq!(new.available_tokens().await.unwrap(), 1);
}

#[tokio::test]
async fn stalled_transactions_time_out_and_roll_back() {
    for primitive in [Primitive::SelectForUpdate, Primitive::AdvisoryLock] {
        let clock = ManualClock::new(0);
        let config = manual_config(&clock).with_request_timeout(Duration::from_millis(50)).unwrap();
        let storage = InMemoryLockStorage::new(Arc::new(clock.clone()));
        let builder = ProxyManager::<String>::builder().config(config);
        let manager = match primitive {
            Primitive::SelectForUpdate => builder.select_for_update(storage.clone()),
            _ => builder.advisory_lock(storage.clone()),
        };
        let key = "slow".to_string();
        let bucket = manager.proxy(key.clone()).configuration(simple_config(10, Duration::from_secs(60))).build().unwrap();
        assert!(bucket.try_consume(1).await.unwrap());

        storage.stall_writes(Duration::from_millis(200));
        let result = bucket.try_consume(1).await;
        assert!(matches!(result, Err(ExecutionError::Timeout { .. })), "{primitive:?}: {result:?}");
        assert_eq!(storage.stats().rollbacks, 1, "{primitive:?}");
        assert_eq!(storage.state(&key).unwrap().consumed_tokens(), 1, "{primitive:?}");

        storage.stall_writes(Duration::ZERO);
        assert!(bucket.try_consume(1).await.unwrap(), "{primitive:?}");
        assert_eq!(storage.state(&key).unwrap().consumed_tokens(), 2, "{primitive:?}");
    }
}

#[tokio::test]
async fn expired_buckets_are_recreated_on_next_use() {
    for primitive in Primitive::ALL {
        let clock = ManualClock::new(0);
        let config = manual_config(&clock)
            .with_expiration(ExpirationAfterWriteStrategy::FixedTtl(Duration::from_secs(1)))
            .with_request_timeout(Duration::from_millis(500))
            .unwrap();
        let manager = manager(primitive, config);
        let bucket = manager
            .proxy("ttl".to_string())
            .configuration(simple_config(5, Duration::from_secs(60)))
            .build()
            .unwrap();

        assert!(bucket.try_consume(5).await.unwrap(), "{primitive:?}");
        clock.advance(Duration::from_secs(5));
        assert!(matches!(bucket.try_consume(5).await, Ok(true)), "{primitive:?}");
        assert_eq!(bucket.available_tokens().await.unwrap(), 0, "{primitive:?}");
    }
}
