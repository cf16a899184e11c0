mod common;

#[cfg(test)]
mod tests {
    use crate::common::broker::MemoryBroker;
    use crate::common::names::{EXCHANGE, KEY, QUEUE};
    use crate::common::util::{make_config, make_listen_config, make_rabbus};
    use pretty_assertions::assert_eq;
    use rabbus::{ExchangeKind, ListenConfig, ListenError, UnknownExchangeKind};
    use std::sync::Arc;

    #[tokio::test]
    async fn empty_exchange() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let rabbus = make_rabbus(make_config(1), &broker);
        let config = ListenConfig::new()
            .with_kind("direct")
            .with_key(KEY)
            .with_queue(QUEUE);

        // When
        let result = rabbus.listen(config).await;

        // Then
        assert!(matches!(result, Err(ListenError::ExchangeRequired)));
        assert_eq!(broker.bindings(), 0);
    }

    #[tokio::test]
    async fn empty_kind() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let rabbus = make_rabbus(make_config(1), &broker);
        let config = ListenConfig::new()
            .with_exchange(EXCHANGE)
            .with_key(KEY)
            .with_queue(QUEUE);

        // When
        let result = rabbus.listen(config).await;

        // Then
        assert!(matches!(
            result,
            Err(ListenError::KindRequired { exchange }) if exchange == EXCHANGE,
        ));
        assert_eq!(broker.bindings(), 0);
    }

    #[tokio::test]
    async fn unknown_kind() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let rabbus = make_rabbus(make_config(1), &broker);
        let config = make_listen_config().with_kind("x-delayed");

        // When
        let result = rabbus.listen(config).await;

        // Then
        match result {
            Err(ListenError::UnknownKind { exchange, source }) => {
                assert_eq!(exchange, EXCHANGE);
                assert_eq!(source, UnknownExchangeKind("x-delayed".to_string()));
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.route().clone())),
        }
        assert_eq!(broker.bindings(), 0);
    }

    #[tokio::test]
    async fn empty_queue() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let rabbus = make_rabbus(make_config(1), &broker);
        let config = make_listen_config().with_queue("");

        // When
        let result = rabbus.listen(config).await;

        // Then
        assert!(matches!(result, Err(ListenError::QueueRequired { .. })));
        assert_eq!(broker.bindings(), 0);
    }

    #[tokio::test]
    async fn empty_key_on_topic() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let rabbus = make_rabbus(make_config(1), &broker);
        let config = make_listen_config().with_kind("topic").with_key("");

        // When
        let result = rabbus.listen(config).await;

        // Then
        assert!(matches!(
            result,
            Err(ListenError::KeyRequired {
                kind: ExchangeKind::Topic,
                ..
            }),
        ));
        assert_eq!(broker.bindings(), 0);
    }

    #[tokio::test]
    async fn invalid_configs_never_reach_the_broker() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let rabbus = make_rabbus(make_config(1), &broker);
        let configs = [
            make_listen_config().with_exchange(""),
            make_listen_config().with_kind(""),
            make_listen_config().with_kind("bogus"),
            make_listen_config().with_kind("topic").with_key(""),
            make_listen_config().with_kind("direct").with_key(""),
            make_listen_config().with_queue(""),
        ];

        // When
        let mut rejected = 0;
        for config in configs {
            if rabbus.listen(config).await.is_err() {
                rejected += 1;
            }
        }

        // Then
        assert_eq!(rejected, 6);
        assert_eq!(broker.bindings(), 0);
        assert!(broker.cancelled().is_empty());
    }

    #[tokio::test]
    async fn valid_config() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let rabbus = make_rabbus(make_config(1), &broker);

        // When
        let subscription = rabbus.listen(make_listen_config()).await.unwrap();

        // Then
        assert_eq!(subscription.route().exchange(), EXCHANGE);
        assert_eq!(subscription.route().kind(), ExchangeKind::Direct);
        assert_eq!(subscription.route().routing_key(), KEY);
        assert_eq!(subscription.route().queue(), QUEUE);
        assert!(!subscription.is_closed());
        assert_eq!(broker.bindings(), 1);
    }

    #[tokio::test]
    async fn dropping_subscription_cancels_consumer() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let rabbus = make_rabbus(make_config(1), &broker);
        let subscription = rabbus.listen(make_listen_config()).await.unwrap();
        let consumer_tag = subscription.consumer_tag().to_string();

        // When
        drop(subscription);
        for _ in 0..100 {
            if !broker.cancelled().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        // Then
        assert_eq!(broker.cancelled(), vec![consumer_tag]);
    }

    #[tokio::test]
    async fn closing_instance_cancels_every_consumer() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let rabbus = make_rabbus(make_config(1), &broker);
        let mut first = rabbus.listen(make_listen_config()).await.unwrap();
        let mut second = rabbus
            .listen(make_listen_config().with_queue("test_q_2"))
            .await
            .unwrap();

        // When
        rabbus.close().await.unwrap();

        // Then
        assert!(first.recv().await.is_none());
        assert!(second.recv().await.is_none());
        let mut cancelled = broker.cancelled();
        cancelled.sort();
        let mut expected = vec![
            first.consumer_tag().to_string(),
            second.consumer_tag().to_string(),
        ];
        expected.sort();
        assert_eq!(cancelled, expected);
        assert!(matches!(
            rabbus.listen(make_listen_config()).await,
            Err(ListenError::Closed),
        ));
    }
}
