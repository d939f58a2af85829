//! # Resilience Flows
//!
//! Behaviour across broker outages:
//!
//! 1. A delivery whose reply was never published is redelivered after the
//!    connection drops
//! 2. A listener gives up once reconnecting runs out of attempts
//! 3. A listener that reconnected starts again with the full budget
//! 4. Deadlines withdraw calls, and late replies are dropped

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use mesh_module::{handler, HandlerResult, ModuleError, Request, Response, Verb};
    use mesh_rpc::RpcError;
    use shared_bus::InMemoryBroker;
    use shared_types::CONTENT_TYPE_JSON;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    use crate::fixtures::{bound, fast_config, module, serving};

    async fn eventually(what: &str, check: impl Fn() -> bool) {
        timeout(Duration::from_secs(3), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    // =========================================================================
    // REDELIVERY
    // =========================================================================

    /// The first attempt hangs inside the handler, so it is never acked.
    /// Severing the connection returns it to the queue and the reconnected
    /// listener handles it again.
    #[tokio::test]
    async fn test_unacked_call_is_redelivered_after_connection_loss() {
        let broker = InMemoryBroker::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let seen = attempts.clone();
        let (_jobs, listening) = serving(&broker, "jobs", fast_config(5), move |m| {
            m.post(
                "/jobs/run",
                [handler(move |_req: Request| {
                    let seen = seen.clone();
                    async move {
                        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                            std::future::pending::<()>().await;
                        }
                        HandlerResult::Ok(Some(Response::text(200, "done")))
                    }
                })],
            )
            .unwrap();
        })
        .await;

        let caller = module(&broker, "caller", fast_config(5)).await;
        let first_call = {
            let caller = caller.clone();
            tokio::spawn(async move {
                caller
                    .call(Verb::Post, "/jobs/run", CONTENT_TYPE_JSON, Bytes::new(), None)
                    .await
            })
        };
        eventually("first attempt", || attempts.load(Ordering::SeqCst) == 1).await;

        broker.sever_connections();

        // The first caller lost its reply queue with the connection.
        let lost = timeout(Duration::from_secs(1), first_call).await.unwrap().unwrap();
        assert!(matches!(lost, Err(e) if e.is_connection_lost()));

        eventually("redelivery", || attempts.load(Ordering::SeqCst) == 2).await;
        bound(&broker, "jobs").await;
        eventually("ack of redelivered call", || broker.ready_count("jobs") == 0).await;

        // The listener is still serving and the caller reconnects lazily.
        attempts.store(5, Ordering::SeqCst);
        let resp = timeout(
            Duration::from_secs(2),
            caller.call(Verb::Post, "/jobs/run", CONTENT_TYPE_JSON, Bytes::new(), None),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(&resp.body[..], b"done");
        assert!(!listening.is_finished());
    }

    // =========================================================================
    // SUPERVISOR
    // =========================================================================

    #[tokio::test]
    async fn test_listener_gives_up_after_ceiling() {
        let broker = InMemoryBroker::new();
        let (_svc, listening) = serving(&broker, "svc", fast_config(4), |_| {}).await;

        let dials_before = broker.dial_count();
        broker.set_available(false);
        broker.sever_connections();

        let result = timeout(Duration::from_secs(2), listening).await.unwrap().unwrap();
        assert!(matches!(
            result,
            Err(ModuleError::Rpc(RpcError::ConnectExhausted { attempts: 4, .. }))
        ));
        assert_eq!(broker.dial_count() - dials_before, 4);
    }

    /// Three outages, each costing one failed attempt, against a ceiling of
    /// two. The listener survives because every successful reconnect resets
    /// the count. After a lost session the listener pauses once, dials into
    /// the outage at 60ms, and gets through at 120ms.
    #[tokio::test]
    async fn test_successful_reconnect_resets_budget() {
        let broker = InMemoryBroker::new();
        let mut config = fast_config(2);
        config.retry.delay = Duration::from_millis(60);
        let (svc, listening) = serving(&broker, "svc", config, |m| {
            m.get(
                "/svc/ping",
                [handler(|_req: Request| async move {
                    HandlerResult::Ok(Some(Response::text(200, "pong")))
                })],
            )
            .unwrap();
        })
        .await;

        for outage in 0..3 {
            broker.set_available(false);
            broker.sever_connections();
            tokio::time::sleep(Duration::from_millis(90)).await;
            broker.set_available(true);

            bound(&broker, "svc").await;
            assert!(!listening.is_finished(), "listener stopped after outage {outage}");

            let resp = timeout(
                Duration::from_secs(2),
                svc.call(Verb::Get, "/svc/ping", CONTENT_TYPE_JSON, Bytes::new(), None),
            )
            .await
            .unwrap()
            .unwrap();
            assert_eq!(&resp.body[..], b"pong");
        }

        svc.shutdown();
        let result = timeout(Duration::from_secs(1), listening).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    // =========================================================================
    // DEADLINES
    // =========================================================================

    #[tokio::test]
    async fn test_deadline_withdraws_call_and_late_reply_is_dropped() {
        let broker = InMemoryBroker::new();
        let (_slow, _listening) = serving(&broker, "slow", fast_config(3), |m| {
            m.get(
                "/slow/:ms",
                [handler(|req: Request| async move {
                    let ms: u64 = req.param("ms").unwrap_or_default().parse()?;
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    HandlerResult::Ok(Some(Response::text(200, format!("slept {ms}"))))
                })],
            )
            .unwrap();
        })
        .await;

        let mut config = fast_config(3);
        config.call_timeout = Some(Duration::from_millis(50));
        let caller = module(&broker, "caller", config).await;

        let err = caller
            .call(Verb::Get, "/slow/200", CONTENT_TYPE_JSON, Bytes::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Rpc(RpcError::DeadlineExceeded(_))));

        // Let the late reply arrive; it must not be handed to the next call.
        tokio::time::sleep(Duration::from_millis(250)).await;

        let resp = caller
            .call(Verb::Get, "/slow/1", CONTENT_TYPE_JSON, Bytes::new(), None)
            .await
            .unwrap();
        assert_eq!(&resp.body[..], b"slept 1");
    }
}
