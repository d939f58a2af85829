//! # RPC Flows
//!
//! Request/response matching over the bus:
//!
//! 1. Many concurrent calls, answered out of order, each reach their caller
//! 2. Payload bytes survive the trip unchanged
//! 3. A call over the bus answers exactly what a direct dispatch answers
//! 4. Replies nobody waits for are dropped without disturbing live calls

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use mesh_module::{handler, HandlerResult, Request, Response, Verb};
    use mesh_rpc::RpcRequester;
    use shared_bus::{BusConnector, InMemoryBroker, Publishing, QueueSpec, DEFAULT_BROKER_URI};
    use shared_types::{Envelope, ReplyBody, CONTENT_TYPE_JSON};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::time::timeout;

    use crate::fixtures::{fast_config, module, serving};

    // =========================================================================
    // CONCURRENCY
    // =========================================================================

    /// Replies are delayed in reverse order of arrival, so they come back out
    /// of order; every caller must still get its own answer.
    #[tokio::test]
    async fn test_concurrent_calls_each_get_their_reply() {
        const CALLS: u64 = 40;
        let broker = InMemoryBroker::new();

        let (_worker, _listening) = serving(&broker, "worker", fast_config(3), |m| {
            m.get(
                "/worker/square/:n",
                [handler(|req: Request| async move {
                    let n: u64 = req.param("n").unwrap_or_default().parse()?;
                    tokio::time::sleep(Duration::from_millis((CALLS - n) * 2)).await;
                    HandlerResult::Ok(Some(Response::json(200, &(n * n))))
                })],
            )
            .unwrap();
        })
        .await;
        let caller = module(&broker, "caller", fast_config(3)).await;

        let calls: Vec<_> = (0..CALLS)
            .map(|n| {
                let caller = caller.clone();
                tokio::spawn(async move {
                    let path = format!("/worker/square/{n}");
                    let resp = caller
                        .call(Verb::Get, &path, CONTENT_TYPE_JSON, Bytes::new(), None)
                        .await
                        .unwrap();
                    (n, resp.parse_json::<u64>().unwrap())
                })
            })
            .collect();

        for call in calls {
            let (n, squared) = timeout(Duration::from_secs(5), call).await.unwrap().unwrap();
            assert_eq!(squared, n * n);
        }
    }

    // =========================================================================
    // PAYLOAD FIDELITY
    // =========================================================================

    #[tokio::test]
    async fn test_body_round_trips_byte_identical() {
        let broker = InMemoryBroker::new();
        let (_echo, _listening) = serving(&broker, "echo", fast_config(3), |m| {
            m.put(
                "/echo/raw",
                [handler(|req: Request| async move {
                    HandlerResult::Ok(Some(Response::new(200, req.content_type.clone(), req.body)))
                })],
            )
            .unwrap();
        })
        .await;
        let caller = module(&broker, "caller", fast_config(3)).await;

        let body: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).collect();
        let resp = timeout(
            Duration::from_secs(2),
            caller.call(Verb::Put, "/echo/raw", "application/octet-stream", body.clone(), None),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.content_type, "application/octet-stream");
        assert_eq!(&resp.body[..], &body[..]);
    }

    #[tokio::test]
    async fn test_bus_call_matches_direct_dispatch() {
        let broker = InMemoryBroker::new();
        let (items, _listening) = serving(&broker, "items", fast_config(3), |m| {
            m.get(
                "/items/:id",
                [handler(|req: Request| async move {
                    let tags = req.query_values("tag").to_vec();
                    HandlerResult::Ok(Some(Response::json(
                        200,
                        &serde_json::json!({ "id": req.param("id"), "tags": tags }),
                    )))
                })],
            )
            .unwrap();
        })
        .await;
        let caller = module(&broker, "caller", fast_config(3)).await;
        let path = "/items/9?tag=x&tag=y";

        let over_bus = caller
            .call(Verb::Get, path, CONTENT_TYPE_JSON, Bytes::new(), None)
            .await
            .unwrap();

        let envelope = Envelope::new(Verb::Get, path, CONTENT_TYPE_JSON, Vec::new(), None);
        let direct = items
            .router()
            .dispatch(CONTENT_TYPE_JSON, &envelope.encode().unwrap())
            .await;
        let direct = match ReplyBody::decode(&direct.body).unwrap() {
            ReplyBody::Response(wire) => Response::from(wire),
            ReplyBody::Error(e) => panic!("unexpected error envelope: {e:?}"),
        };

        assert_eq!(over_bus, direct);
    }

    // =========================================================================
    // ORPHANED REPLIES
    // =========================================================================

    /// A responder that answers twice, and once with an id nobody issued.
    /// Only the first matching reply is delivered; the rest are dropped.
    #[tokio::test]
    async fn test_orphan_replies_are_dropped() {
        let broker = InMemoryBroker::new();
        let server = broker.dial(DEFAULT_BROKER_URI).await.unwrap();
        server.declare_queue(QueueSpec::named("noisy")).await.unwrap();
        let mut inbound = server.consume("noisy", true).await.unwrap();

        tokio::spawn(async move {
            while let Some(delivery) = inbound.recv().await {
                let reply_to = delivery.reply_to.clone().unwrap();
                let id = delivery.correlation_id.clone().unwrap();
                let replies = [
                    (id.clone(), "first"),
                    ("999999".to_string(), "stranger"),
                    (id, "again"),
                ];
                for (corr, body) in replies {
                    let msg = Publishing::new(CONTENT_TYPE_JSON, Bytes::from(body))
                        .with_correlation_id(corr);
                    server.publish("", &reply_to, msg).await.unwrap();
                }
            }
        });

        let requester = RpcRequester::connect(broker.dial(DEFAULT_BROKER_URI).await.unwrap())
            .await
            .unwrap();
        let reply = timeout(
            Duration::from_secs(1),
            requester.call("noisy", CONTENT_TYPE_JSON, Bytes::from_static(b"{}")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(&reply.body[..], b"first");

        let stats = requester.registry().stats();
        timeout(Duration::from_secs(1), async {
            while stats.total_orphaned.load(Ordering::Relaxed) < 2 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(stats.total_completed.load(Ordering::Relaxed), 1);
        assert_eq!(requester.registry().pending_count(), 0);

        // The requester is still healthy afterwards.
        assert!(!requester.is_closed());
        let again = timeout(
            Duration::from_secs(1),
            requester.call("noisy", CONTENT_TYPE_JSON, Bytes::from_static(b"{}")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(&again.body[..], b"first");
    }
}
