//! # Routing Flows
//!
//! What a caller sees for each dispatch outcome:
//!
//! | Situation                   | Status | Body                     |
//! |-----------------------------|--------|--------------------------|
//! | Route answered              | any    | handler's body           |
//! | No route / unknown verb     | 404    | error envelope           |
//! | Handler error               | 500    | envelope with its message|
//! | Handler panic               | 500    | envelope with its message|
//! | Chain produced no answer    | 500    | error envelope           |
//! | Non-JSON inbound message    | 500    | error envelope           |

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use mesh_module::{handler, BoxedHandler, HandlerResult, Request, Response, User, Verb};
    use serde_json::Value;
    use shared_bus::{BusConnector, InMemoryBroker, Publishing, QueueSpec, DEFAULT_BROKER_URI};
    use shared_types::{ErrorEnvelope, ReplyBody, CONTENT_TYPE_JSON};
    use std::time::Duration;
    use tokio::time::timeout;

    use crate::fixtures::{fast_config, module, serving};

    fn admin_only() -> BoxedHandler {
        handler(|req: Request| async move {
            match req.user {
                Some(user) if user.is_admin => Ok(None),
                _ => {
                    let denied = serde_json::json!({ "error": "forbidden" });
                    HandlerResult::Ok(Some(Response::json(403, &denied)))
                }
            }
        })
    }

    async fn setup() -> (InMemoryBroker, std::sync::Arc<mesh_module::Module>) {
        let broker = InMemoryBroker::new();
        let _ = serving(&broker, "vault", fast_config(3), |m| {
            m.get(
                "/vault/secrets/:name",
                [
                    admin_only(),
                    handler(|req: Request| async move {
                        let name = req.param("name").unwrap_or_default().to_string();
                        HandlerResult::Ok(Some(Response::text(200, format!("secret:{name}"))))
                    }),
                ],
            )
            .unwrap();
            m.post(
                "/vault/fail",
                [handler(|_req: Request| async move {
                    Err::<Option<Response>, _>(anyhow::anyhow!("disk on fire"))
                })],
            )
            .unwrap();
            m.put(
                "/vault/jam",
                [handler(|req: Request| async move {
                    if req.body.is_empty() {
                        panic!("vault door jammed");
                    }
                    HandlerResult::Ok(Some(Response::no_content()))
                })],
            )
            .unwrap();
            m.delete(
                "/vault/nothing",
                [handler(|_req: Request| async move { HandlerResult::Ok(None) })],
            )
            .unwrap();
        })
        .await;
        let caller = module(&broker, "caller", fast_config(3)).await;
        (broker, caller)
    }

    fn error_body(resp: &Response) -> Value {
        assert_eq!(resp.content_type, CONTENT_TYPE_JSON);
        resp.parse_json().unwrap()
    }

    #[tokio::test]
    async fn test_middleware_chain_across_bus() {
        let (_broker, caller) = setup().await;

        let anonymous = caller
            .call(Verb::Get, "/vault/secrets/key", CONTENT_TYPE_JSON, Bytes::new(), None)
            .await
            .unwrap();
        assert_eq!(anonymous.status_code, 403);

        let admin = User {
            is_admin: true,
            ..User::with_id("root")
        };
        let allowed = caller
            .call(Verb::Get, "/vault/secrets/key", CONTENT_TYPE_JSON, Bytes::new(), Some(admin))
            .await
            .unwrap();
        assert_eq!(allowed.status_code, 200);
        assert_eq!(&allowed.body[..], b"secret:key");
    }

    #[tokio::test]
    async fn test_unmatched_paths_are_not_found() {
        let (_broker, caller) = setup().await;

        for (verb, path) in [
            (Verb::Get, "/vault/unknown"),
            (Verb::Get, "/vault/secrets/a/b"),
            (Verb::Put, "/vault/secrets/a"),
            (Verb::Get, "/vault"),
        ] {
            let resp = caller
                .call(verb, path, CONTENT_TYPE_JSON, Bytes::new(), None)
                .await
                .unwrap();
            assert_eq!(resp.status_code, 404, "{verb} {path}");
            let body = error_body(&resp);
            assert_eq!(body["status_code"], 404);
            assert!(!body["message"].as_str().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_handler_error_is_500_with_message() {
        let (_broker, caller) = setup().await;

        let resp = caller
            .call(Verb::Post, "/vault/fail", CONTENT_TYPE_JSON, Bytes::new(), None)
            .await
            .unwrap();
        assert_eq!(resp.status_code, 500);
        assert!(error_body(&resp)["message"]
            .as_str()
            .unwrap()
            .contains("disk on fire"));
    }

    /// A panicking handler still answers its caller, and the module keeps
    /// serving afterwards.
    #[tokio::test]
    async fn test_handler_panic_is_500_and_module_survives() {
        let (broker, caller) = setup().await;

        let resp = timeout(
            Duration::from_secs(1),
            caller.call(Verb::Put, "/vault/jam", CONTENT_TYPE_JSON, Bytes::new(), None),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(resp.status_code, 500);
        assert!(error_body(&resp)["message"]
            .as_str()
            .unwrap()
            .contains("vault door jammed"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.ready_count("vault"), 0);
        assert_eq!(broker.consumer_count("vault"), 1);

        let admin = User {
            is_admin: true,
            ..User::with_id("root")
        };
        let path = "/vault/secrets/k";
        let after = timeout(
            Duration::from_secs(1),
            caller.call(Verb::Get, path, CONTENT_TYPE_JSON, Bytes::new(), Some(admin)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(after.status_code, 200);
    }

    #[tokio::test]
    async fn test_chain_without_answer_is_500() {
        let (_broker, caller) = setup().await;

        let resp = caller
            .call(Verb::Delete, "/vault/nothing", CONTENT_TYPE_JSON, Bytes::new(), None)
            .await
            .unwrap();
        assert_eq!(resp.status_code, 500);
        assert_eq!(error_body(&resp)["message"], "no response produced");
    }

    /// A raw message with a non-JSON content type still gets an answer on
    /// its reply-to queue.
    #[tokio::test]
    async fn test_non_json_inbound_gets_500_envelope() {
        let (broker, _caller) = setup().await;

        let client = broker.dial(DEFAULT_BROKER_URI).await.unwrap();
        let reply_queue = client.declare_queue(QueueSpec::anonymous()).await.unwrap();
        let mut replies = client.consume(&reply_queue, true).await.unwrap();

        client
            .publish(
                "",
                "vault",
                Publishing::new("text/plain", Bytes::from_static(b"GET /vault/secrets/x"))
                    .with_correlation_id("7")
                    .with_reply_to(reply_queue.clone()),
            )
            .await
            .unwrap();

        let reply = timeout(Duration::from_secs(1), replies.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.correlation_id.as_deref(), Some("7"));
        assert_eq!(reply.content_type, CONTENT_TYPE_JSON);
        match ReplyBody::decode(&reply.body).unwrap() {
            ReplyBody::Error(ErrorEnvelope { status_code, message }) => {
                assert_eq!(status_code, 500);
                assert!(!message.is_empty());
            }
            other => panic!("expected error envelope, got {other:?}"),
        }
    }

    /// Calling a module nobody registered hangs until the deadline; the
    /// router never sees it.
    #[tokio::test]
    async fn test_call_to_missing_module_times_out() {
        let broker = InMemoryBroker::new();
        let mut config = fast_config(3);
        config.call_timeout = Some(Duration::from_millis(40));
        let caller = module(&broker, "caller", config).await;

        let err = caller
            .call(Verb::Get, "/nobody/here", CONTENT_TYPE_JSON, Bytes::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            mesh_module::ModuleError::Rpc(mesh_rpc::RpcError::DeadlineExceeded(_))
        ));
    }
}
