//! `gateway` module: calls `accounts` on the caller's behalf.
//!
//! The caller's identity is passed along on every outbound call, so
//! `accounts` applies its own identity check.

use mesh_module::{handler, HandlerResult, Module, ModuleError, Request, Response, Verb};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Upgrade the module a handler was registered on.
fn owner(module: &Weak<Module>) -> anyhow::Result<Arc<Module>> {
    module
        .upgrade()
        .ok_or_else(|| anyhow::anyhow!("gateway module has shut down"))
}

/// Register the `gateway` routes on `module`.
pub fn install(module: &Arc<Module>) -> Result<(), ModuleError> {
    let name = module.name().to_string();
    module.get(
        "/gateway/health",
        [handler(move |_req: Request| {
            let name = name.clone();
            async move {
                let health = json!({ "status": "ok", "module": name });
                HandlerResult::Ok(Some(Response::json(200, &health)))
            }
        })],
    )?;

    let weak = Arc::downgrade(module);
    module.get(
        "/gateway/accounts/:id",
        [handler(move |req: Request| {
            let weak = weak.clone();
            async move {
                let gateway = owner(&weak)?;
                let id = req.param("id").unwrap_or_default();
                let path = format!("/accounts/{}", utf8_percent_encode(id, NON_ALPHANUMERIC));

                let upstream = gateway
                    .call(Verb::Get, &path, &req.content_type, req.body.clone(), req.user.clone())
                    .await?;
                debug!(path = %path, status = upstream.status_code, "Upstream answered");

                if !upstream.is_success() {
                    return Ok(Some(upstream));
                }
                let account: Value = upstream.parse_json()?;
                HandlerResult::Ok(Some(Response::json(
                    200,
                    &json!({ "account": account, "via": gateway.name() }),
                )))
            }
        })],
    )?;

    let weak = Arc::downgrade(module);
    module.post(
        "/gateway/accounts",
        [handler(move |req: Request| {
            let weak = weak.clone();
            async move {
                let gateway = owner(&weak)?;
                let upstream = gateway
                    .call(
                        Verb::Post,
                        "/accounts",
                        &req.content_type,
                        req.body.clone(),
                        req.user.clone(),
                    )
                    .await?;
                HandlerResult::Ok(Some(upstream))
            }
        })],
    )?;

    Ok(())
}
