//! # Mesh Module
//!
//! The service-facing half of Nano-Mesh. A [`Module`] registers under a name,
//! exposes capabilities as verb + path handler chains, and calls other
//! modules' capabilities by path.
//!
//! ```text
//!   gateway                                    accounts
//!  ┌──────────────────┐                      ┌──────────────────┐
//!  │ call(GET,        │   envelope on bus    │ InboundListener  │
//!  │  /accounts/7) ───┼─────────────────────▶│   └▶ Router      │
//!  │                  │                      │       /accounts/:id
//!  │ RpcRequester ◀───┼──────────────────────┼── WireResponse   │
//!  └──────────────────┘  reply, by corr. id  └──────────────────┘
//! ```
//!
//! ## Handler chains
//!
//! Each route holds one or more handlers, run in order. A handler returns
//! `Ok(Some(response))` to answer, `Ok(None)` to pass to the next handler,
//! or `Err(_)` to fail the call with a 500.
//!
//! ```ignore
//! module.get("/accounts/:id", [
//!     handler(require_user),
//!     handler(|req: Request| async move {
//!         let id = req.param("id").unwrap_or_default().to_string();
//!         Ok(Some(Response::json(200, &lookup(&id)?)))
//!     }),
//! ])?;
//! ```

pub mod error;
pub mod module;
pub mod pattern;
pub mod request;
pub mod router;

pub use error::{ModuleError, RouteError};
pub use module::Module;
pub use pattern::RoutePattern;
pub use request::{handler, BoxedHandler, Handler, HandlerResult, Request, Response};
pub use router::Router;

pub use shared_types::{User, Verb};
