//! `accounts` module: an in-memory account store.
//!
//! | Verb   | Path             | Identity | Answer                       |
//! |--------|------------------|----------|------------------------------|
//! | GET    | `/accounts`      | -        | list, `?owner=` filters      |
//! | GET    | `/accounts/:id`  | -        | one account or 404           |
//! | POST   | `/accounts`      | required | 201 with the new account     |
//! | PUT    | `/accounts/:id`  | required | updated account or 404       |
//! | DELETE | `/accounts/:id`  | required | 204 or 404                   |

use mesh_module::{handler, BoxedHandler, HandlerResult, Module, ModuleError, Request, Response};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One stored account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub owner: String,
    /// Balance in cents.
    pub balance: i64,
}

/// Body of a create request.
#[derive(Debug, Deserialize)]
pub struct NewAccount {
    pub owner: String,
    #[serde(default)]
    pub balance: i64,
}

/// Body of an update request.
#[derive(Debug, Deserialize)]
pub struct AccountUpdate {
    pub owner: Option<String>,
    pub balance: Option<i64>,
}

/// Shared account storage.
#[derive(Debug, Default, Clone)]
pub struct AccountStore {
    accounts: Arc<RwLock<BTreeMap<String, Account>>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Account> {
        self.accounts.read().get(id).cloned()
    }

    pub fn list(&self, owner: Option<&str>) -> Vec<Account> {
        self.accounts
            .read()
            .values()
            .filter(|account| owner.map_or(true, |o| account.owner == o))
            .cloned()
            .collect()
    }

    pub fn create(&self, new: NewAccount) -> Account {
        let account = Account {
            id: Uuid::new_v4().simple().to_string(),
            owner: new.owner,
            balance: new.balance,
        };
        self.accounts
            .write()
            .insert(account.id.clone(), account.clone());
        account
    }

    pub fn update(&self, id: &str, update: AccountUpdate) -> Option<Account> {
        let mut accounts = self.accounts.write();
        let account = accounts.get_mut(id)?;
        if let Some(owner) = update.owner {
            account.owner = owner;
        }
        if let Some(balance) = update.balance {
            account.balance = balance;
        }
        Some(account.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Account> {
        self.accounts.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Answers 401 for anonymous callers, otherwise falls through.
pub fn require_user() -> BoxedHandler {
    handler(|req: Request| async move {
        if req.user.is_some() {
            return Ok(None);
        }
        HandlerResult::Ok(Some(Response::json(401, &json!({ "error": "identity required" }))))
    })
}

fn not_found(id: &str) -> Response {
    Response::json(404, &json!({ "error": format!("account {id} not found") }))
}

/// Register the `accounts` routes on `module`.
pub fn install(module: &Module, store: &AccountStore) -> Result<(), ModuleError> {
    let s = store.clone();
    module.get(
        "/accounts",
        [handler(move |req: Request| {
            let store = s.clone();
            async move {
                let accounts = store.list(req.query_value("owner"));
                HandlerResult::Ok(Some(Response::json(200, &accounts)))
            }
        })],
    )?;

    let s = store.clone();
    module.get(
        "/accounts/:id",
        [handler(move |req: Request| {
            let store = s.clone();
            async move {
                let id = req.param("id").unwrap_or_default();
                HandlerResult::Ok(Some(match store.get(id) {
                    Some(account) => Response::json(200, &account),
                    None => not_found(id),
                }))
            }
        })],
    )?;

    let s = store.clone();
    module.post(
        "/accounts",
        [
            require_user(),
            handler(move |req: Request| {
                let store = s.clone();
                async move {
                    let new: NewAccount = req.json()?;
                    let account = store.create(new);
                    info!(account = %account.id, owner = %account.owner, "Account created");
                    HandlerResult::Ok(Some(Response::json(201, &account)))
                }
            }),
        ],
    )?;

    let s = store.clone();
    module.put(
        "/accounts/:id",
        [
            require_user(),
            handler(move |req: Request| {
                let store = s.clone();
                async move {
                    let id = req.param("id").unwrap_or_default();
                    let update: AccountUpdate = req.json()?;
                    HandlerResult::Ok(Some(match store.update(id, update) {
                        Some(account) => Response::json(200, &account),
                        None => not_found(id),
                    }))
                }
            }),
        ],
    )?;

    let s = store.clone();
    module.delete(
        "/accounts/:id",
        [
            require_user(),
            handler(move |req: Request| {
                let store = s.clone();
                async move {
                    let id = req.param("id").unwrap_or_default();
                    HandlerResult::Ok(Some(match store.remove(id) {
                        Some(_) => Response::no_content(),
                        None => not_found(id),
                    }))
                }
            }),
        ],
    )?;

    Ok(())
}
