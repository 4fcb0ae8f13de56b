// Directory JSON-RPC client
//
// Talks to the subscriber back office over its `/jsonrpc` endpoint:
// `common.authenticate` for a user id, then `object.execute_kw` for model
// calls. The `{ result | error }` envelope is stripped here so callers only
// see the `result` payload or a typed error.

use std::sync::{PoisonError, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

#[derive(Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<RpcErrorData>,
}

#[derive(Deserialize)]
struct RpcErrorData {
    #[serde(default)]
    message: Option<String>,
}

/// JSON-RPC client for the back-office directory.
pub struct DirectoryClient {
    http: reqwest::Client,
    endpoint: Url,
    db: String,
    login: String,
    password: SecretString,
    uid: RwLock<Option<i64>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("db", &self.db)
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

impl DirectoryClient {
    /// Build a client for `base_url` (the back-office root URL).
    pub fn new(
        base_url: &Url,
        db: impl Into<String>,
        login: impl Into<String>,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::with_client(http, base_url, db, login, password)
    }

    /// Build a client around an existing `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: &Url,
        db: impl Into<String>,
        login: impl Into<String>,
        password: SecretString,
    ) -> Result<Self, Error> {
        let base = base_url.as_str().trim_end_matches('/');
        let endpoint = Url::parse(&format!("{base}/jsonrpc"))?;
        Ok(Self {
            http,
            endpoint,
            db: db.into(),
            login: login.into(),
            password,
            uid: RwLock::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    // ── Session ─────────────────────────────────────────────────────

    /// `common.authenticate`; caches and returns the user id.
    pub async fn authenticate(&self) -> Result<i64, Error> {
        let result = self
            .call(
                "common",
                "authenticate",
                json!([self.db, self.login, self.password.expose_secret(), {}]),
            )
            .await?;

        let Some(uid) = result.as_i64().filter(|uid| *uid > 0) else {
            return Err(Error::Authentication {
                message: format!("directory rejected login for {}", self.login),
            });
        };
        debug!(uid, db = %self.db, "directory authenticated");
        *self.uid.write().unwrap_or_else(PoisonError::into_inner) = Some(uid);
        Ok(uid)
    }

    async fn uid(&self) -> Result<i64, Error> {
        let cached = *self.uid.read().unwrap_or_else(PoisonError::into_inner);
        match cached {
            Some(uid) => Ok(uid),
            None => self.authenticate().await,
        }
    }

    // ── Model calls ─────────────────────────────────────────────────

    /// `object.execute_kw(db, uid, password, model, method, args, kwargs)`.
    pub async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Value,
    ) -> Result<Value, Error> {
        let uid = self.uid().await?;
        debug!(model, method, "execute_kw");
        self.call(
            "object",
            "execute_kw",
            json!([
                self.db,
                uid,
                self.password.expose_secret(),
                model,
                method,
                args,
                kwargs
            ]),
        )
        .await
    }

    /// `search` returning matching record ids.
    pub async fn search(&self, model: &str, domain: Value, limit: Option<u32>) -> Result<Vec<i64>, Error> {
        let kwargs = limit.map_or_else(|| json!({}), |limit| json!({ "limit": limit }));
        let value = self.execute_kw(model, "search", json!([domain]), kwargs).await?;
        serde_json::from_value(value.clone()).map_err(|e| Error::Deserialization {
            message: format!("search on {model}: {e}"),
            body: value.to_string(),
        })
    }

    /// `search_read` returning raw records.
    pub async fn search_read(
        &self,
        model: &str,
        domain: Value,
        fields: &[&str],
        limit: Option<u32>,
    ) -> Result<Vec<Value>, Error> {
        let mut kwargs = json!({ "fields": fields });
        if let Some(limit) = limit {
            kwargs["limit"] = json!(limit);
        }
        let value = self
            .execute_kw(model, "search_read", json!([domain]), kwargs)
            .await?;
        match value {
            Value::Array(rows) => Ok(rows),
            other => Err(Error::Deserialization {
                message: format!("search_read on {model}: expected array"),
                body: other.to_string(),
            }),
        }
    }

    /// `create` returning the new record id.
    pub async fn create(&self, model: &str, values: Value) -> Result<i64, Error> {
        let value = self
            .execute_kw(model, "create", json!([values]), json!({}))
            .await?;
        value.as_i64().ok_or_else(|| Error::Deserialization {
            message: format!("create on {model}: expected integer id"),
            body: value.to_string(),
        })
    }

    /// `write` on the given ids.
    pub async fn write(&self, model: &str, ids: &[i64], values: Value) -> Result<(), Error> {
        self.execute_kw(model, "write", json!([ids, values]), json!({}))
            .await
            .map(drop)
    }

    // ── Transport ───────────────────────────────────────────────────

    async fn call(&self, service: &str, method: &str, args: Value) -> Result<Value, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": id,
        });
        trace!(endpoint = %self.endpoint, service, method, id, "json-rpc call");

        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Authentication {
                message: format!("directory returned HTTP {status}"),
            });
        }
        let resp = resp.error_for_status().map_err(Error::Transport)?;
        let text = resp.text().await.map_err(Error::Transport)?;

        let envelope: RpcEnvelope =
            serde_json::from_str(&text).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: text.clone(),
            })?;

        if let Some(err) = envelope.error {
            let message = err
                .data
                .and_then(|d| d.message)
                .filter(|m| !m.is_empty())
                .unwrap_or(err.message);
            return Err(Error::Directory { message });
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }
}
