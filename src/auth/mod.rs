use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::database::render::render_select;
use crate::database::{BindParams, SelectQuery, Storage, StatementBuilder, Table};
use crate::error::ApiError;
use crate::filter::{CompileOptions, FieldFilter};
use crate::view::{Context, Envelope, Next, Reply, Stage};

/// Message of every authentication failure
pub const UNAUTHORIZED: &str = "Default Unauthorized";

/// `(plain, stored) -> matches`
pub type PasswordVerifier = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// `token -> payload`, `None` when the token is not acceptable
pub type TokenDecoder = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

fn unauthorized() -> Result<Reply, ApiError> {
    Ok(Envelope::new(401, UNAUTHORIZED).into())
}

/// Lowercase hex SHA-256 digest
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_sha256(plain: &str, stored: &str) -> bool {
    hash_password(plain).eq_ignore_ascii_case(stored)
}

/// `Authorization: Basic base64(name:password)` checked against a user table.
///
/// A session carrying a truthy `session_key` skips the lookup; a
/// successful login sets it.
pub struct BasicAuth {
    storage: Arc<dyn Storage>,
    table: Table,
    name_key: String,
    pwd_key: String,
    session_key: String,
    verifier: PasswordVerifier,
}

impl BasicAuth {
    pub fn new(storage: Arc<dyn Storage>, table: Table) -> Self {
        Self {
            storage,
            table,
            name_key: "user_name".into(),
            pwd_key: "password".into(),
            session_key: "is_login".into(),
            verifier: Arc::new(verify_sha256),
        }
    }

    pub fn name_key(mut self, name_key: impl Into<String>) -> Self {
        self.name_key = name_key.into();
        self
    }

    pub fn pwd_key(mut self, pwd_key: impl Into<String>) -> Self {
        self.pwd_key = pwd_key.into();
        self
    }

    pub fn session_key(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = session_key.into();
        self
    }

    pub fn verifier(mut self, verifier: PasswordVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    fn credentials(header: &str) -> Option<(String, String)> {
        let encoded = header.strip_prefix("Basic ").unwrap_or(header).trim();
        let decoded = general_purpose::STANDARD.decode(encoded).ok()?;
        let text = String::from_utf8(decoded).ok()?;
        let (name, pwd) = text.split_once(':')?;
        Some((name.to_string(), pwd.to_string()))
    }

    async fn stored_password(&self, name: &str) -> Result<Option<String>, ApiError> {
        let keys = FieldFilter::allow_all();
        let options = CompileOptions::default();
        let mut filter = Map::new();
        filter.insert(self.name_key.clone(), Value::String(name.to_string()));
        let query = SelectQuery {
            keys: Some(Value::Array(vec![Value::String(self.pwd_key.clone())])),
            filter: Some(Value::Object(filter)),
            ..Default::default()
        };
        let plan = StatementBuilder::new(&self.table, &keys, &options).select(&query)?;
        let crate::database::SelectPlan::Single(select) = plan else {
            return Err(ApiError::internal_server_error("unexpected paged credential lookup"));
        };
        let sql = render_select(self.storage.dialect(), &select, &BindParams::new())?;
        let row = self.storage.fetch_optional(&sql).await?;
        Ok(row.and_then(|r| r.get(&self.pwd_key).and_then(Value::as_str).map(String::from)))
    }
}

#[async_trait]
impl Stage for BasicAuth {
    fn name(&self) -> &str {
        "basic_auth"
    }

    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<Reply, ApiError> {
        let logged_in = ctx
            .session
            .as_ref()
            .and_then(|s| s.get(&self.session_key))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if logged_in {
            return next.run(ctx).await;
        }

        let Some((name, pwd)) = ctx.header("authorization").and_then(Self::credentials) else {
            return unauthorized();
        };
        let Some(stored) = self.stored_password(&name).await? else {
            tracing::debug!("Basic auth: unknown user {}", name);
            return unauthorized();
        };
        if !(self.verifier)(&pwd, &stored) {
            tracing::debug!("Basic auth: password mismatch for {}", name);
            return unauthorized();
        }
        if let Some(session) = ctx.session.as_mut() {
            session.insert(self.session_key.clone(), Value::Bool(true));
        }
        next.run(ctx).await
    }
}

/// Bearer token decoded into `ctx.payload`.
///
/// With a session key configured and a session present the token is read
/// from the session, otherwise from the `Authorization` header.
pub struct TokenAuth {
    decoder: TokenDecoder,
    session_key: Option<String>,
}

impl TokenAuth {
    pub fn new(decoder: TokenDecoder) -> Self {
        Self { decoder, session_key: Some("token".into()) }
    }

    /// HS256 JWTs signed with `secret`; the claims become the payload
    pub fn jwt(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        Self::new(Arc::new(move |token: &str| decode_jwt(&secret, token)))
    }

    pub fn session_key(mut self, session_key: Option<String>) -> Self {
        self.session_key = session_key;
        self
    }

    fn token(&self, ctx: &Context) -> Option<String> {
        if let (Some(session), Some(key)) = (ctx.session.as_ref(), self.session_key.as_ref()) {
            if let Some(token) = session.get(key).and_then(Value::as_str).filter(|t| !t.is_empty()) {
                return Some(token.to_string());
            }
        }
        let header = ctx.header("authorization")?;
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        if token.is_empty() { None } else { Some(token.to_string()) }
    }
}

#[async_trait]
impl Stage for TokenAuth {
    fn name(&self) -> &str {
        "token_auth"
    }

    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<Reply, ApiError> {
        let Some(token) = self.token(ctx) else {
            return unauthorized();
        };
        let Some(payload) = (self.decoder)(&token) else {
            tracing::debug!("Token auth: rejected token");
            return unauthorized();
        };
        ctx.payload = Some(payload);
        if let (Some(session), Some(key)) = (ctx.session.as_mut(), self.session_key.as_ref()) {
            session.insert(key.clone(), Value::String(token));
        }
        next.run(ctx).await
    }
}

pub fn decode_jwt(secret: &str, token: &str) -> Option<Value> {
    if secret.is_empty() {
        return None;
    }
    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Value>(token, &key, &Validation::default()).ok().map(|data| data.claims)
}

/// Sign `claims` with an `exp` `expiry_hours` from now
pub fn issue_jwt(secret: &str, claims: &Map<String, Value>, expiry_hours: u64) -> Result<String, ApiError> {
    if secret.is_empty() {
        return Err(ApiError::internal_server_error("JWT secret not configured"));
    }
    let now = Utc::now();
    let expires = i64::try_from(expiry_hours)
        .ok()
        .and_then(Duration::try_hours)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| ApiError::internal_server_error(format!("JWT expiry of {} hours is out of range", expiry_hours)))?;
    let mut claims = claims.clone();
    claims.insert("iat".into(), Value::from(now.timestamp()));
    claims.insert("exp".into(), Value::from(expires.timestamp()));
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| ApiError::internal_server_error(format!("JWT generation error: {}", e)))
}
