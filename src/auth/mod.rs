//! Session handling shared by the three actor domains.
//!
//! Customers, admins and delivery agents each get their own token pair, cookie
//! names and `role` claim, but issue/verify/refresh/revoke run through the same
//! [`SessionService`]. Refresh tokens are tracked in `refresh_tokens` by an
//! HMAC fingerprint of their `jti`, so a leaked table does not leak usable ids.

pub mod cookies;
pub mod password;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
    Router,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use strum::{Display, EnumString};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{admin, deliveryman, refresh_token, user};
use crate::errors::ServiceError;

/// The three independently scoped session domains.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActorKind {
    Customer,
    Admin,
    Deliveryman,
}

impl ActorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorKind::Customer => "customer",
            ActorKind::Admin => "admin",
            ActorKind::Deliveryman => "deliveryman",
        }
    }

    pub fn access_cookie(self) -> &'static str {
        match self {
            ActorKind::Customer => "accessToken",
            ActorKind::Admin => "adminAccessToken",
            ActorKind::Deliveryman => "deliverymanAccessToken",
        }
    }

    pub fn refresh_cookie(self) -> &'static str {
        match self {
            ActorKind::Customer => "refreshToken",
            ActorKind::Admin => "adminRefreshToken",
            ActorKind::Deliveryman => "deliverymanRefreshToken",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: ActorKind,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub aud: String,
    pub token_type: TokenType,
}

/// Verified caller, inserted into request extensions by [`actor_guard`].
#[derive(Debug, Clone)]
pub struct AuthActor {
    pub id: Uuid,
    pub kind: ActorKind,
    pub token_id: String,
    pub expires_at: i64,
}

impl AuthActor {
    pub fn is_admin(&self) -> bool {
        self.kind == ActorKind::Admin
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthActor
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthActor>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    #[serde(skip)]
    pub refresh_expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: ChronoDuration,
    pub refresh_ttl: ChronoDuration,
    pub issuer: String,
    pub audience: String,
}

impl From<&AppConfig> for SessionConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            access_secret: cfg.access_token_secret.clone(),
            refresh_secret: cfg.refresh_token_secret.clone(),
            access_ttl: ChronoDuration::seconds(cfg.access_token_expiration as i64),
            refresh_ttl: ChronoDuration::seconds(cfg.refresh_token_expiration as i64),
            issuer: cfg.auth_issuer.clone(),
            audience: cfg.auth_audience.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("No authentication token provided")]
    MissingToken,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    RevokedToken,

    #[error("Account no longer exists")]
    UnknownSubject,

    #[error("Account is deactivated")]
    AccountDisabled,

    #[error("You do not have access to this resource")]
    InsufficientPermissions,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        AuthError::Service(ServiceError::DatabaseError(err))
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Service(inner) => inner,
            AuthError::InsufficientPermissions | AuthError::AccountDisabled => {
                ServiceError::Forbidden(err.to_string())
            }
            AuthError::TokenCreation(msg) => ServiceError::JwtError(msg),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

#[derive(Debug, Clone)]
struct BlacklistedToken {
    jti: String,
    expiry: DateTime<Utc>,
}

/// Issues, verifies, rotates and revokes sessions for every [`ActorKind`].
pub struct SessionService {
    config: SessionConfig,
    db: Arc<DatabaseConnection>,
    blacklisted_tokens: RwLock<Vec<BlacklistedToken>>,
}

impl SessionService {
    pub fn new(config: SessionConfig, db: Arc<DatabaseConnection>) -> Self {
        Self {
            config,
            db,
            blacklisted_tokens: RwLock::new(Vec::new()),
        }
    }

    fn fingerprint(&self, jti: &str) -> Result<String, AuthError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.refresh_secret.as_bytes())
            .map_err(|e| AuthError::TokenCreation(e.to_string()))?;
        mac.update(jti.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn sign(
        &self,
        kind: ActorKind,
        subject: Uuid,
        token_type: TokenType,
        now: DateTime<Utc>,
    ) -> Result<(String, Claims), AuthError> {
        let (secret, ttl) = match token_type {
            TokenType::Access => (&self.config.access_secret, self.config.access_ttl),
            TokenType::Refresh => (&self.config.refresh_secret, self.config.refresh_ttl),
        };
        let claims = Claims {
            sub: subject.to_string(),
            role: kind,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            nbf: now.timestamp(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            token_type,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))?;
        Ok((token, claims))
    }

    fn decode_claims(&self, token: &str, token_type: TokenType) -> Result<Claims, AuthError> {
        let secret = match token_type {
            TokenType::Access => &self.config.access_secret,
            TokenType::Refresh => &self.config.refresh_secret,
        };
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_audience(&[self.config.audience.as_str()]);

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;

        if claims.token_type != token_type {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    /// Issues a new access/refresh pair and records the refresh token.
    #[instrument(skip_all, fields(kind = %kind, %subject))]
    pub async fn issue(&self, kind: ActorKind, subject: Uuid) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let (access_token, _) = self.sign(kind, subject, TokenType::Access, now)?;
        let (refresh_token, refresh_claims) = self.sign(kind, subject, TokenType::Refresh, now)?;

        refresh_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            actor_kind: Set(kind.as_str().to_string()),
            subject_id: Set(subject),
            token_id: Set(self.fingerprint(&refresh_claims.jti)?),
            created_at: Set(now),
            expires_at: Set(now + self.config.refresh_ttl),
            revoked: Set(false),
        }
        .insert(&*self.db)
        .await?;

        debug!(%subject, "session issued");

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_ttl.num_seconds(),
            refresh_expires_in: self.config.refresh_ttl.num_seconds(),
        })
    }

    /// Verifies an access token and returns the caller it names.
    pub async fn verify(&self, token: &str) -> Result<AuthActor, AuthError> {
        let claims = self.decode_claims(token, TokenType::Access)?;

        if self.is_token_blacklisted(&claims.jti).await {
            return Err(AuthError::RevokedToken);
        }

        let id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthActor {
            id,
            kind: claims.role,
            token_id: claims.jti,
            expires_at: claims.exp,
        })
    }

    /// Rotates a refresh token. The presented token is revoked with a
    /// conditional update, so it can be exchanged at most once.
    #[instrument(skip_all, fields(kind = %kind))]
    pub async fn refresh(
        &self,
        kind: ActorKind,
        token: &str,
    ) -> Result<(Uuid, TokenPair), AuthError> {
        let claims = self.decode_claims(token, TokenType::Refresh)?;
        if claims.role != kind {
            return Err(AuthError::InvalidToken);
        }
        let subject = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;

        let result = refresh_token::Entity::update_many()
            .col_expr(refresh_token::Column::Revoked, Expr::value(true))
            .filter(refresh_token::Column::TokenId.eq(self.fingerprint(&claims.jti)?))
            .filter(refresh_token::Column::ActorKind.eq(kind.as_str()))
            .filter(refresh_token::Column::SubjectId.eq(subject))
            .filter(refresh_token::Column::Revoked.eq(false))
            .filter(refresh_token::Column::ExpiresAt.gt(Utc::now()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected != 1 {
            warn!(%subject, "refresh token reuse or unknown token");
            return Err(AuthError::RevokedToken);
        }

        self.ensure_subject(kind, subject).await?;
        let pair = self.issue(kind, subject).await?;
        Ok((subject, pair))
    }

    /// Ends the caller's sessions: every refresh token of the subject is revoked
    /// and the presented access token is refused until it expires.
    #[instrument(skip_all, fields(kind = %actor.kind, subject = %actor.id))]
    pub async fn revoke(&self, actor: &AuthActor) -> Result<(), AuthError> {
        refresh_token::Entity::update_many()
            .col_expr(refresh_token::Column::Revoked, Expr::value(true))
            .filter(refresh_token::Column::ActorKind.eq(actor.kind.as_str()))
            .filter(refresh_token::Column::SubjectId.eq(actor.id))
            .filter(refresh_token::Column::Revoked.eq(false))
            .exec(&*self.db)
            .await?;

        let expiry = Utc
            .timestamp_opt(actor.expires_at, 0)
            .single()
            .unwrap_or_else(|| Utc::now() + self.config.access_ttl);

        let mut blacklist = self.blacklisted_tokens.write().await;
        blacklist.push(BlacklistedToken {
            jti: actor.token_id.clone(),
            expiry,
        });
        let now = Utc::now();
        blacklist.retain(|t| t.expiry > now);

        Ok(())
    }

    async fn is_token_blacklisted(&self, token_id: &str) -> bool {
        let blacklist = self.blacklisted_tokens.read().await;
        blacklist.iter().any(|t| t.jti == token_id)
    }

    /// Fails unless the subject still exists (and, for agents, is active).
    pub async fn ensure_subject(&self, kind: ActorKind, id: Uuid) -> Result<(), AuthError> {
        let db = &*self.db;
        match kind {
            ActorKind::Customer => user::Entity::find_by_id(id)
                .one(db)
                .await?
                .map(|_| ())
                .ok_or(AuthError::UnknownSubject),
            ActorKind::Admin => admin::Entity::find_by_id(id)
                .one(db)
                .await?
                .map(|_| ())
                .ok_or(AuthError::UnknownSubject),
            ActorKind::Deliveryman => {
                let agent = deliveryman::Entity::find_by_id(id)
                    .one(db)
                    .await?
                    .ok_or(AuthError::UnknownSubject)?;
                if agent.is_active {
                    Ok(())
                } else {
                    Err(AuthError::AccountDisabled)
                }
            }
        }
    }
}

/// Bearer header first, then the access cookie of each accepted actor kind.
pub fn extract_access_token(headers: &HeaderMap, kinds: &[ActorKind]) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    kinds
        .iter()
        .find_map(|kind| cookies::read_cookie(headers, kind.access_cookie()))
}

/// Route guard: verifies the token, re-checks the `role` claim against the
/// accepted kinds and confirms the subject still exists.
pub async fn actor_guard(
    State(allowed): State<Arc<[ActorKind]>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let sessions = request
        .extensions()
        .get::<Arc<SessionService>>()
        .cloned()
        .ok_or_else(|| {
            AuthError::Service(ServiceError::InternalError(
                "session service not configured".into(),
            ))
        })?;

    let token = extract_access_token(request.headers(), &allowed).ok_or(AuthError::MissingToken)?;
    let actor = sessions.verify(&token).await?;

    if !allowed.contains(&actor.kind) {
        return Err(AuthError::InsufficientPermissions);
    }

    sessions.ensure_subject(actor.kind, actor.id).await?;

    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}

pub trait AuthRouterExt {
    /// Restricts every route registered so far to the given actor kinds.
    fn with_actor(self, kinds: &[ActorKind]) -> Self;
}

impl<S> AuthRouterExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_actor(self, kinds: &[ActorKind]) -> Self {
        let allowed: Arc<[ActorKind]> = Arc::from(kinds);
        self.route_layer(axum::middleware::from_fn_with_state(allowed, actor_guard))
    }
}
