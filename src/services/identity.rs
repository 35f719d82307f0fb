use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::password::{hash_password, verify_password, MIN_PASSWORD_LENGTH};
use crate::auth::{ActorKind, AuthActor, AuthError, SessionService, TokenPair};
use crate::entities::{admin, deliveryman, user};
use crate::errors::ServiceError;

/// Account record of whichever actor kind is signed in.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Profile {
    Customer(user::Model),
    Admin(admin::Model),
    Deliveryman(deliveryman::Model),
}

impl Profile {
    pub fn id(&self) -> Uuid {
        match self {
            Profile::Customer(u) => u.id,
            Profile::Admin(a) => a.id,
            Profile::Deliveryman(d) => d.id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: Profile,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerChanges {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_password_length(password: &str) -> Result<(), ServiceError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ServiceError::ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Credentials and profiles for customers, admins and delivery agents.
#[derive(Clone)]
pub struct IdentityService {
    db: Arc<DatabaseConnection>,
    sessions: Arc<SessionService>,
    admin_registration_key: Option<String>,
}

impl IdentityService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        sessions: Arc<SessionService>,
        admin_registration_key: Option<String>,
    ) -> Self {
        Self {
            db,
            sessions,
            admin_registration_key,
        }
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register_customer(&self, input: NewCustomer) -> Result<user::Model, ServiceError> {
        check_password_length(&input.password)?;
        let email = normalize_email(&input.email);
        let taken = user::Entity::find()
            .filter(user::Column::Email.eq(email.as_str()))
            .count(&*self.db)
            .await?;
        if taken > 0 {
            return Err(ServiceError::Conflict(
                "An account with this email already exists".into(),
            ));
        }

        let now = Utc::now();
        let created = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            email: Set(email),
            password_hash: Set(hash_password(&input.password).await?),
            phone: Set(input.phone),
            address: Set(input.address),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(user_id = %created.id, "customer registered");
        Ok(created)
    }

    /// Registers an admin. When a registration key is configured the caller
    /// must present it.
    #[instrument(skip(self, input, presented_key), fields(email = %input.email))]
    pub async fn register_admin(
        &self,
        presented_key: Option<&str>,
        input: NewAdmin,
    ) -> Result<admin::Model, ServiceError> {
        if let Some(expected) = self.admin_registration_key.as_deref() {
            if presented_key != Some(expected) {
                warn!("admin registration with missing or wrong key");
                return Err(ServiceError::Forbidden(
                    "Admin registration key is missing or invalid".into(),
                ));
            }
        }
        check_password_length(&input.password)?;
        let email = normalize_email(&input.email);
        let taken = admin::Entity::find()
            .filter(admin::Column::Email.eq(email.as_str()))
            .count(&*self.db)
            .await?;
        if taken > 0 {
            return Err(ServiceError::Conflict(
                "An admin with this email already exists".into(),
            ));
        }

        let now = Utc::now();
        let created = admin::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            email: Set(email),
            password_hash: Set(hash_password(&input.password).await?),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(admin_id = %created.id, "admin registered");
        Ok(created)
    }

    async fn find_by_email(&self, kind: ActorKind, email: &str) -> Result<Option<(Profile, String)>, ServiceError> {
        let db = &*self.db;
        Ok(match kind {
            ActorKind::Customer => user::Entity::find()
                .filter(user::Column::Email.eq(email))
                .one(db)
                .await?
                .map(|u| {
                    let hash = u.password_hash.clone();
                    (Profile::Customer(u), hash)
                }),
            ActorKind::Admin => admin::Entity::find()
                .filter(admin::Column::Email.eq(email))
                .one(db)
                .await?
                .map(|a| {
                    let hash = a.password_hash.clone();
                    (Profile::Admin(a), hash)
                }),
            ActorKind::Deliveryman => deliveryman::Entity::find()
                .filter(deliveryman::Column::Email.eq(email))
                .one(db)
                .await?
                .map(|d| {
                    let hash = d.password_hash.clone();
                    (Profile::Deliveryman(d), hash)
                }),
        })
    }

    /// Checks credentials and opens a session for the given actor kind.
    #[instrument(skip(self, password), fields(kind = %kind))]
    pub async fn login(
        &self,
        kind: ActorKind,
        email: &str,
        password: &str,
    ) -> Result<Session, ServiceError> {
        let email = normalize_email(email);
        let Some((profile, hash)) = self.find_by_email(kind, &email).await? else {
            return Err(AuthError::InvalidCredentials.into());
        };
        if !verify_password(password, &hash).await? {
            warn!(kind = %kind, "failed login attempt");
            return Err(AuthError::InvalidCredentials.into());
        }
        if let Profile::Deliveryman(agent) = &profile {
            if !agent.is_active {
                return Err(AuthError::AccountDisabled.into());
            }
        }

        let tokens = self.sessions.issue(kind, profile.id()).await?;
        info!(subject = %profile.id(), "login succeeded");
        Ok(Session {
            user: profile,
            tokens,
        })
    }

    pub async fn refresh(&self, kind: ActorKind, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let (_, tokens) = self.sessions.refresh(kind, refresh_token).await?;
        Ok(tokens)
    }

    pub async fn logout(&self, actor: &AuthActor) -> Result<(), ServiceError> {
        self.sessions.revoke(actor).await?;
        info!(kind = %actor.kind, subject = %actor.id, "logged out");
        Ok(())
    }

    pub async fn profile(&self, actor: &AuthActor) -> Result<Profile, ServiceError> {
        let db = &*self.db;
        let profile = match actor.kind {
            ActorKind::Customer => user::Entity::find_by_id(actor.id)
                .one(db)
                .await?
                .map(Profile::Customer),
            ActorKind::Admin => admin::Entity::find_by_id(actor.id)
                .one(db)
                .await?
                .map(Profile::Admin),
            ActorKind::Deliveryman => deliveryman::Entity::find_by_id(actor.id)
                .one(db)
                .await?
                .map(Profile::Deliveryman),
        };
        profile.ok_or_else(|| ServiceError::not_found("Account", actor.id))
    }

    pub async fn update_customer(
        &self,
        user_id: Uuid,
        changes: CustomerChanges,
    ) -> Result<user::Model, ServiceError> {
        let existing = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", user_id))?;

        let mut active: user::ActiveModel = existing.into();
        if let Some(name) = changes.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(phone) = changes.phone {
            active.phone = Set(Some(phone));
        }
        if let Some(address) = changes.address {
            active.address = Set(Some(address));
        }
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    #[instrument(skip(self, old_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ServiceError> {
        check_password_length(new_password)?;
        let existing = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", user_id))?;

        if !verify_password(old_password, &existing.password_hash).await? {
            return Err(ServiceError::Unauthorized(
                "Current password is incorrect".into(),
            ));
        }

        let mut active: user::ActiveModel = existing.into();
        active.password_hash = Set(hash_password(new_password).await?);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        info!(%user_id, "password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Rahim@Example.COM "), "rahim@example.com");
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(check_password_length("12345").is_err());
        assert!(check_password_length("123456").is_ok());
    }
}
