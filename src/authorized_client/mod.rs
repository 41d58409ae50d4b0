//! Per-session storage of the OAuth2 authorized client.
//!
//! One record per (session, registration) pair lives in the external
//! key-value store and expires with the session. Loading a record whose
//! access token is about to expire refreshes it first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::oidc::id_token::IdTokenClaims;
use crate::oidc::{IdentityProvider, TokenSet};
use crate::session_storage::{KeyValueStore, StoreError};
use crate::utilities::Utilities;

/// Access tokens expiring within this window are refreshed before use.
pub const CLOCK_SKEW: Duration = Duration::from_secs(60);

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    /// `None` when the provider did not say; such a token never expires here.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: String, issued_at: DateTime<Utc>, expires_in: Option<Duration>) -> Self {
        let expires_at = expires_in
            .and_then(|lifetime| chrono::Duration::from_std(lifetime).ok())
            .map(|lifetime| issued_at + lifetime);
        Self {
            value,
            issued_at,
            expires_at,
        }
    }

    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        self.expires_at
            .map(|expires_at| expires_at - window <= now)
            .unwrap_or(false)
    }
}

impl Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// The authenticated user as exposed to the downstream stage.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub subject: String,
    pub username: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl From<&IdTokenClaims> for UserInfo {
    fn from(claims: &IdTokenClaims) -> Self {
        Self {
            subject: claims.sub.clone(),
            username: claims.preferred_username.clone(),
            given_name: claims.given_name.clone(),
            family_name: claims.family_name.clone(),
            email: claims.email.clone(),
            roles: claims.roles.clone(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizedClient {
    pub registration_id: String,
    pub principal_name: String,
    pub access_token: AccessToken,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub scopes: Vec<String>,
    pub user: UserInfo,
}

impl AuthorizedClient {
    pub fn from_tokens(
        registration_id: &str,
        tokens: TokenSet,
        user: UserInfo,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            registration_id: registration_id.to_string(),
            principal_name: user.subject.clone(),
            access_token: AccessToken::new(tokens.access_token, now, tokens.expires_in),
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token,
            scopes: tokens.scopes,
            user,
        }
    }

    /// Applies a refresh response, keeping whatever the provider did not rotate.
    pub fn refreshed(&self, tokens: TokenSet, now: DateTime<Utc>) -> Self {
        Self {
            access_token: AccessToken::new(tokens.access_token, now, tokens.expires_in),
            refresh_token: tokens.refresh_token.or_else(|| self.refresh_token.clone()),
            id_token: tokens.id_token.or_else(|| self.id_token.clone()),
            scopes: if tokens.scopes.is_empty() {
                self.scopes.clone()
            } else {
                tokens.scopes
            },
            ..self.clone()
        }
    }
}

impl Debug for AuthorizedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("registration_id", &self.registration_id)
            .field("principal_name", &self.principal_name)
            .field("access_token", &self.access_token)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait AuthorizedClientRepository: Send + Sync + Debug {
    /// Returns the record for this session, refreshing an expiring access
    /// token first. A record that cannot be refreshed is gone afterwards.
    async fn load(
        &self,
        session_id: &str,
        registration_id: &str,
    ) -> Result<Option<AuthorizedClient>, StoreError>;

    /// Upserts the record for (session, `client.registration_id`).
    async fn save(&self, session_id: &str, client: &AuthorizedClient) -> Result<(), StoreError>;

    async fn remove(
        &self,
        session_id: &str,
        registration_id: &str,
    ) -> Result<Option<AuthorizedClient>, StoreError>;
}

pub struct SessionAuthorizedClientRepository {
    store: Arc<dyn KeyValueStore>,
    provider: Arc<dyn IdentityProvider>,
    ttl: Duration,
}

impl SessionAuthorizedClientRepository {
    /// `ttl` should equal the session inactivity timeout.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        provider: Arc<dyn IdentityProvider>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            ttl,
        }
    }

    fn parse(&self, raw: &str) -> Option<AuthorizedClient> {
        serde_json::from_str(raw)
            .map_err(|err| warn!("discarding unreadable authorized client record: {}", err))
            .ok()
    }

    async fn refresh(
        &self,
        key: &str,
        raw: &str,
        client: AuthorizedClient,
    ) -> Result<Option<AuthorizedClient>, StoreError> {
        let Some(refresh_token) = client.refresh_token.as_deref() else {
            info!(principal = %client.principal_name, "access token expired without refresh token");
            self.store.compare_and_delete(key, raw).await?;
            return Ok(None);
        };

        let tokens = match self.provider.refresh(refresh_token).await {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(principal = %client.principal_name, "token refresh failed: {}", err);
                self.store.compare_and_delete(key, raw).await?;
                return Ok(None);
            }
        };

        let refreshed = client.refreshed(tokens, Utc::now());
        let value = serde_json::to_string(&refreshed)
            .map_err(|source| StoreError::Serialization { source })?;

        if self
            .store
            .compare_and_set(key, raw, &value, self.ttl)
            .await?
        {
            info!(principal = %refreshed.principal_name, "access token refreshed");
            return Ok(Some(refreshed));
        }

        // Another request refreshed (or removed) the record first.
        let current = self.store.get(key).await?;
        Ok(current
            .as_deref()
            .and_then(|current| self.parse(current))
            .filter(|current| !current.access_token.expires_within(CLOCK_SKEW, Utc::now())))
    }
}

impl Debug for SessionAuthorizedClientRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAuthorizedClientRepository")
            .field("store", &self.store)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthorizedClientRepository for SessionAuthorizedClientRepository {
    async fn load(
        &self,
        session_id: &str,
        registration_id: &str,
    ) -> Result<Option<AuthorizedClient>, StoreError> {
        let key = Utilities::authorized_client_key(registration_id, session_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let Some(client) = self.parse(&raw) else {
            self.store.delete(&key).await?;
            return Ok(None);
        };

        if client.access_token.expires_within(CLOCK_SKEW, Utc::now()) {
            return self.refresh(&key, &raw, client).await;
        }

        self.store.expire(&key, self.ttl).await?;
        Ok(Some(client))
    }

    async fn save(&self, session_id: &str, client: &AuthorizedClient) -> Result<(), StoreError> {
        let key = Utilities::authorized_client_key(&client.registration_id, session_id);
        let value =
            serde_json::to_string(client).map_err(|source| StoreError::Serialization { source })?;
        self.store.set(&key, &value, self.ttl).await.map_err(|err| {
            error!("could not save authorized client: {}", err);
            err
        })
    }

    async fn remove(
        &self,
        session_id: &str,
        registration_id: &str,
    ) -> Result<Option<AuthorizedClient>, StoreError> {
        let key = Utilities::authorized_client_key(registration_id, session_id);
        let removed = self.store.get(&key).await?;
        self.store.delete(&key).await?;
        Ok(removed.as_deref().and_then(|raw| self.parse(raw)))
    }
}
