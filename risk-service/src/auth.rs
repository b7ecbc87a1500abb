//! Wallet-signature sessions. A user proves ownership of a wallet by signing a message that
//! names it; the service answers with an opaque session token that expires after a fixed TTL.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use marginfi_risk_types::types::Pubkey;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{scheduler::ScheduledTask, ApiError, ServiceResult};

/// Login and signup request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub wallet_address: String,
    /// Base64 detached ed25519 signature over `signed_message`.
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub signed_message: Option<String>,
    #[serde(default)]
    pub wallet_id: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: Uuid,
    pub wallet_address: String,
    pub wallet_id: Option<String>,
    pub referral_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub token: String,
    pub user_id: Uuid,
    pub wallet_address: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user: AuthUser,
    pub session: SessionToken,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn init(&self) -> ServiceResult<()> {
        Ok(())
    }

    async fn teardown(&self) -> ServiceResult<()> {
        Ok(())
    }

    async fn get_user(&self, wallet_address: &str) -> ServiceResult<Option<AuthUser>>;

    async fn create_user(&self, user: AuthUser) -> ServiceResult<AuthUser>;

    async fn record_login(&self, wallet_address: &str, at: DateTime<Utc>) -> ServiceResult<()>;
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, AuthUser>>,
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_user(&self, wallet_address: &str) -> ServiceResult<Option<AuthUser>> {
        Ok(self.users.read().await.get(wallet_address).cloned())
    }

    async fn create_user(&self, user: AuthUser) -> ServiceResult<AuthUser> {
        self.users
            .write()
            .await
            .insert(user.wallet_address.clone(), user.clone());
        Ok(user)
    }

    async fn record_login(&self, wallet_address: &str, at: DateTime<Utc>) -> ServiceResult<()> {
        if let Some(user) = self.users.write().await.get_mut(wallet_address) {
            user.last_login = at;
        }
        Ok(())
    }

    async fn teardown(&self) -> ServiceResult<()> {
        self.users.write().await.clear();
        Ok(())
    }
}

/// Checks that `signature` is `wallet_address`'s signature over `signed_message`, and that the
/// message names the wallet.
pub fn verify_wallet_signature(
    wallet_address: &str,
    signed_message: &str,
    signature: &str,
) -> Result<(), ApiError> {
    let wallet: Pubkey = wallet_address
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid wallet address: {e}")))?;

    if !signed_message.contains(wallet_address) {
        return Err(ApiError::Unauthorized(
            "Signed message does not match wallet".to_string(),
        ));
    }

    let signature = STANDARD
        .decode(signature)
        .ok()
        .and_then(|bytes| Signature::from_slice(&bytes).ok())
        .ok_or_else(|| ApiError::Unauthorized("Malformed signature".to_string()))?;
    let key = VerifyingKey::from_bytes(&wallet.to_bytes())
        .map_err(|_| ApiError::Unauthorized("Wallet is not a signing key".to_string()))?;

    key.verify_strict(signed_message.as_bytes(), &signature)
        .map_err(|_| ApiError::Unauthorized("Invalid signature".to_string()))
}

pub struct AuthService<S> {
    store: S,
    ttl: Duration,
    sessions: RwLock<HashMap<String, SessionToken>>,
}

impl<S: UserStore> AuthService<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn check_payload(payload: &AuthPayload) -> Result<(), ApiError> {
        if payload.wallet_address.trim().is_empty() {
            return Err(ApiError::BadRequest("Wallet address is required".to_string()));
        }

        match (&payload.signed_message, &payload.signature) {
            (Some(message), Some(signature)) => {
                verify_wallet_signature(&payload.wallet_address, message, signature)
            }
            _ => Err(ApiError::Unauthorized("Signature is required".to_string())),
        }
    }

    async fn issue(&self, user: &AuthUser, now: DateTime<Utc>) -> SessionToken {
        let session = SessionToken {
            token: Uuid::new_v4().simple().to_string(),
            user_id: user.id,
            wallet_address: user.wallet_address.clone(),
            expires_at: now + self.ttl,
        };

        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());

        session
    }

    pub async fn login(&self, payload: &AuthPayload) -> Result<AuthSession, ApiError> {
        Self::check_payload(payload)?;

        let mut user = self
            .store
            .get_user(&payload.wallet_address)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

        let now = Utc::now();
        self.store.record_login(&user.wallet_address, now).await?;
        user.last_login = now;

        info!("User {} logged in", user.wallet_address);
        let session = self.issue(&user, now).await;
        Ok(AuthSession { user, session })
    }

    /// Creates the user on first sight; an existing user is simply logged in.
    pub async fn signup(&self, payload: &AuthPayload) -> Result<AuthSession, ApiError> {
        Self::check_payload(payload)?;

        if self.store.get_user(&payload.wallet_address).await?.is_some() {
            return self.login(payload).await;
        }

        let now = Utc::now();
        let user = self
            .store
            .create_user(AuthUser {
                id: Uuid::new_v4(),
                wallet_address: payload.wallet_address.clone(),
                wallet_id: payload.wallet_id.clone(),
                referral_code: payload.referral_code.clone(),
                created_at: now,
                last_login: now,
            })
            .await?;

        info!("Signed up user {}", user.wallet_address);
        let session = self.issue(&user, now).await;
        Ok(AuthSession { user, session })
    }

    pub async fn verify_token(&self, token: &str) -> Result<SessionToken, ApiError> {
        self.verify_token_at(token, Utc::now()).await
    }

    pub async fn verify_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionToken, ApiError> {
        let session = self
            .sessions
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Invalid token".to_string()))?;

        if session.expires_at <= now {
            debug!("Session for {} expired", session.wallet_address);
            self.sessions.write().await.remove(token);
            return Err(ApiError::Unauthorized("Token expired".to_string()));
        }

        Ok(session)
    }

    /// Returns whether the token was live.
    pub async fn revoke_token(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    pub async fn live_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops every session expired at `now` and returns how many went.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);

        let swept = before - sessions.len();
        if swept > 0 {
            debug!("Swept {} expired sessions", swept);
        }
        swept
    }
}

impl<S: UserStore + 'static> AuthService<S> {
    /// Sweeps expired sessions every `period`. Tokens that are never verified again would
    /// otherwise stay in memory.
    pub fn spawn_session_sweep(self: &Arc<Self>, period: std::time::Duration) -> ScheduledTask {
        let auth = self.clone();
        ScheduledTask::spawn("auth-session-sweep", period, move || {
            let auth = auth.clone();
            async move {
                auth.sweep_expired_at(Utc::now()).await;
                Ok(())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ed25519_dalek::{Signer, SigningKey};
    use pretty_assertions::assert_eq;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7; 32])
    }

    fn wallet(key: &SigningKey) -> String {
        Pubkey::new(key.verifying_key().to_bytes()).to_string()
    }

    fn signed_payload(key: &SigningKey) -> AuthPayload {
        let wallet_address = wallet(key);
        let message = format!("Sign in to marginfi\n\nWallet: {wallet_address}");
        AuthPayload {
            signature: Some(STANDARD.encode(key.sign(message.as_bytes()).to_bytes())),
            signed_message: Some(message),
            wallet_address,
            wallet_id: None,
            referral_code: Some("MRGN".to_string()),
        }
    }

    fn service() -> AuthService<InMemoryUserStore> {
        AuthService::new(InMemoryUserStore::default(), Duration::hours(1))
    }

    #[tokio::test]
    async fn signup_then_login() {
        let auth = service();
        let payload = signed_payload(&signing_key());

        let signed_up = auth.signup(&payload).await.unwrap();
        assert_eq!(signed_up.user.referral_code.as_deref(), Some("MRGN"));

        let logged_in = auth.login(&payload).await.unwrap();
        assert_eq!(logged_in.user.id, signed_up.user.id);
        assert_ne!(logged_in.session.token, signed_up.session.token);

        let session = auth.verify_token(&logged_in.session.token).await.unwrap();
        assert_eq!(session.wallet_address, payload.wallet_address);
    }

    #[tokio::test]
    async fn login_rejects_bad_requests() {
        let auth = service();
        let payload = signed_payload(&signing_key());

        let missing_wallet = AuthPayload {
            wallet_address: String::new(),
            ..payload.clone()
        };
        assert_eq!(auth.login(&missing_wallet).await.unwrap_err().status_code(), 400);

        let forged = AuthPayload {
            signature: signed_payload(&SigningKey::from_bytes(&[8; 32])).signature,
            ..payload.clone()
        };
        assert_eq!(auth.login(&forged).await.unwrap_err().status_code(), 401);

        let unsigned = AuthPayload {
            signature: None,
            ..payload.clone()
        };
        assert_eq!(auth.login(&unsigned).await.unwrap_err().status_code(), 401);

        assert_matches!(auth.login(&payload).await, Err(ApiError::NotFound(_)));
    }

    #[test]
    fn message_must_name_the_wallet() {
        let key = signing_key();
        let message = "Sign in to marginfi";
        let signature = STANDARD.encode(key.sign(message.as_bytes()).to_bytes());

        assert_matches!(
            verify_wallet_signature(&wallet(&key), message, &signature),
            Err(ApiError::Unauthorized(_))
        );
        assert_matches!(
            verify_wallet_signature("not-base58-0OIl", message, &signature),
            Err(ApiError::BadRequest(_))
        );
    }

    #[tokio::test]
    async fn tokens_expire_and_revoke() {
        let auth = service();
        let session = auth
            .signup(&signed_payload(&signing_key()))
            .await
            .unwrap()
            .session;

        assert!(auth
            .verify_token_at(&session.token, session.expires_at - Duration::seconds(1))
            .await
            .is_ok());
        assert_matches!(
            auth.verify_token_at(&session.token, session.expires_at).await,
            Err(ApiError::Unauthorized(_))
        );
        // expired tokens are dropped
        assert!(!auth.revoke_token(&session.token).await);

        let fresh = auth
            .login(&signed_payload(&signing_key()))
            .await
            .unwrap()
            .session;
        assert!(auth.revoke_token(&fresh.token).await);
        assert_eq!(
            auth.verify_token(&fresh.token).await.unwrap_err().status_code(),
            401
        );
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_sessions() {
        let auth = service();
        let session = auth
            .signup(&signed_payload(&signing_key()))
            .await
            .unwrap()
            .session;

        assert_eq!(
            auth.sweep_expired_at(session.expires_at - Duration::seconds(1))
                .await,
            0
        );
        assert_eq!(auth.sweep_expired_at(session.expires_at).await, 1);
        assert_eq!(auth.live_sessions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_task_clears_abandoned_sessions() {
        // every session is expired the moment it is issued
        let auth = Arc::new(AuthService::new(
            InMemoryUserStore::default(),
            Duration::zero(),
        ));
        let payload = signed_payload(&signing_key());
        auth.signup(&payload).await.unwrap();
        auth.login(&payload).await.unwrap();
        assert_eq!(auth.live_sessions().await, 2);

        let task = auth.spawn_session_sweep(std::time::Duration::from_secs(300));
        // the first sweep runs right away
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(auth.live_sessions().await, 0);

        task.shutdown().await;
    }

    #[tokio::test]
    async fn teardown_clears_users() {
        let auth = service();
        auth.store().init().await.unwrap();
        auth.signup(&signed_payload(&signing_key())).await.unwrap();

        auth.store().teardown().await.unwrap();
        assert_matches!(
            auth.login(&signed_payload(&signing_key())).await,
            Err(ApiError::NotFound(_))
        );
    }
}
