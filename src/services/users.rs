use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{
    purchases::PurchaseRequest, ProgramOptions, RequestHandler, Service, ServiceError,
};
use crate::mlm::{self, payouts};
use crate::models::{
    referrals::{ReferralEntry, ReferralLink, UserStats},
    users::{NewUserRecord, User},
};
use crate::repositories::{Store, StoreError};

const REFERRAL_CODE_ATTEMPTS: usize = 5;

pub enum UserRequest {
    Register {
        name: String,
        email: String,
        referral_code: Option<String>,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    GetUser {
        id: String,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    SearchUsers {
        query: Option<String>,
        response: oneshot::Sender<Result<Vec<User>, ServiceError>>,
    },
    GetStats {
        id: String,
        response: oneshot::Sender<Result<UserStats, ServiceError>>,
    },
    /// The whole forest, or only the branch below `root`, flattened in
    /// pre-order.
    GetReferralTree {
        root: Option<String>,
        response: oneshot::Sender<Result<Vec<ReferralEntry>, ServiceError>>,
    },
    GetReferralLink {
        id: String,
        response: oneshot::Sender<Result<ReferralLink, ServiceError>>,
    },
    EnsureAdmin {
        email: String,
        name: String,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    RequireAdmin {
        id: String,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct UserRequestHandler {
    store: Arc<dyn Store>,
    options: ProgramOptions,
    purchase_channel: mpsc::Sender<PurchaseRequest>,
}

impl UserRequestHandler {
    pub fn new(
        store: Arc<dyn Store>,
        options: ProgramOptions,
        purchase_channel: mpsc::Sender<PurchaseRequest>,
    ) -> Self {
        UserRequestHandler {
            store,
            options,
            purchase_channel,
        }
    }

    fn store_error(e: StoreError) -> ServiceError {
        ServiceError::from_store("UserService", e)
    }

    async fn insert_with_fresh_code(
        &self,
        mut record: NewUserRecord,
    ) -> Result<User, ServiceError> {
        for attempt in 1..=REFERRAL_CODE_ATTEMPTS {
            record.referral_code = payouts::generate_referral_code();

            match self.store.insert_user(record.clone()).await {
                Err(StoreError::Conflict("referral_code")) => {
                    log::warn!(
                        "Referral code collision on attempt {}, retrying.",
                        attempt
                    );
                }
                result => return result.map_err(Self::store_error),
            }
        }

        Err(ServiceError::Internal(
            "Could not allocate a unique referral code".to_string(),
        ))
    }

    async fn register(
        &self,
        name: String,
        email: String,
        referral_code: Option<String>,
    ) -> Result<User, ServiceError> {
        let name = name.trim().to_string();
        let email = email.trim().to_string();

        if name.is_empty() || email.is_empty() {
            return Err(ServiceError::Validation(
                "Name and email are required".to_string(),
            ));
        }
        if !email.contains('@') {
            return Err(ServiceError::Validation(format!(
                "Invalid email address: {}",
                email
            )));
        }

        if self
            .store
            .get_user_by_email(&email)
            .await
            .map_err(Self::store_error)?
            .is_some()
        {
            return Err(ServiceError::Conflict(
                "This email is already registered".to_string(),
            ));
        }

        let referrer = match referral_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                let referrer = self
                    .store
                    .get_user_by_referral_code(code)
                    .await
                    .map_err(Self::store_error)?;
                if referrer.is_none() {
                    log::warn!(
                        "Unknown referral code {} used by {}, registering without referrer.",
                        code,
                        email
                    );
                }
                referrer
            }
            _ => None,
        };

        let record = NewUserRecord {
            name,
            email,
            referral_code: String::new(),
            level: referrer.as_ref().map_or(1, |r| r.level + 1),
            referred_by: referrer.map(|r| r.id),
            is_admin: false,
        };
        let user = self.insert_with_fresh_code(record).await?;
        log::info!(
            "Registered user {} (level {}, referred by {:?}).",
            user.id,
            user.level,
            user.referred_by
        );

        if self.options.purchase_on_registration {
            self.purchase_on_registration(&user).await;
        }

        Ok(user)
    }

    /// The account exists either way; a failed purchase is only logged.
    async fn purchase_on_registration(&self, user: &User) {
        let (purchase_tx, purchase_rx) = oneshot::channel();

        let sent = self
            .purchase_channel
            .send(PurchaseRequest::Purchase {
                user_id: user.id.clone(),
                amount_in_cents: None,
                response: purchase_tx,
            })
            .await;
        if let Err(e) = sent {
            log::error!("Could not reach purchase service for {}: {}", user.id, e);
            return;
        }

        match purchase_rx.await {
            Ok(Ok(receipt)) => log::info!(
                "Registration purchase {} for {} paid {} commissions.",
                receipt.purchase.id,
                user.id,
                receipt.commissions.len()
            ),
            Ok(Err(e)) => log::error!("Registration purchase for {} failed: {}", user.id, e),
            Err(e) => log::error!("Purchase service dropped request for {}: {}", user.id, e),
        }
    }

    async fn get_user(&self, id: &str) -> Result<User, ServiceError> {
        self.store
            .get_user(id)
            .await
            .map_err(Self::store_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("User {}", id)))
    }

    async fn search_users(&self, query: Option<String>) -> Result<Vec<User>, ServiceError> {
        let result = match query.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => self.store.search_users(q).await,
            _ => self.store.list_users().await,
        };

        result.map_err(Self::store_error)
    }

    async fn get_stats(&self, id: &str) -> Result<UserStats, ServiceError> {
        let user = self.get_user(id).await?;

        let counts = self
            .store
            .referral_counts(&user.id)
            .await
            .map_err(Self::store_error)?;
        let transactions = self
            .store
            .list_transactions(&user.id)
            .await
            .map_err(Self::store_error)?;
        let commissions = self
            .store
            .list_commissions(Some(&user.id))
            .await
            .map_err(Self::store_error)?;

        Ok(mlm::stats::user_stats(counts, &transactions, &commissions))
    }

    async fn get_referral_tree(
        &self,
        root: Option<String>,
    ) -> Result<Vec<ReferralEntry>, ServiceError> {
        let users = self.store.list_users().await.map_err(Self::store_error)?;

        match root {
            None => Ok(mlm::flatten(&mlm::build_forest(&users))),
            Some(id) => mlm::branch(&users, &id)
                .ok_or_else(|| ServiceError::NotFound(format!("User {}", id))),
        }
    }

    async fn get_referral_link(&self, id: &str) -> Result<ReferralLink, ServiceError> {
        let user = self.get_user(id).await?;

        Ok(ReferralLink {
            link: payouts::referral_link(&self.options.public_url, &user.referral_code),
            user_id: user.id,
            referral_code: user.referral_code,
        })
    }

    async fn ensure_admin(&self, email: String, name: String) -> Result<User, ServiceError> {
        let existing = self
            .store
            .get_user_by_email(&email)
            .await
            .map_err(Self::store_error)?;

        match existing {
            Some(user) if user.is_admin => Ok(user),
            Some(user) => {
                log::info!("Promoting {} to admin.", user.id);
                self.store
                    .set_admin(&user.id)
                    .await
                    .map_err(Self::store_error)
            }
            None => {
                log::info!("Creating admin account {}.", email);
                let record = NewUserRecord {
                    name,
                    email,
                    referral_code: String::new(),
                    referred_by: None,
                    level: 0,
                    is_admin: true,
                };
                self.insert_with_fresh_code(record).await
            }
        }
    }

    async fn require_admin(&self, id: &str) -> Result<User, ServiceError> {
        match self.store.get_user(id).await.map_err(Self::store_error)? {
            Some(user) if user.is_admin => Ok(user),
            _ => Err(ServiceError::Forbidden("Admin access required".to_string())),
        }
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::Register {
                name,
                email,
                referral_code,
                response,
            } => {
                let user = self.register(name, email, referral_code).await;
                let _ = response.send(user);
            }
            UserRequest::GetUser { id, response } => {
                let user = self.get_user(&id).await;
                let _ = response.send(user);
            }
            UserRequest::SearchUsers { query, response } => {
                let users = self.search_users(query).await;
                let _ = response.send(users);
            }
            UserRequest::GetStats { id, response } => {
                let stats = self.get_stats(&id).await;
                let _ = response.send(stats);
            }
            UserRequest::GetReferralTree { root, response } => {
                let tree = self.get_referral_tree(root).await;
                let _ = response.send(tree);
            }
            UserRequest::GetReferralLink { id, response } => {
                let link = self.get_referral_link(&id).await;
                let _ = response.send(link);
            }
            UserRequest::EnsureAdmin {
                email,
                name,
                response,
            } => {
                let admin = self.ensure_admin(email, name).await;
                let _ = response.send(admin);
            }
            UserRequest::RequireAdmin { id, response } => {
                let admin = self.require_admin(&id).await;
                let _ = response.send(admin);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}

/// Creates the configured admin account, or promotes it if it already exists.
pub async fn ensure_admin(
    channel: &mpsc::Sender<UserRequest>,
    email: String,
    name: String,
) -> Result<User, ServiceError> {
    let (admin_tx, admin_rx) = oneshot::channel();

    channel
        .send(UserRequest::EnsureAdmin {
            email,
            name,
            response: admin_tx,
        })
        .await
        .map_err(|e| ServiceError::Communication("UserService".to_string(), e.to_string()))?;

    admin_rx
        .await
        .map_err(|e| ServiceError::Communication("UserService".to_string(), e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlm::PayoutTable;
    use crate::repositories::MemoryStore;

    fn handler(purchase_on_registration: bool) -> (UserRequestHandler, mpsc::Receiver<PurchaseRequest>) {
        let (purchase_tx, purchase_rx) = mpsc::channel(8);
        let options = ProgramOptions {
            table: Arc::new(PayoutTable::standard()),
            product_name: "Trading Bot".to_string(),
            purchase_on_registration,
            public_url: "https://mlm.example.com".to_string(),
        };

        (
            UserRequestHandler::new(Arc::new(MemoryStore::new()), options, purchase_tx),
            purchase_rx,
        )
    }

    #[tokio::test]
    async fn registers_under_referrer_one_level_deeper() {
        let (handler, _rx) = handler(false);
        let alice = handler
            .register("Alice".into(), "alice@example.com".into(), None)
            .await
            .unwrap();
        let bob = handler
            .register(
                "Bob".into(),
                "bob@example.com".into(),
                Some(alice.referral_code.clone()),
            )
            .await
            .unwrap();

        assert_eq!(alice.level, 1);
        assert_eq!(bob.level, 2);
        assert_eq!(bob.referred_by.as_deref(), Some(alice.id.as_str()));
        assert_ne!(alice.referral_code, bob.referral_code);
    }

    #[tokio::test]
    async fn unknown_referral_code_is_ignored() {
        let (handler, _rx) = handler(false);
        let user = handler
            .register("Bob".into(), "bob@example.com".into(), Some("NOPE2345".into()))
            .await
            .unwrap();

        assert!(user.referred_by.is_none());
        assert_eq!(user.level, 1);
    }

    #[tokio::test]
    async fn rejects_missing_fields_and_duplicate_email() {
        let (handler, _rx) = handler(false);

        let err = handler
            .register("  ".into(), "a@example.com".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = handler
            .register("A".into(), "not-an-email".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        handler
            .register("A".into(), "a@example.com".into(), None)
            .await
            .unwrap();
        let err = handler
            .register("B".into(), "A@Example.com".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn ensure_admin_is_idempotent() {
        let (handler, _rx) = handler(false);
        let first = handler
            .ensure_admin("admin@example.com".into(), "Admin User".into())
            .await
            .unwrap();
        let second = handler
            .ensure_admin("admin@example.com".into(), "Admin User".into())
            .await
            .unwrap();

        assert!(first.is_admin);
        assert_eq!(first.level, 0);
        assert_eq!(first.id, second.id);
        assert_eq!(handler.search_users(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn require_admin_rejects_regular_users() {
        let (handler, _rx) = handler(false);
        let user = handler
            .register("Bob".into(), "bob@example.com".into(), None)
            .await
            .unwrap();

        let err = handler.require_admin(&user.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        handler
            .ensure_admin("bob@example.com".into(), "Bob".into())
            .await
            .unwrap();
        assert!(handler.require_admin(&user.id).await.unwrap().is_admin);
    }

    #[tokio::test]
    async fn builds_referral_link_from_public_url() {
        let (handler, _rx) = handler(false);
        let user = handler
            .register("Bob".into(), "bob@example.com".into(), None)
            .await
            .unwrap();

        let link = handler.get_referral_link(&user.id).await.unwrap();
        assert_eq!(
            link.link,
            format!("https://mlm.example.com/register?ref={}", user.referral_code)
        );
    }

    #[tokio::test]
    async fn registration_purchase_is_requested_when_enabled() {
        let (handler, mut rx) = handler(true);

        let answer = tokio::spawn(async move {
            match rx.recv().await {
                Some(PurchaseRequest::Purchase {
                    user_id, response, ..
                }) => {
                    drop(response);
                    Some(user_id)
                }
                _ => None,
            }
        });

        let user = handler
            .register("Bob".into(), "bob@example.com".into(), None)
            .await
            .unwrap();
        assert_eq!(answer.await.unwrap(), Some(user.id));
    }
}
