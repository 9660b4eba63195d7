use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::{commissions::Commission, referrals::ProgramTotals};
use crate::repositories::{Store, StoreError};

pub enum CommissionRequest {
    /// Commissions earned by one user, or every commission.
    ListCommissions {
        user_id: Option<String>,
        response: oneshot::Sender<Result<Vec<Commission>, ServiceError>>,
    },
    MarkPaid {
        id: String,
        response: oneshot::Sender<Result<Commission, ServiceError>>,
    },
    GetTotals {
        response: oneshot::Sender<Result<ProgramTotals, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct CommissionRequestHandler {
    store: Arc<dyn Store>,
}

impl CommissionRequestHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        CommissionRequestHandler { store }
    }

    fn store_error(e: StoreError) -> ServiceError {
        ServiceError::from_store("CommissionService", e)
    }

    async fn list_commissions(
        &self,
        user_id: Option<String>,
    ) -> Result<Vec<Commission>, ServiceError> {
        if let Some(id) = &user_id {
            if self
                .store
                .get_user(id)
                .await
                .map_err(Self::store_error)?
                .is_none()
            {
                return Err(ServiceError::NotFound(format!("User {}", id)));
            }
        }

        self.store
            .list_commissions(user_id.as_deref())
            .await
            .map_err(Self::store_error)
    }

    async fn mark_paid(&self, id: &str) -> Result<Commission, ServiceError> {
        let commission = self
            .store
            .mark_commission_paid(id)
            .await
            .map_err(Self::store_error)?;
        log::info!(
            "Commission {} of {} cents paid to {}.",
            commission.id,
            commission.amount_in_cents,
            commission.user_id
        );

        Ok(commission)
    }

    async fn totals(&self) -> Result<ProgramTotals, ServiceError> {
        self.store.totals().await.map_err(Self::store_error)
    }
}

#[async_trait]
impl RequestHandler<CommissionRequest> for CommissionRequestHandler {
    async fn handle_request(&self, request: CommissionRequest) {
        match request {
            CommissionRequest::ListCommissions { user_id, response } => {
                let commissions = self.list_commissions(user_id).await;
                let _ = response.send(commissions);
            }
            CommissionRequest::MarkPaid { id, response } => {
                let commission = self.mark_paid(&id).await;
                let _ = response.send(commission);
            }
            CommissionRequest::GetTotals { response } => {
                let totals = self.totals().await;
                let _ = response.send(totals);
            }
        }
    }
}

pub struct CommissionService;

impl CommissionService {
    pub fn new() -> Self {
        CommissionService {}
    }
}

#[async_trait]
impl Service<CommissionRequest, CommissionRequestHandler> for CommissionService {}
