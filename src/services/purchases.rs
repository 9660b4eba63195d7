use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{ProgramOptions, RequestHandler, Service, ServiceError};
use crate::models::{
    commissions::PurchaseReceipt,
    transactions::{NewPurchase, Transaction},
};
use crate::repositories::Store;

pub enum PurchaseRequest {
    /// Records a purchase and pays out its commission cascade. Without an
    /// amount the configured product price is charged.
    Purchase {
        user_id: String,
        amount_in_cents: Option<i64>,
        response: oneshot::Sender<Result<PurchaseReceipt, ServiceError>>,
    },
    ListTransactions {
        user_id: String,
        response: oneshot::Sender<Result<Vec<Transaction>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct PurchaseRequestHandler {
    store: Arc<dyn Store>,
    options: ProgramOptions,
}

impl PurchaseRequestHandler {
    pub fn new(store: Arc<dyn Store>, options: ProgramOptions) -> Self {
        PurchaseRequestHandler { store, options }
    }

    async fn purchase(
        &self,
        user_id: String,
        amount_in_cents: Option<i64>,
    ) -> Result<PurchaseReceipt, ServiceError> {
        let price = self.options.table.product_price_in_cents();
        let amount_in_cents = amount_in_cents.unwrap_or(price);
        // The cascade pays the full table, which is only covered by a full
        // price purchase.
        if amount_in_cents < price {
            return Err(ServiceError::Validation(format!(
                "Purchase amount {} is below the product price {}",
                amount_in_cents, price
            )));
        }

        let purchase = NewPurchase {
            user_id,
            amount_in_cents,
            description: format!("{} purchase", self.options.product_name),
        };

        let receipt = self
            .store
            .record_purchase(purchase, &self.options.table)
            .await
            .map_err(|e| ServiceError::from_store("PurchaseService", e))?;

        log::info!(
            "Purchase {} by {} for {} cents, {} commissions totalling {} cents.",
            receipt.purchase.id,
            receipt.purchase.user_id,
            receipt.purchase.amount_in_cents,
            receipt.commissions.len(),
            receipt.total_commissions_in_cents()
        );

        Ok(receipt)
    }

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<Transaction>, ServiceError> {
        if self
            .store
            .get_user(user_id)
            .await
            .map_err(|e| ServiceError::from_store("PurchaseService", e))?
            .is_none()
        {
            return Err(ServiceError::NotFound(format!("User {}", user_id)));
        }

        self.store
            .list_transactions(user_id)
            .await
            .map_err(|e| ServiceError::from_store("PurchaseService", e))
    }
}

#[async_trait]
impl RequestHandler<PurchaseRequest> for PurchaseRequestHandler {
    async fn handle_request(&self, request: PurchaseRequest) {
        match request {
            PurchaseRequest::Purchase {
                user_id,
                amount_in_cents,
                response,
            } => {
                let receipt = self.purchase(user_id, amount_in_cents).await;
                if let Err(e) = &receipt {
                    log::error!("Purchase failed: {}", e);
                }
                let _ = response.send(receipt);
            }
            PurchaseRequest::ListTransactions { user_id, response } => {
                let transactions = self.list_transactions(&user_id).await;
                let _ = response.send(transactions);
            }
        }
    }
}

pub struct PurchaseService;

impl PurchaseService {
    pub fn new() -> Self {
        PurchaseService {}
    }
}

#[async_trait]
impl Service<PurchaseRequest, PurchaseRequestHandler> for PurchaseService {}
