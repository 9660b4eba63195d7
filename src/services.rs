use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::mlm::{PayoutError, PayoutTable};
use crate::repositories::{Store, StoreError};
use crate::settings::Settings;

pub mod commissions;
pub mod http;
pub mod purchases;
pub mod users;

const CHANNEL_CAPACITY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn from_store(service: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            StoreError::Conflict(field) => {
                ServiceError::Conflict(format!("{} is already registered", field))
            }
            StoreError::InvalidState(msg) => ServiceError::Conflict(msg),
            e => ServiceError::Repository(service.to_string(), e.to_string()),
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Program-wide rules shared by every handler.
#[derive(Clone, Debug)]
pub struct ProgramOptions {
    pub table: Arc<PayoutTable>,
    pub product_name: String,
    pub purchase_on_registration: bool,
    pub public_url: String,
}

impl ProgramOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self, PayoutError> {
        Ok(ProgramOptions {
            table: Arc::new(settings.program.payout_table()?),
            product_name: settings.program.product_name.clone(),
            purchase_on_registration: settings.program.purchase_on_registration,
            public_url: settings.server.public_url.clone(),
        })
    }
}

/// Senders for every running service.
#[derive(Clone)]
pub struct ServiceChannels {
    pub users: mpsc::Sender<users::UserRequest>,
    pub purchases: mpsc::Sender<purchases::PurchaseRequest>,
    pub commissions: mpsc::Sender<commissions::CommissionRequest>,
}

/// Spawns the user, purchase and commission services on the current runtime.
pub fn spawn_services(store: Arc<dyn Store>, options: ProgramOptions) -> ServiceChannels {
    let (user_tx, mut user_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (purchase_tx, mut purchase_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (commission_tx, mut commission_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut user_service = users::UserService::new();
    let mut purchase_service = purchases::PurchaseService::new();
    let mut commission_service = commissions::CommissionService::new();

    log::info!("Starting purchase service.");
    let purchase_store = store.clone();
    let purchase_options = options.clone();
    tokio::spawn(async move {
        purchase_service
            .run(
                purchases::PurchaseRequestHandler::new(purchase_store, purchase_options),
                &mut purchase_rx,
            )
            .await;
    });

    log::info!("Starting user service.");
    let user_store = store.clone();
    let user_purchase_tx = purchase_tx.clone();
    tokio::spawn(async move {
        user_service
            .run(
                users::UserRequestHandler::new(user_store, options, user_purchase_tx),
                &mut user_rx,
            )
            .await;
    });

    log::info!("Starting commission service.");
    tokio::spawn(async move {
        commission_service
            .run(
                commissions::CommissionRequestHandler::new(store),
                &mut commission_rx,
            )
            .await;
    });

    ServiceChannels {
        users: user_tx,
        purchases: purchase_tx,
        commissions: commission_tx,
    }
}

pub async fn start_services(store: Arc<dyn Store>, settings: Settings) -> Result<(), anyhow::Error> {
    let options = ProgramOptions::from_settings(&settings)?;
    log::info!(
        "Program: {} at {} cents, {} levels paying {} cents in total.",
        options.product_name,
        options.table.product_price_in_cents(),
        options.table.max_level(),
        options.table.commission_total_in_cents()
    );

    let channels = spawn_services(store, options.clone());

    if let Some(admin) = settings.admin {
        let admin = users::ensure_admin(&channels.users, admin.email, admin.name).await?;
        log::info!("Admin account ready: {}.", admin.email);
    }

    log::info!("Starting HTTP server.");
    http::start_http_server(&settings.server.listen, channels, options).await?;

    Ok(())
}
