pub mod admin;
pub mod cart;
pub mod chat;
pub mod common;
pub mod deliveryman;
pub mod health;
pub mod orders;
pub mod payments;
pub mod products;
pub mod sessions;
pub mod users;

use std::sync::Arc;

use crate::auth::SessionService;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    cart::CartService, catalog::ProductService, chat::ChatService, delivery::DeliveryService,
    gateway::PaymentGateway, identity::IdentityService, orders::OrderService,
    payments::{PaymentService, PaymentUrls},
    revenue::RevenueService, uploads::ImageStore,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub identity: Arc<IdentityService>,
    pub products: Arc<ProductService>,
    pub images: Arc<dyn ImageStore>,
    pub cart: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub delivery: Arc<DeliveryService>,
    pub revenue: Arc<RevenueService>,
    pub chat: Arc<ChatService>,
}

impl AppServices {
    /// Wires every service over one pool and event channel. The gateway and
    /// image store are injected so tests can substitute them.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        sessions: Arc<SessionService>,
        gateway: Arc<dyn PaymentGateway>,
        images: Arc<dyn ImageStore>,
        config: &AppConfig,
    ) -> Self {
        let identity = Arc::new(IdentityService::new(
            db_pool.clone(),
            sessions,
            config.admin_registration_key.clone(),
        ));
        let products = Arc::new(ProductService::new(db_pool.clone(), event_sender.clone()));
        let cart = Arc::new(CartService::new(db_pool.clone(), event_sender.clone()));
        let orders = Arc::new(OrderService::new(db_pool.clone(), event_sender.clone()));
        let payments = Arc::new(PaymentService::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway,
            PaymentUrls::from(config),
        ));
        let delivery = Arc::new(DeliveryService::new(
            db_pool.clone(),
            event_sender,
            orders.clone(),
        ));
        let revenue = Arc::new(RevenueService::new(db_pool.clone()));
        let chat = Arc::new(ChatService::new(db_pool));

        Self {
            identity,
            products,
            images,
            cart,
            orders,
            payments,
            delivery,
            revenue,
            chat,
        }
    }
}
