pub mod admin;
pub mod cart;
pub mod cart_item;
pub mod deliveryman;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod refresh_token;
pub mod user;

pub use order::{DeliveryDecision, OrderStatus, PaymentMethod, PaymentStatus};
pub use payment::{DraftLine, OrderDraft, PaymentState};
pub use product::Category;
