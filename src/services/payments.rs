//! Payment-initiation bridge.
//!
//! `init` turns a checkout payload into a gateway session and an `initiated`
//! payment row carrying the typed [`OrderDraft`]. The gateway then calls back
//! through the browser (success/fail/cancel, answered with redirects) and
//! server-to-server (IPN). Settlement is a conditional `initiated -> success`
//! update in the same transaction that materializes the order, so duplicate
//! callbacks cannot create a second order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::auth::AuthActor;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::entities::order::{PaymentMethod, PaymentStatus};
use crate::entities::payment::{self, DraftLine, OrderDraft, PaymentState};
use crate::entities::user;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::gateway::{InitRequest, PaymentGateway};
use crate::services::orders::{self, LineRequest, NewOrder};
use crate::services::{cart, catalog};

/// Raw form fields posted by the gateway.
pub type CallbackPayload = HashMap<String, String>;

#[derive(Debug, Clone, Copy)]
pub struct PaymentLineInput {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct InitPaymentInput {
    pub items: Option<Vec<PaymentLineInput>>,
    pub shipping_address: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPaymentResult {
    pub url: String,
    pub tran_id: String,
}

/// Where the browser lands after a gateway redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    PaymentNotFound,
    ValidationFailed,
    OrderCreationFailed,
    Failed,
    Cancelled,
}

impl RedirectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RedirectReason::PaymentNotFound => "payment_not_found",
            RedirectReason::ValidationFailed => "validation_failed",
            RedirectReason::OrderCreationFailed => "order_creation_failed",
            RedirectReason::Failed => "failed",
            RedirectReason::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentUrls {
    pub frontend_url: String,
    pub backend_url: String,
    pub currency: String,
}

impl From<&AppConfig> for PaymentUrls {
    fn from(config: &AppConfig) -> Self {
        Self {
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
            backend_url: config.backend_url.trim_end_matches('/').to_string(),
            currency: config.payment.currency.clone(),
        }
    }
}

impl PaymentUrls {
    fn frontend(&self, path: &str, params: &[(&str, &str)]) -> String {
        let base = format!("{}{}", self.frontend_url, path);
        Url::parse_with_params(&base, params)
            .map(String::from)
            .unwrap_or(base)
    }

    pub fn success_page(&self, tran_id: &str, order_id: Uuid) -> String {
        let order_id = order_id.to_string();
        self.frontend(
            "/payment/success",
            &[("tran_id", tran_id), ("order_id", order_id.as_str())],
        )
    }

    pub fn checkout_error(&self, reason: RedirectReason) -> String {
        self.frontend("/checkout", &[("error", reason.as_str())])
    }

    pub fn checkout_outcome(&self, reason: RedirectReason, tran_id: &str) -> String {
        self.frontend(
            "/checkout",
            &[("payment", reason.as_str()), ("tran_id", tran_id)],
        )
    }

    fn callback(&self, outcome: &str) -> String {
        format!("{}/api/v1/payment/{}", self.backend_url, outcome)
    }
}

/// `TXN-<unix-millis>-<8 alphanumerics>`
pub fn generate_tran_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("TXN-{}-{}", Utc::now().timestamp_millis(), suffix)
}

fn payload_json(payload: &CallbackPayload) -> serde_json::Value {
    serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
}

enum Settlement {
    Settled(Uuid),
    AlreadySettled(Uuid),
    NotInitiated(PaymentState),
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    urls: PaymentUrls,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        urls: PaymentUrls,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            urls,
        }
    }

    pub fn urls(&self) -> &PaymentUrls {
        &self.urls
    }

    async fn find(&self, tran_id: &str) -> Result<Option<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::TranId.eq(tran_id))
            .one(&*self.db)
            .await?)
    }

    /// Validates the lines against the live catalog without writing anything,
    /// then opens a gateway session and records the `initiated` payment.
    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn init(
        &self,
        user_id: Uuid,
        input: InitPaymentInput,
    ) -> Result<InitPaymentResult, ServiceError> {
        if input.shipping_address.trim().is_empty() || input.phone.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Shipping address and phone are required".into(),
            ));
        }

        let customer = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", user_id))?;

        let requested = match input.items {
            Some(items) => items,
            None => cart::cart_lines(&*self.db, user_id)
                .await?
                .into_iter()
                .map(|(item, _)| PaymentLineInput {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: None,
                })
                .collect(),
        };
        if requested.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".into()));
        }

        let mut lines = Vec::with_capacity(requested.len());
        let mut amount = Decimal::ZERO;
        let mut price_overridden = false;
        for line in requested {
            let product = catalog::check_stock(&*self.db, line.product_id, line.quantity).await?;
            if !product.is_active {
                return Err(ServiceError::ValidationError(format!(
                    "{} is not available for purchase",
                    product.name
                )));
            }
            let live_price = product.effective_price();
            let unit_price = match line.price {
                Some(price) if price < Decimal::ZERO => {
                    return Err(ServiceError::ValidationError(
                        "Price must not be negative".into(),
                    ))
                }
                Some(price) => {
                    if price != live_price {
                        warn!(
                            product_id = %product.id,
                            supplied = %price,
                            live = %live_price,
                            "caller-supplied price differs from catalog"
                        );
                        price_overridden = true;
                    }
                    price
                }
                None => live_price,
            };
            amount = orders::add_line(amount, unit_price, line.quantity)?;
            lines.push(DraftLine {
                product_id: product.id,
                name: product.name,
                quantity: line.quantity,
                unit_price,
            });
        }
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Payment amount must be positive".into(),
            ));
        }

        let tran_id = generate_tran_id();
        let draft = OrderDraft {
            user_id,
            items: lines,
            shipping_address: input.shipping_address.trim().to_string(),
            phone: input.phone.trim().to_string(),
        };
        let product_name = draft
            .items
            .iter()
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let session = self
            .gateway
            .init(&InitRequest {
                tran_id: tran_id.clone(),
                total_amount: amount,
                currency: self.urls.currency.clone(),
                success_url: self.urls.callback("success"),
                fail_url: self.urls.callback("fail"),
                cancel_url: self.urls.callback("cancel"),
                ipn_url: self.urls.callback("ipn"),
                customer_name: customer.name.clone(),
                customer_email: customer.email.clone(),
                customer_phone: draft.phone.clone(),
                customer_address: draft.shipping_address.clone(),
                product_name,
                item_count: draft.items.len(),
                value_a: user_id.to_string(),
                value_b: tran_id.clone(),
                value_c: serde_json::to_string(&draft)?,
            })
            .await?;

        let now = Utc::now();
        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            tran_id: Set(tran_id.clone()),
            user_id: Set(user_id),
            order_id: Set(None),
            amount: Set(amount),
            currency: Set(self.urls.currency.clone()),
            status: Set(PaymentState::Initiated),
            order_data: Set(draft),
            payment_details: Set(None),
            val_id: Set(None),
            price_overridden: Set(price_overridden),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        counter!("storefront_payments_total", 1, "outcome" => "initiated");
        info!(%tran_id, %amount, "payment initiated");
        self.event_sender
            .send_or_log(Event::PaymentInitiated {
                tran_id: tran_id.clone(),
                amount,
            })
            .await;

        Ok(InitPaymentResult {
            url: session.gateway_url,
            tran_id,
        })
    }

    /// Moves a still-initiated payment into `failed` or `cancelled`. A payment
    /// that was already closed or settled keeps its status.
    async fn close(
        &self,
        tran_id: &str,
        state: PaymentState,
        payload: &CallbackPayload,
    ) -> Result<bool, ServiceError> {
        let result = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(state))
            .col_expr(
                payment::Column::PaymentDetails,
                Expr::value(payload_json(payload)),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::TranId.eq(tran_id))
            .filter(payment::Column::Status.eq(PaymentState::Initiated))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 1 {
            counter!("storefront_payments_total", 1, "outcome" => state.to_string());
            let event = match state {
                PaymentState::Cancelled => Event::PaymentCancelled {
                    tran_id: tran_id.to_string(),
                },
                _ => Event::PaymentFailed {
                    tran_id: tran_id.to_string(),
                    reason: state.to_string(),
                },
            };
            self.event_sender.send_or_log(event).await;
        }
        Ok(result.rows_affected == 1)
    }

    /// Conditional `initiated -> success` plus order creation, atomically.
    async fn settle(
        &self,
        payment: &payment::Model,
        payload: &CallbackPayload,
        val_id: Option<&str>,
    ) -> Result<Settlement, ServiceError> {
        let txn = self.db.begin().await?;

        let claimed = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentState::Success))
            .col_expr(
                payment::Column::PaymentDetails,
                Expr::value(payload_json(payload)),
            )
            .col_expr(
                payment::Column::ValId,
                Expr::value(val_id.map(str::to_string)),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentState::Initiated))
            .exec(&txn)
            .await?;

        if claimed.rows_affected == 0 {
            drop(txn);
            let current = payment::Entity::find_by_id(payment.id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::not_found("Payment", &payment.tran_id))?;
            return Ok(match (current.status, current.order_id) {
                (PaymentState::Success, Some(order_id)) => Settlement::AlreadySettled(order_id),
                (state, _) => Settlement::NotInitiated(state),
            });
        }

        let draft = &payment.order_data;
        let created = orders::create_order_in(
            &txn,
            NewOrder {
                user_id: draft.user_id,
                lines: draft
                    .items
                    .iter()
                    .map(|line| LineRequest {
                        product_id: line.product_id,
                        quantity: line.quantity,
                        unit_price: Some(line.unit_price),
                    })
                    .collect(),
                shipping_address: draft.shipping_address.clone(),
                phone: draft.phone.clone(),
                payment_method: PaymentMethod::Online,
                payment_status: PaymentStatus::Paid,
                total: Some(payment.amount),
            },
        )
        .await?;

        payment::Entity::update_many()
            .col_expr(payment::Column::OrderId, Expr::value(Some(created.order.id)))
            .filter(payment::Column::Id.eq(payment.id))
            .exec(&txn)
            .await?;
        cart::clear_cart(&txn, draft.user_id).await?;
        txn.commit().await?;

        counter!("storefront_payments_total", 1, "outcome" => "success");
        counter!("storefront_orders_created_total", 1, "method" => "online");
        info!(tran_id = %payment.tran_id, order_id = %created.order.id, "payment settled");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: created.order.id,
                user_id: draft.user_id,
                total: created.order.total_amount,
                online: true,
            })
            .await;
        self.event_sender
            .send_or_log(Event::PaymentSucceeded {
                tran_id: payment.tran_id.clone(),
                order_id: created.order.id,
            })
            .await;

        Ok(Settlement::Settled(created.order.id))
    }

    /// Validates with the gateway, then settles. Returns the redirect target.
    async fn confirm(&self, payment: payment::Model, payload: &CallbackPayload) -> String {
        let tran_id = payment.tran_id.clone();

        if let (PaymentState::Success, Some(order_id)) = (payment.status, payment.order_id) {
            return self.urls.success_page(&tran_id, order_id);
        }

        let val_id = payload.get("val_id").map(String::as_str).filter(|v| !v.is_empty());
        let valid = match val_id {
            Some(val_id) => match self.gateway.validate(val_id).await {
                Ok(outcome) => {
                    outcome.valid
                        && outcome
                            .tran_id
                            .as_deref()
                            .map_or(true, |validated| validated == tran_id)
                }
                Err(e) => {
                    error!(error = %e, %tran_id, "gateway validation call failed");
                    false
                }
            },
            None => false,
        };

        if !valid {
            warn!(%tran_id, "payment failed gateway validation");
            if let Err(e) = self.close(&tran_id, PaymentState::Failed, payload).await {
                error!(error = %e, %tran_id, "could not mark payment failed");
            }
            return self.urls.checkout_error(RedirectReason::ValidationFailed);
        }

        match self.settle(&payment, payload, val_id).await {
            Ok(Settlement::Settled(order_id)) | Ok(Settlement::AlreadySettled(order_id)) => {
                self.urls.success_page(&tran_id, order_id)
            }
            Ok(Settlement::NotInitiated(state)) => {
                warn!(%tran_id, state = %state, "success callback for a closed payment");
                self.urls.checkout_error(RedirectReason::ValidationFailed)
            }
            Err(e) => {
                error!(error = %e, %tran_id, "order creation after payment failed");
                if let Err(e) = self.close(&tran_id, PaymentState::Failed, payload).await {
                    error!(error = %e, %tran_id, "could not mark payment failed");
                }
                self.urls.checkout_error(RedirectReason::OrderCreationFailed)
            }
        }
    }

    /// Browser success redirect from the gateway.
    #[instrument(skip_all, fields(tran_id = payload.get("tran_id").map(String::as_str).unwrap_or("")))]
    pub async fn handle_success(&self, payload: CallbackPayload) -> String {
        let Some(tran_id) = payload.get("tran_id").cloned() else {
            return self.urls.checkout_error(RedirectReason::PaymentNotFound);
        };
        match self.find(&tran_id).await {
            Ok(Some(payment)) => self.confirm(payment, &payload).await,
            Ok(None) => {
                warn!(%tran_id, "success callback for unknown transaction");
                self.urls.checkout_error(RedirectReason::PaymentNotFound)
            }
            Err(e) => {
                error!(error = %e, %tran_id, "payment lookup failed");
                self.urls.checkout_error(RedirectReason::PaymentNotFound)
            }
        }
    }

    async fn handle_closure(&self, payload: CallbackPayload, reason: RedirectReason) -> String {
        let tran_id = payload.get("tran_id").cloned().unwrap_or_default();
        let state = match reason {
            RedirectReason::Cancelled => PaymentState::Cancelled,
            _ => PaymentState::Failed,
        };
        if !tran_id.is_empty() {
            match self.close(&tran_id, state, &payload).await {
                Ok(true) => info!(%tran_id, state = %state, "payment closed by gateway"),
                Ok(false) => {}
                Err(e) => error!(error = %e, %tran_id, "could not record payment outcome"),
            }
        }
        self.urls.checkout_outcome(reason, &tran_id)
    }

    pub async fn handle_fail(&self, payload: CallbackPayload) -> String {
        self.handle_closure(payload, RedirectReason::Failed).await
    }

    pub async fn handle_cancel(&self, payload: CallbackPayload) -> String {
        self.handle_closure(payload, RedirectReason::Cancelled).await
    }

    /// Server-to-server notification; reconciles with the same transitions
    /// as the browser callbacks.
    #[instrument(skip_all)]
    pub async fn handle_ipn(&self, payload: CallbackPayload) -> Result<(), ServiceError> {
        let tran_id = payload
            .get("tran_id")
            .cloned()
            .ok_or_else(|| ServiceError::ValidationError("tran_id is required".into()))?;
        let payment = self
            .find(&tran_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", &tran_id))?;

        let status = payload.get("status").map(String::as_str).unwrap_or_default();
        match status {
            "VALID" | "VALIDATED" => {
                self.confirm(payment, &payload).await;
            }
            "FAILED" => {
                self.close(&tran_id, PaymentState::Failed, &payload).await?;
            }
            "CANCELLED" => {
                self.close(&tran_id, PaymentState::Cancelled, &payload).await?;
            }
            other => {
                info!(%tran_id, status = other, "IPN with unhandled status recorded");
                let mut active: payment::ActiveModel = payment.into();
                active.payment_details = Set(Some(payload_json(&payload)));
                active.updated_at = Set(Utc::now());
                active.update(&*self.db).await?;
            }
        }
        Ok(())
    }

    /// Owner or admin only.
    pub async fn status_for(
        &self,
        actor: &AuthActor,
        tran_id: &str,
    ) -> Result<payment::Model, ServiceError> {
        let payment = self
            .find(tran_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", tran_id))?;
        if !actor.is_admin() && payment.user_id != actor.id {
            return Err(ServiceError::Forbidden(
                "You do not have access to this payment".into(),
            ));
        }
        Ok(payment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> PaymentUrls {
        PaymentUrls {
            frontend_url: "http://shop.test".into(),
            backend_url: "http://api.test".into(),
            currency: "BDT".into(),
        }
    }

    #[test]
    fn tran_ids_have_expected_shape() {
        let id = generate_tran_id();
        let parts: Vec<_> = id.splitn(3, '-').collect();
        assert_eq!(parts[0], "TXN");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_tran_id(), id);
    }

    #[test]
    fn redirect_urls() {
        let urls = urls();
        assert_eq!(
            urls.checkout_error(RedirectReason::PaymentNotFound),
            "http://shop.test/checkout?error=payment_not_found"
        );
        assert_eq!(
            urls.checkout_outcome(RedirectReason::Cancelled, "TXN-1-AB"),
            "http://shop.test/checkout?payment=cancelled&tran_id=TXN-1-AB"
        );
        let order_id = Uuid::nil();
        assert_eq!(
            urls.success_page("TXN-1-AB", order_id),
            format!("http://shop.test/payment/success?tran_id=TXN-1-AB&order_id={}", order_id)
        );
        assert_eq!(urls.callback("ipn"), "http://api.test/api/v1/payment/ipn");
    }
}
