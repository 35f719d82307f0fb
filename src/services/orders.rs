use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, LoaderTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::AuthActor;
use crate::db::DbPool;
use crate::entities::order::{self, OrderStatus, PaymentMethod, PaymentStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{cart, catalog};

/// Order together with its snapshotted line items.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Pre-agreed unit price; the live effective price is used when absent.
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub lines: Vec<LineRequest>,
    pub shipping_address: String,
    pub phone: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// Charged amount, when it was fixed before the order existed.
    pub total: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct CheckoutInput {
    pub shipping_address: String,
    pub phone: String,
    pub items: Option<Vec<(Uuid, i32)>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderPage {
    pub orders: Vec<OrderWithItems>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

/// Adds `unit_price * quantity` to `total`, rejecting amounts that overflow.
pub fn add_line(
    total: Decimal,
    unit_price: Decimal,
    quantity: i32,
) -> Result<Decimal, ServiceError> {
    unit_price
        .checked_mul(Decimal::from(quantity))
        .and_then(|line| total.checked_add(line))
        .ok_or_else(|| ServiceError::ValidationError("Order amount is out of range".into()))
}

/// Reserves stock for every line and persists the order with its snapshot.
///
/// Meant to run inside a transaction: a failing line leaves earlier
/// decrements to be rolled back by the caller.
pub async fn create_order_in<C: ConnectionTrait>(
    conn: &C,
    new_order: NewOrder,
) -> Result<OrderWithItems, ServiceError> {
    if new_order.lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "Order must contain at least one item".into(),
        ));
    }

    let order_id = Uuid::new_v4();
    let mut computed_total = Decimal::ZERO;
    let mut items = Vec::with_capacity(new_order.lines.len());

    for line in &new_order.lines {
        let product = catalog::reserve_stock(conn, line.product_id, line.quantity).await?;
        let unit_price = line.unit_price.unwrap_or_else(|| product.effective_price());
        computed_total = add_line(computed_total, unit_price, line.quantity)?;
        items.push(order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(product.id),
            product_name: Set(product.name),
            quantity: Set(line.quantity),
            unit_price: Set(unit_price),
        });
    }

    let now = Utc::now();
    let order = order::ActiveModel {
        id: Set(order_id),
        user_id: Set(new_order.user_id),
        total_amount: Set(new_order.total.unwrap_or(computed_total)),
        shipping_address: Set(new_order.shipping_address),
        phone: Set(new_order.phone),
        payment_method: Set(new_order.payment_method),
        status: Set(OrderStatus::Pending),
        payment_status: Set(new_order.payment_status),
        deliveryman_id: Set(None),
        assigned_at: Set(None),
        deliveryman_decision: Set(None),
        decision_at: Set(None),
        decision_note: Set(None),
        delivered_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    let mut saved_items = Vec::with_capacity(items.len());
    for item in items {
        saved_items.push(item.insert(conn).await?);
    }

    Ok(OrderWithItems {
        order,
        items: saved_items,
    })
}

fn validate_shipping(shipping_address: &str, phone: &str) -> Result<(), ServiceError> {
    if shipping_address.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "Shipping address is required".into(),
        ));
    }
    if phone.trim().is_empty() {
        return Err(ServiceError::ValidationError("Phone is required".into()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    async fn with_items(
        &self,
        orders: Vec<order::Model>,
    ) -> Result<Vec<OrderWithItems>, ServiceError> {
        let items = orders.load_many(order_item::Entity, &*self.db).await?;
        Ok(orders
            .into_iter()
            .zip(items)
            .map(|(order, items)| OrderWithItems { order, items })
            .collect())
    }

    pub async fn find(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))
    }

    pub async fn load(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let order = self.find(order_id).await?;
        let mut loaded = self.with_items(vec![order]).await?;
        loaded
            .pop()
            .ok_or_else(|| ServiceError::not_found("Order", order_id))
    }

    /// Direct cash-on-delivery checkout from explicit items or the cart.
    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn checkout(
        &self,
        user_id: Uuid,
        input: CheckoutInput,
    ) -> Result<OrderWithItems, ServiceError> {
        validate_shipping(&input.shipping_address, &input.phone)?;

        let lines: Vec<LineRequest> = match input.items {
            Some(items) => items
                .into_iter()
                .map(|(product_id, quantity)| LineRequest {
                    product_id,
                    quantity,
                    unit_price: None,
                })
                .collect(),
            None => cart::cart_lines(&*self.db, user_id)
                .await?
                .into_iter()
                .map(|(item, _)| LineRequest {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: None,
                })
                .collect(),
        };
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".into()));
        }

        let txn = self.db.begin().await?;
        let created = create_order_in(
            &txn,
            NewOrder {
                user_id,
                lines,
                shipping_address: input.shipping_address.trim().to_string(),
                phone: input.phone.trim().to_string(),
                payment_method: PaymentMethod::CashOnDelivery,
                payment_status: PaymentStatus::Pending,
                total: None,
            },
        )
        .await?;
        cart::clear_cart(&txn, user_id).await?;
        txn.commit().await?;

        counter!("storefront_orders_created_total", 1, "method" => "cod");
        info!(order_id = %created.order.id, total = %created.order.total_amount, "order placed");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: created.order.id,
                user_id,
                total: created.order.total_amount,
                online: false,
            })
            .await;

        Ok(created)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OrderWithItems>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        self.with_items(orders).await
    }

    /// Owner or admin only.
    pub async fn get_for(
        &self,
        actor: &AuthActor,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let loaded = self.load(order_id).await?;
        if !actor.is_admin() && loaded.order.user_id != actor.id {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".into(),
            ));
        }
        Ok(loaded)
    }

    pub async fn list_all(
        &self,
        status: Option<OrderStatus>,
        page: u64,
        limit: u64,
    ) -> Result<OrderPage, ServiceError> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);

        let mut query = order::Entity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderPage {
            orders: self.with_items(orders).await?,
            total,
            page,
            limit,
        })
    }

    /// Owner cancels a pending order; every line's stock is restored in the
    /// same transaction.
    #[instrument(skip(self))]
    pub async fn cancel(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let existing = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        if existing.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "You can only cancel your own orders".into(),
            ));
        }

        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Only pending orders can be cancelled (current status: {})",
                existing.status
            )));
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        let mut restocked = 0;
        for item in &items {
            if catalog::restore_stock(&txn, item.product_id, item.quantity).await? {
                restocked += 1;
            } else {
                warn!(product_id = %item.product_id, "product gone, stock not restored");
            }
        }
        txn.commit().await?;

        info!(%order_id, restocked, "order cancelled");
        self.event_sender
            .send_or_log(Event::OrderCancelled {
                order_id,
                restocked_lines: restocked,
            })
            .await;

        self.load(order_id).await
    }

    /// Admin override: any status may be set from any status.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<OrderWithItems, ServiceError> {
        let existing = self.find(order_id).await?;
        let old_status = existing.status;
        let now = Utc::now();

        let mut active: order::ActiveModel = existing.clone().into();
        active.status = Set(status);
        active.updated_at = Set(now);
        if status == OrderStatus::Delivered && existing.delivered_at.is_none() {
            active.delivered_at = Set(Some(now));
        }
        active.update(&*self.db).await?;

        info!(%order_id, from = %old_status, to = %status, "order status changed by admin");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: status.to_string(),
            })
            .await;

        self.load(order_id).await
    }
}
