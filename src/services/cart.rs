use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{cart, cart_item, product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::catalog::ProductResponse;
use crate::services::orders;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product: ProductResponse,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub cart_id: Uuid,
    pub items: Vec<CartLine>,
    pub subtotal: Decimal,
}

/// Returns the customer's cart, creating it on first use.
pub async fn ensure_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<cart::Model, ServiceError> {
    if let Some(existing) = cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    {
        return Ok(existing);
    }

    let now = Utc::now();
    let fresh = cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        created_at: Set(now),
        updated_at: Set(now),
    };
    // A concurrent first request may have created it already.
    cart::Entity::insert(fresh)
        .on_conflict(
            OnConflict::column(cart::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError("cart vanished after creation".into()))
}

/// Cart lines in insertion order, joined with their live product.
pub async fn cart_lines<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Vec<(cart_item::Model, product::Model)>, ServiceError> {
    let Some(cart) = cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    else {
        return Ok(Vec::new());
    };

    let rows = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .find_also_related(product::Entity)
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(item, product)| product.map(|p| (item, p)))
        .collect())
}

/// Removes every line from the customer's cart. Returns the number removed.
pub async fn clear_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<u64, ServiceError> {
    let Some(cart) = cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    else {
        return Ok(0);
    };

    let result = cart_item::Entity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    async fn view(&self, cart_id: Uuid, user_id: Uuid) -> Result<CartView, ServiceError> {
        let lines = cart_lines(&*self.db, user_id).await?;
        let mut subtotal = Decimal::ZERO;
        let mut items = Vec::with_capacity(lines.len());
        for (item, product) in lines {
            let line_total =
                orders::add_line(Decimal::ZERO, product.effective_price(), item.quantity)?;
            subtotal = subtotal
                .checked_add(line_total)
                .ok_or_else(|| ServiceError::ValidationError("Cart total is out of range".into()))?;
            items.push(CartLine {
                product: product.into(),
                quantity: item.quantity,
                line_total,
            });
        }

        Ok(CartView {
            cart_id,
            items,
            subtotal,
        })
    }

    async fn find_line(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?)
    }

    async fn purchasable_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        let product = product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;
        if !product.is_active {
            return Err(ServiceError::ValidationError(format!(
                "{} is not available for purchase",
                product.name
            )));
        }
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = ensure_cart(&*self.db, user_id).await?;
        self.view(cart.id, user_id).await
    }

    /// Adds `quantity` units, merging into an existing line for the product.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".into(),
            ));
        }
        let product = self.purchasable_product(product_id).await?;
        let cart = ensure_cart(&*self.db, user_id).await?;
        let existing = self.find_line(cart.id, product_id).await?;

        let wanted = existing.as_ref().map_or(0, |line| line.quantity) + quantity;
        if wanted > product.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} of {} in stock",
                product.stock, product.name
            )));
        }

        match existing {
            Some(line) => {
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(wanted);
                active.update(&*self.db).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(wanted),
                    created_at: Set(Utc::now()),
                }
                .insert(&*self.db)
                .await?;
            }
        }

        debug!(%user_id, %product_id, quantity = wanted, "cart line saved");
        self.view(cart.id, user_id).await
    }

    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".into(),
            ));
        }
        let cart = ensure_cart(&*self.db, user_id).await?;
        let line = self
            .find_line(cart.id, product_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cart item", product_id))?;

        let product = self.purchasable_product(product_id).await?;
        if quantity > product.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} of {} in stock",
                product.stock, product.name
            )));
        }

        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.update(&*self.db).await?;

        self.view(cart.id, user_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let cart = ensure_cart(&*self.db, user_id).await?;
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::not_found("Cart item", product_id));
        }
        self.view(cart.id, user_id).await
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = ensure_cart(&*self.db, user_id).await?;
        let removed = clear_cart(&*self.db, user_id).await?;
        info!(%user_id, removed, "cart cleared");
        self.event_sender
            .send_or_log(Event::CartCleared { user_id })
            .await;
        Ok(CartView {
            cart_id: cart.id,
            items: Vec::new(),
            subtotal: Decimal::ZERO,
        })
    }
}
