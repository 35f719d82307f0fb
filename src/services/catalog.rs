use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::product::{self, Category};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Product as exposed over the API, with the discounted price precomputed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    #[serde(flatten)]
    pub product: product::Model,
    pub effective_price: Decimal,
}

impl From<product::Model> for ProductResponse {
    fn from(product: product::Model) -> Self {
        let effective_price = product.effective_price();
        Self {
            product,
            effective_price,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProductFilter {
    pub category: Option<Category>,
    pub search: Option<String>,
    pub include_inactive: bool,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub category: Category,
    pub stock: i32,
    pub brand: Option<String>,
    pub discount: i32,
    pub is_active: bool,
    pub image_url: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<Category>,
    pub stock: Option<i32>,
    pub brand: Option<String>,
    pub discount: Option<i32>,
    pub is_active: Option<bool>,
    pub image_url: Option<String>,
}

impl ProductChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.category.is_none()
            && self.stock.is_none()
            && self.brand.is_none()
            && self.discount.is_none()
            && self.is_active.is_none()
            && self.image_url.is_none()
    }
}

/// Case-insensitive OR-match of every keyword across name, category and brand.
pub fn keyword_condition(keywords: &[String]) -> Condition {
    let mut condition = Condition::any();
    for keyword in keywords {
        let pattern = format!("%{}%", keyword.to_lowercase());
        for column in [
            product::Column::Name,
            product::Column::Category,
            product::Column::Brand,
        ] {
            condition = condition.add(Expr::expr(Func::lower(Expr::col(column))).like(pattern.clone()));
        }
    }
    condition
}

/// Decrements stock by `quantity` only if enough is on hand, in a single
/// conditional UPDATE. Returns the product after the decrement.
pub async fn reserve_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<product::Model, ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(
            "Quantity must be at least 1".to_string(),
        ));
    }

    // Write before reading so a transaction takes the write lock up front.
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    let product = product::Entity::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))?;

    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "Insufficient stock for {}: requested {}, available {}",
            product.name, quantity, product.stock
        )));
    }

    Ok(product)
}

/// Puts `quantity` back on the shelf. A product deleted since the order was
/// placed is skipped and reported as `false`.
pub async fn restore_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).add(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Checks existence and current stock without writing anything.
pub async fn check_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<product::Model, ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(
            "Quantity must be at least 1".to_string(),
        ));
    }
    let product = product::Entity::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))?;
    if product.stock < quantity {
        return Err(ServiceError::InsufficientStock(format!(
            "Insufficient stock for {}: requested {}, available {}",
            product.name, quantity, product.stock
        )));
    }
    Ok(product)
}

/// Entity validation in `before_save` surfaces as `DbErr::Custom`.
fn map_save_error(err: DbErr) -> ServiceError {
    match err {
        DbErr::Custom(msg) if msg.starts_with("Validation error") => {
            ServiceError::ValidationError(msg.trim_start_matches("Validation error: ").to_string())
        }
        other => ServiceError::DatabaseError(other),
    }
}

#[derive(Clone)]
pub struct ProductService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl ProductService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn list(&self, filter: ProductFilter) -> Result<Vec<ProductResponse>, ServiceError> {
        let mut query = product::Entity::find();

        if !filter.include_inactive {
            query = query.filter(product::Column::IsActive.eq(true));
        }
        if let Some(category) = filter.category {
            query = query.filter(product::Column::Category.eq(category));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(keyword_condition(&[search.to_string()]));
        }

        let products = query
            .order_by_desc(product::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to list products");
                ServiceError::DatabaseError(e)
            })?;

        Ok(products.into_iter().map(ProductResponse::from).collect())
    }

    pub async fn find(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", id))
    }

    pub async fn get(&self, id: Uuid) -> Result<ProductResponse, ServiceError> {
        self.find(id).await.map(ProductResponse::from)
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: NewProduct) -> Result<ProductResponse, ServiceError> {
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            description: Set(input.description),
            price: Set(input.price),
            category: Set(input.category),
            image_url: Set(input.image_url),
            stock: Set(input.stock),
            brand: Set(input.brand),
            discount: Set(input.discount),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(map_save_error)?;

        info!(product_id = %model.id, "product created");
        self.event_sender
            .send_or_log(Event::ProductCreated(model.id))
            .await;

        Ok(model.into())
    }

    #[instrument(skip(self, changes))]
    pub async fn update(
        &self,
        id: Uuid,
        changes: ProductChanges,
    ) -> Result<ProductResponse, ServiceError> {
        let existing = self.find(id).await?;
        if changes.is_empty() {
            return Ok(existing.into());
        }

        let mut active: product::ActiveModel = existing.into();
        if let Some(name) = changes.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(description) = changes.description {
            active.description = Set(description);
        }
        if let Some(price) = changes.price {
            active.price = Set(price);
        }
        if let Some(category) = changes.category {
            active.category = Set(category);
        }
        if let Some(stock) = changes.stock {
            active.stock = Set(stock);
        }
        if let Some(brand) = changes.brand {
            active.brand = Set(Some(brand));
        }
        if let Some(discount) = changes.discount {
            active.discount = Set(discount);
        }
        if let Some(is_active) = changes.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(image_url) = changes.image_url {
            active.image_url = Set(Some(image_url));
        }

        let updated = active.update(&*self.db).await.map_err(map_save_error)?;

        info!(product_id = %id, "product updated");
        self.event_sender.send_or_log(Event::ProductUpdated(id)).await;

        Ok(updated.into())
    }

    /// Deletes the product and returns its image URL so the caller can clean up.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<Option<String>, ServiceError> {
        let existing = self.find(id).await?;
        product::Entity::delete_by_id(id).exec(&*self.db).await?;

        info!(product_id = %id, "product deleted");
        self.event_sender.send_or_log(Event::ProductDeleted(id)).await;

        Ok(existing.image_url)
    }
}
