use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, ActiveValue::Set, ConnectionTrait};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Fixed product taxonomy.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(ascii_case_insensitive)]
pub enum Category {
    #[sea_orm(string_value = "Smartphone")]
    Smartphone,
    #[sea_orm(string_value = "Laptop")]
    Laptop,
    #[sea_orm(string_value = "Tablet")]
    Tablet,
    #[sea_orm(string_value = "Headphone")]
    Headphone,
    #[sea_orm(string_value = "Smartwatch")]
    Smartwatch,
    #[sea_orm(string_value = "Camera")]
    Camera,
    #[sea_orm(string_value = "Accessories")]
    Accessories,
    #[sea_orm(string_value = "Gaming")]
    Gaming,
    #[sea_orm(string_value = "Television")]
    Television,
    #[sea_orm(string_value = "Other")]
    Other,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(
        min = 1,
        max = 200,
        message = "Product name must be between 1 and 200 characters"
    ))]
    pub name: String,

    #[sea_orm(column_type = "Text")]
    #[validate(length(max = 5000, message = "Description cannot exceed 5000 characters"))]
    pub description: String,

    #[validate(custom = "validate_price")]
    pub price: Decimal,

    pub category: Category,

    pub image_url: Option<String>,

    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,

    pub brand: Option<String>,

    /// Percentage off the list price
    #[validate(range(min = 0, max = 100, message = "Discount must be between 0 and 100"))]
    pub discount: i32,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn effective_price(&self) -> Decimal {
        effective_price(self.price, self.discount)
    }
}

/// `round(price * (1 - discount / 100))`, halves rounded away from zero.
pub fn effective_price(price: Decimal, discount: i32) -> Decimal {
    let discount = Decimal::from(discount.clamp(0, 100));
    let factor = Decimal::ONE - discount / Decimal::ONE_HUNDRED;
    (price * factor).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() {
        let mut err = ValidationError::new("price");
        err.message = Some("Price cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.is_active {
                active_model.is_active = Set(true);
            }
            if let ActiveValue::NotSet = active_model.discount {
                active_model.discount = Set(0);
            }
            active_model.created_at = Set(now);
        }

        active_model.updated_at = Set(now);

        let model: Model = active_model.clone().try_into().map_err(|_| {
            DbErr::Custom("Failed to convert ActiveModel to Model for validation".to_string())
        })?;

        if let Err(err) = model.validate() {
            return Err(DbErr::Custom(format!("Validation error: {}", err)));
        }

        Ok(active_model)
    }
}
