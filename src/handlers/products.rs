use std::str::FromStr;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, Path, State},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::auth::{ActorKind, AuthRouterExt};
use crate::entities::product::Category;
use crate::errors::ServiceError;
use crate::handlers::common::{created_response, message_response, success_response, QueryParams};
use crate::services::catalog::{NewProduct, ProductChanges, ProductFilter};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    pub category: Option<String>,
    pub search: Option<String>,
}

/// Uploaded image before it reaches the image store.
#[derive(Debug)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Multipart product form; every field optional until the operation decides.
#[derive(Debug, Default)]
pub struct ProductForm {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<Category>,
    pub stock: Option<i32>,
    pub brand: Option<String>,
    pub discount: Option<i32>,
    pub is_active: Option<bool>,
    pub image: Option<ImageUpload>,
}

fn parse_field<T: FromStr>(field: &str, raw: &str) -> Result<T, ServiceError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ServiceError::ValidationError(format!("{} has an invalid value", field)))
}

fn multipart_error(err: MultipartError) -> ServiceError {
    ServiceError::BadRequest(err.body_text())
}

impl ProductForm {
    /// Applies one text field. Unknown fields are ignored; blank values count as absent.
    pub fn set_text(&mut self, field: &str, value: String) -> Result<(), ServiceError> {
        if value.trim().is_empty() {
            return Ok(());
        }
        match field {
            "name" => self.name = Some(value),
            "description" => self.description = Some(value),
            "price" => self.price = Some(parse_field("price", &value)?),
            "category" => self.category = Some(parse_field("category", &value)?),
            "stock" => self.stock = Some(parse_field("stock", &value)?),
            "brand" => self.brand = Some(value.trim().to_string()),
            "discount" => self.discount = Some(parse_field("discount", &value)?),
            "isActive" | "is_active" => self.is_active = Some(parse_field("isActive", &value)?),
            _ => {}
        }
        Ok(())
    }

    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, ServiceError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == "image" {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if !bytes.is_empty() {
                    form.image = Some(ImageUpload {
                        file_name,
                        content_type,
                        bytes,
                    });
                }
            } else {
                let value = field.text().await.map_err(multipart_error)?;
                form.set_text(&name, value)?;
            }
        }
        Ok(form)
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ServiceError> {
    value.ok_or_else(|| ServiceError::ValidationError(format!("{} is required", field)))
}

/// Catalog routes, mounted at `/products`. Reads are public.
pub fn routes() -> Router<AppState> {
    let public = Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product));

    let admin = Router::new()
        .route("/", post(create_product))
        .route("/:id", patch(update_product).delete(delete_product))
        .with_actor(&[ActorKind::Admin]);

    public.merge(admin)
}

async fn store_image(state: &AppState, image: ImageUpload) -> Result<String, ServiceError> {
    state
        .services
        .images
        .store(
            image.file_name.as_deref(),
            image.content_type.as_deref(),
            image.bytes,
        )
        .await
}

async fn discard_image(state: &AppState, url: &str) {
    if let Err(e) = state.services.images.remove(url).await {
        warn!(error = %e, url, "failed to remove product image");
    }
}

async fn list_products(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<ProductQuery>,
) -> Result<Response, ServiceError> {
    let category = query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| parse_field::<Category>("category", c))
        .transpose()?;

    let products = state
        .services
        .products
        .list(ProductFilter {
            category,
            search: query.search,
            include_inactive: false,
        })
        .await?;
    Ok(success_response("Products fetched successfully", products))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let product = state.services.products.get(id).await?;
    Ok(success_response("Product fetched successfully", product))
}

async fn create_product(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let form = ProductForm::from_multipart(multipart).await?;
    let name = required(form.name, "name")?;
    let price = required(form.price, "price")?;
    let category = required(form.category, "category")?;

    let image_url = match form.image {
        Some(image) => Some(store_image(&state, image).await?),
        None => None,
    };

    let created = state
        .services
        .products
        .create(NewProduct {
            name,
            description: form.description.unwrap_or_default(),
            price,
            category,
            stock: form.stock.unwrap_or(0),
            brand: form.brand,
            discount: form.discount.unwrap_or(0),
            is_active: form.is_active.unwrap_or(true),
            image_url: image_url.clone(),
        })
        .await;

    match created {
        Ok(product) => Ok(created_response("Product created successfully", product)),
        Err(e) => {
            if let Some(url) = image_url {
                discard_image(&state, &url).await;
            }
            Err(e)
        }
    }
}

async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let form = ProductForm::from_multipart(multipart).await?;
    let previous = state.services.products.find(id).await?;

    let image_url = match form.image {
        Some(image) => Some(store_image(&state, image).await?),
        None => None,
    };

    let updated = state
        .services
        .products
        .update(
            id,
            ProductChanges {
                name: form.name,
                description: form.description,
                price: form.price,
                category: form.category,
                stock: form.stock,
                brand: form.brand,
                discount: form.discount,
                is_active: form.is_active,
                image_url: image_url.clone(),
            },
        )
        .await;

    match updated {
        Ok(product) => {
            if let (Some(_), Some(old)) = (&image_url, previous.image_url.as_deref()) {
                discard_image(&state, old).await;
            }
            Ok(success_response("Product updated successfully", product))
        }
        Err(e) => {
            if let Some(url) = image_url {
                discard_image(&state, &url).await;
            }
            Err(e)
        }
    }
}

async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    if let Some(url) = state.services.products.delete(id).await? {
        discard_image(&state, &url).await;
    }
    Ok(message_response("Product deleted successfully"))
}
