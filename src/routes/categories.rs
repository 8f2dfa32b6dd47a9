use actix_web::{web, HttpResponse};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Category, Event};
use crate::routes::events::EVENT_COLUMNS;
use crate::validators::is_valid_text;

const MAX_LABEL_LENGTH: usize = 100;

#[derive(Deserialize)]
pub struct CategoryRequest {
    #[serde(default)]
    pub label: String,
}

/// GET /api/categories
pub async fn list_categories(pool: web::Data<PgPool>) -> Result<HttpResponse, AppError> {
    let categories = sqlx::query_as::<_, Category>(
        "SELECT id, label, created_at, updated_at FROM categories ORDER BY label",
    )
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(categories))
}

async fn fetch_category(pool: &PgPool, id: Uuid) -> Result<Category, AppError> {
    sqlx::query_as::<_, Category>(
        "SELECT id, label, created_at, updated_at FROM categories WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Category"))
}

/// GET /api/categories/{id}
pub async fn get_category(
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let category = fetch_category(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(category))
}

/// POST /api/categories
///
/// # Errors
/// - 400: Empty label
/// - 409: Label already exists
pub async fn create_category(
    form: web::Json<CategoryRequest>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let label = is_valid_text("label", &form.label, MAX_LABEL_LENGTH)?;

    let category = sqlx::query_as::<_, Category>(
        r#"
        INSERT INTO categories (id, label, created_at, updated_at)
        VALUES ($1, $2, now(), now())
        RETURNING id, label, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&label)
    .fetch_one(pool.get_ref())
    .await?;

    tracing::info!(category_id = %category.id, label = %category.label, "Category created");

    Ok(HttpResponse::Created().json(category))
}

/// PUT /api/categories/{id}
pub async fn update_category(
    path: web::Path<Uuid>,
    form: web::Json<CategoryRequest>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let label = is_valid_text("label", &form.label, MAX_LABEL_LENGTH)?;

    let category = sqlx::query_as::<_, Category>(
        r#"
        UPDATE categories SET label = $2, updated_at = now()
        WHERE id = $1
        RETURNING id, label, created_at, updated_at
        "#,
    )
    .bind(path.into_inner())
    .bind(&label)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::not_found("Category"))?;

    Ok(HttpResponse::Ok().json(category))
}

/// DELETE /api/categories/{id}
///
/// Events in the category are kept, uncategorized.
pub async fn delete_category(
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let deleted = sqlx::query("DELETE FROM categories WHERE id = $1")
        .bind(path.into_inner())
        .execute(pool.get_ref())
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::not_found("Category"));
    }

    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/categories/{id}/events
pub async fn category_events(
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let category = fetch_category(pool.get_ref(), path.into_inner()).await?;

    let events = sqlx::query_as::<_, Event>(&format!(
        "SELECT {} FROM events WHERE category_id = $1 ORDER BY date, hour",
        EVENT_COLUMNS
    ))
    .bind(category.id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(events))
}
