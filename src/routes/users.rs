/// User Routes
///
/// Profile listing, lookup, update and account deletion. Updates and
/// deletion are only allowed on the caller's own account.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLog};
use crate::auth::{hash_password, AuthenticatedUser, CredentialStore, USER_COLUMNS};
use crate::error::{AppError, ErrorContext, ValidationError};
use crate::models::{Event, User, UserResponse, UserSummary};
use crate::routes::events::EVENT_COLUMNS;
use crate::validators::{is_valid_email, is_valid_name, is_valid_text};

#[derive(Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: UserResponse,
    pub friends: Vec<UserSummary>,
    pub created_events: Vec<Event>,
    pub participated_events: Vec<Event>,
}

/// Partial profile update; absent fields are left unchanged
#[derive(Deserialize, Default)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub password: Option<String>,
    pub age: Option<i32>,
    pub city: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
struct UserChanges {
    email: Option<String>,
    firstname: Option<String>,
    lastname: Option<String>,
    password: Option<String>,
    age: Option<i32>,
    city: Option<String>,
}

impl UpdateUserRequest {
    fn validate(&self) -> Result<UserChanges, ValidationError> {
        let mut errors = Vec::new();
        let mut changes = UserChanges {
            age: self.age,
            password: self.password.clone(),
            ..UserChanges::default()
        };

        if let Some(email) = &self.email {
            match is_valid_email(email) {
                Ok(email) => changes.email = Some(email),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if let Some(firstname) = &self.firstname {
            match is_valid_name("firstname", firstname) {
                Ok(name) => changes.firstname = Some(name),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if let Some(lastname) = &self.lastname {
            match is_valid_name("lastname", lastname) {
                Ok(name) => changes.lastname = Some(name),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if let Some(city) = &self.city {
            match is_valid_text("city", city, 100) {
                Ok(city) => changes.city = Some(city),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if matches!(self.age, Some(age) if !(0..=150).contains(&age)) {
            errors.push("age must be between 0 and 150".to_string());
        }

        if errors.is_empty() {
            Ok(changes)
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

fn ensure_self(actor: &AuthenticatedUser, user_id: Uuid) -> Result<(), AppError> {
    if actor.user_id != user_id {
        return Err(AppError::forbidden("you can only modify your own account"));
    }
    Ok(())
}

/// GET /api/users
pub async fn list_users(pool: web::Data<PgPool>) -> Result<HttpResponse, AppError> {
    let users = sqlx::query_as::<_, UserSummary>(
        "SELECT id, firstname, lastname, city FROM users ORDER BY lastname, firstname",
    )
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(users))
}

/// GET /api/users/{id}
///
/// The user with their friends, organized events and joined events.
pub async fn get_user(
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = $1",
        USER_COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::not_found("User"))?;

    let friends = sqlx::query_as::<_, UserSummary>(
        r#"
        SELECT u.id, u.firstname, u.lastname, u.city
        FROM friendships f
        JOIN users u ON u.id = f.friend_id
        WHERE f.user_id = $1
        ORDER BY u.lastname, u.firstname
        "#,
    )
    .bind(user_id)
    .fetch_all(pool.get_ref())
    .await?;

    let created_events = sqlx::query_as::<_, Event>(&format!(
        "SELECT {} FROM events WHERE organizer_id = $1 ORDER BY date, hour",
        EVENT_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool.get_ref())
    .await?;

    let participated_events = sqlx::query_as::<_, Event>(&format!(
        r#"
        SELECT {}
        FROM events
        WHERE id IN (SELECT event_id FROM event_participants WHERE user_id = $1)
        ORDER BY date, hour
        "#,
        EVENT_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(UserDetail {
        user: UserResponse::from(&user),
        friends,
        created_events,
        participated_events,
    }))
}

/// PUT /api/users/{id}
///
/// # Errors
/// - 400: Invalid field values, all listed
/// - 403: Not the caller's account
/// - 409: New email already used
pub async fn update_user(
    path: web::Path<Uuid>,
    form: web::Json<UpdateUserRequest>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    ensure_self(&actor, user_id)?;
    let context = ErrorContext::new("user_update").with_user_id(user_id.to_string());

    let changes = form.validate()?;
    let password_hash = match &changes.password {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users SET
            email = COALESCE($2, email),
            firstname = COALESCE($3, firstname),
            lastname = COALESCE($4, lastname),
            password_hash = COALESCE($5, password_hash),
            age = COALESCE($6, age),
            city = COALESCE($7, city),
            updated_at = now()
        WHERE id = $1
        RETURNING {}
        "#,
        USER_COLUMNS
    ))
    .bind(user_id)
    .bind(&changes.email)
    .bind(&changes.firstname)
    .bind(&changes.lastname)
    .bind(&password_hash)
    .bind(changes.age)
    .bind(&changes.city)
    .fetch_optional(pool.get_ref())
    .await
    .map_err(|e| {
        let error = AppError::from(e);
        context.log_error(&error);
        error
    })?
    .ok_or_else(|| AppError::not_found("User"))?;

    AuditLog::success(AuditAction::UpdateProfile, "Profile updated")
        .with_user_id(user_id)
        .record();

    Ok(HttpResponse::Ok().json(UserResponse::from(&user)))
}

/// DELETE /api/users/{id}
///
/// Outstanding refresh tokens stop working at once: the session flow
/// rejects tokens whose user no longer exists.
pub async fn delete_user(
    path: web::Path<Uuid>,
    actor: web::ReqData<AuthenticatedUser>,
    store: web::Data<dyn CredentialStore>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    ensure_self(&actor, user_id)?;

    if !store.delete(user_id).await? {
        return Err(AppError::not_found("User"));
    }

    AuditLog::success(AuditAction::DeleteAccount, "Account deleted")
        .with_user_id(user_id)
        .record();

    Ok(HttpResponse::NoContent().finish())
}
