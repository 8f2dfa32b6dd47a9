/// Friend Routes
///
/// A friend request is a pending row in `friend_requests`; accepting it
/// replaces it with two symmetric rows in `friendships`.

use actix_web::{web, HttpResponse};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLog};
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::models::UserSummary;

/// How the caller currently relates to another user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Strangers,
    Friends,
    RequestSent,
    RequestReceived,
}

impl Relation {
    fn from_flags(friends: bool, sent: bool, received: bool) -> Self {
        if friends {
            Relation::Friends
        } else if sent {
            Relation::RequestSent
        } else if received {
            Relation::RequestReceived
        } else {
            Relation::Strangers
        }
    }
}

/// Whether the caller may send `target` a friend request
fn check_can_request(actor: Uuid, target: Uuid, relation: Relation) -> Result<(), AppError> {
    if actor == target {
        return Err(AppError::invalid("you cannot send a friend request to yourself"));
    }

    match relation {
        Relation::Strangers => Ok(()),
        Relation::Friends => Err(AppError::invalid("you are already friends")),
        Relation::RequestSent => Err(AppError::invalid("friend request already sent")),
        Relation::RequestReceived => Err(AppError::invalid(
            "this user already sent you a friend request",
        )),
    }
}

async fn relation_between(pool: &PgPool, actor: Uuid, other: Uuid) -> Result<Relation, AppError> {
    let (friends, sent, received) = sqlx::query_as::<_, (bool, bool, bool)>(
        r#"
        SELECT
            EXISTS(SELECT 1 FROM friendships WHERE user_id = $1 AND friend_id = $2),
            EXISTS(SELECT 1 FROM friend_requests WHERE sender_id = $1 AND receiver_id = $2),
            EXISTS(SELECT 1 FROM friend_requests WHERE sender_id = $2 AND receiver_id = $1)
        "#,
    )
    .bind(actor)
    .bind(other)
    .fetch_one(pool)
    .await?;

    Ok(Relation::from_flags(friends, sent, received))
}

/// GET /api/friends
pub async fn list_friends(
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let friends = sqlx::query_as::<_, UserSummary>(
        r#"
        SELECT u.id, u.firstname, u.lastname, u.city
        FROM friendships f
        JOIN users u ON u.id = f.friend_id
        WHERE f.user_id = $1
        ORDER BY u.lastname, u.firstname
        "#,
    )
    .bind(actor.user_id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(friends))
}

/// POST /api/friends/{id}/request
///
/// # Errors
/// - 400: Self, already friends, or a request pending in either direction
/// - 404: Unknown user
pub async fn send_request(
    path: web::Path<Uuid>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let target = path.into_inner();

    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(target)
        .fetch_one(pool.get_ref())
        .await?;
    if !exists {
        return Err(AppError::not_found("User"));
    }

    let relation = relation_between(pool.get_ref(), actor.user_id, target).await?;
    check_can_request(actor.user_id, target, relation)?;

    sqlx::query(
        "INSERT INTO friend_requests (sender_id, receiver_id, created_at) VALUES ($1, $2, now())",
    )
    .bind(actor.user_id)
    .bind(target)
    .execute(pool.get_ref())
    .await?;

    AuditLog::success(AuditAction::FriendRequest, "Friend request sent")
        .with_user_id(actor.user_id)
        .with_target_id(target)
        .record();

    Ok(HttpResponse::Created().json(serde_json::json!({
        "message": "Friend request sent",
        "receiver_id": target,
    })))
}

/// POST /api/friends/{id}/accept
pub async fn accept_request(
    path: web::Path<Uuid>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let sender = path.into_inner();
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM friend_requests WHERE sender_id = $1 AND receiver_id = $2")
        .bind(sender)
        .bind(actor.user_id)
        .execute(&mut tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::invalid("no pending friend request from this user"));
    }

    sqlx::query(
        r#"
        INSERT INTO friendships (user_id, friend_id, created_at)
        VALUES ($1, $2, now()), ($2, $1, now())
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(actor.user_id)
    .bind(sender)
    .execute(&mut tx)
    .await?;

    tx.commit().await?;

    AuditLog::success(AuditAction::FriendAccept, "Friend request accepted")
        .with_user_id(actor.user_id)
        .with_target_id(sender)
        .record();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Friend request accepted",
        "friend_id": sender,
    })))
}

/// POST /api/friends/{id}/refuse
pub async fn refuse_request(
    path: web::Path<Uuid>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let sender = path.into_inner();

    let deleted = sqlx::query("DELETE FROM friend_requests WHERE sender_id = $1 AND receiver_id = $2")
        .bind(sender)
        .bind(actor.user_id)
        .execute(pool.get_ref())
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::invalid("no pending friend request from this user"));
    }

    AuditLog::success(AuditAction::FriendRefuse, "Friend request refused")
        .with_user_id(actor.user_id)
        .with_target_id(sender)
        .record();

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Friend request refused" })))
}

/// DELETE /api/friends/{id}
pub async fn remove_friend(
    path: web::Path<Uuid>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let friend = path.into_inner();

    let deleted = sqlx::query(
        r#"
        DELETE FROM friendships
        WHERE (user_id = $1 AND friend_id = $2) OR (user_id = $2 AND friend_id = $1)
        "#,
    )
    .bind(actor.user_id)
    .bind(friend)
    .execute(pool.get_ref())
    .await?
    .rows_affected();
    if deleted == 0 {
        return Err(AppError::invalid("you are not friends with this user"));
    }

    AuditLog::success(AuditAction::FriendRemove, "Friend removed")
        .with_user_id(actor.user_id)
        .with_target_id(friend)
        .record();

    Ok(HttpResponse::NoContent().finish())
}
