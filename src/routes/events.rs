/// Event Routes
///
/// Events, their participants and invitations. Only the organizer may edit
/// or delete an event, invite friends to it, or add someone else to it.

use actix_web::{web, HttpResponse};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, ValidationError};
use crate::models::{Category, Event, UserSummary};
use crate::validators::is_valid_text;

pub(crate) const EVENT_COLUMNS: &str = "id, title, description, date, hour, location, organizer_id, \
                                        category_id, created_at, updated_at";

const MAX_TITLE_LENGTH: usize = 200;
const MAX_DESCRIPTION_LENGTH: usize = 5000;
const MAX_LOCATION_LENGTH: usize = 255;

// ============================================================================
// Request / response types
// ============================================================================

/// Event fields as sent by clients; all optional so that creation can
/// report every missing field and updates can be partial
#[derive(Deserialize, Default)]
pub struct EventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub hour: Option<String>,
    pub location: Option<String>,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Default, PartialEq)]
struct EventFields {
    title: Option<String>,
    description: Option<String>,
    date: Option<NaiveDate>,
    hour: Option<NaiveTime>,
    location: Option<String>,
    category_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: Event,
    pub organizer: Option<UserSummary>,
    pub participants: Vec<UserSummary>,
    pub category: Option<Category>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub location: Option<String>,
}

#[derive(Deserialize)]
pub struct ParticipantRequest {
    pub participant_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct InvitationRequest {
    #[serde(default)]
    pub invited_friend_ids: Vec<Uuid>,
}

// ============================================================================
// Validation helpers
// ============================================================================

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Accepts `HH:MM` or `HH:MM:SS`
fn parse_hour(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

impl EventRequest {
    /// Validate present fields; with `require_all`, absent ones are errors
    fn validate(&self, require_all: bool) -> Result<EventFields, ValidationError> {
        let mut errors = Vec::new();
        let mut fields = EventFields {
            category_id: self.category_id,
            ..EventFields::default()
        };

        let mut text = |name: &str, value: &Option<String>, max: usize| -> Option<String> {
            match value {
                Some(v) => is_valid_text(name, v, max)
                    .map_err(|e| errors.push(e.to_string()))
                    .ok(),
                None => {
                    if require_all {
                        errors.push(format!("{} is required", name));
                    }
                    None
                }
            }
        };
        fields.title = text("title", &self.title, MAX_TITLE_LENGTH);
        fields.description = text("description", &self.description, MAX_DESCRIPTION_LENGTH);
        fields.location = text("location", &self.location, MAX_LOCATION_LENGTH);

        match self.date.as_deref() {
            Some(d) => match parse_date(d) {
                Some(date) => fields.date = Some(date),
                None => errors.push("date must be formatted YYYY-MM-DD".to_string()),
            },
            None if require_all => errors.push("date is required".to_string()),
            None => {}
        }

        match self.hour.as_deref() {
            Some(h) => match parse_hour(h) {
                Some(hour) => fields.hour = Some(hour),
                None => errors.push("hour must be formatted HH:MM".to_string()),
            },
            None if require_all => errors.push("hour is required".to_string()),
            None => {}
        }

        if errors.is_empty() {
            Ok(fields)
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl SearchParams {
    fn validate(&self) -> Result<Option<String>, ValidationError> {
        let location = self
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(like_pattern);

        if self.start.is_none() && self.end.is_none() && location.is_none() {
            return Err(ValidationError::InvalidFormat(
                "search needs start, end or location".to_string(),
            ));
        }

        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(ValidationError::InvalidFormat(
                    "start must not be after end".to_string(),
                ));
            }
        }

        Ok(location)
    }
}

/// Case-insensitive substring pattern with LIKE wildcards escaped
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Adding or removing `participant` is allowed for that user or the organizer
fn can_manage_participant(actor: Uuid, participant: Uuid, organizer: Uuid) -> bool {
    actor == participant || actor == organizer
}

/// Participant named by an optional JSON body, defaulting to `actor`
///
/// An empty body means "add me"; a body that is present must parse.
fn participant_from_body(body: &[u8], actor: Uuid) -> Result<Uuid, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(actor);
    }

    let request: ParticipantRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::invalid(format!("participant body: {}", e)))?;
    Ok(request.participant_id.unwrap_or(actor))
}

fn ensure_organizer(actor: &AuthenticatedUser, event: &Event) -> Result<(), AppError> {
    if event.organizer_id != actor.user_id {
        return Err(AppError::forbidden("only the organizer can do this"));
    }
    Ok(())
}

/// Ids in `requested` that are missing from `found`, in request order
fn missing_ids(requested: &[Uuid], found: &HashSet<Uuid>) -> Vec<Uuid> {
    requested
        .iter()
        .filter(|id| !found.contains(id))
        .copied()
        .collect()
}

async fn fetch_event(pool: &PgPool, id: Uuid) -> Result<Event, AppError> {
    sqlx::query_as::<_, Event>(&format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Event"))
}

// ============================================================================
// Events
// ============================================================================

/// GET /api/events
pub async fn list_events(pool: web::Data<PgPool>) -> Result<HttpResponse, AppError> {
    let events = sqlx::query_as::<_, Event>(&format!(
        "SELECT {} FROM events ORDER BY date, hour",
        EVENT_COLUMNS
    ))
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(events))
}

/// GET /api/events/{id}
pub async fn get_event(
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let event = fetch_event(pool.get_ref(), path.into_inner()).await?;

    let organizer = sqlx::query_as::<_, UserSummary>(
        "SELECT id, firstname, lastname, city FROM users WHERE id = $1",
    )
    .bind(event.organizer_id)
    .fetch_optional(pool.get_ref())
    .await?;

    let participants = sqlx::query_as::<_, UserSummary>(
        r#"
        SELECT u.id, u.firstname, u.lastname, u.city
        FROM event_participants p
        JOIN users u ON u.id = p.user_id
        WHERE p.event_id = $1
        ORDER BY u.lastname, u.firstname
        "#,
    )
    .bind(event.id)
    .fetch_all(pool.get_ref())
    .await?;

    let category = match event.category_id {
        Some(category_id) => {
            sqlx::query_as::<_, Category>(
                "SELECT id, label, created_at, updated_at FROM categories WHERE id = $1",
            )
            .bind(category_id)
            .fetch_optional(pool.get_ref())
            .await?
        }
        None => None,
    };

    Ok(HttpResponse::Ok().json(EventDetail {
        event,
        organizer,
        participants,
        category,
    }))
}

/// POST /api/events
///
/// The caller becomes the organizer.
///
/// # Errors
/// - 400: Missing or invalid fields, all listed
/// - 404: Unknown category
pub async fn create_event(
    form: web::Json<EventRequest>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let fields = form.validate(true)?;

    let event = sqlx::query_as::<_, Event>(&format!(
        r#"
        INSERT INTO events (id, title, description, date, hour, location, organizer_id, category_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), now())
        RETURNING {}
        "#,
        EVENT_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(&fields.title)
    .bind(&fields.description)
    .bind(fields.date)
    .bind(fields.hour)
    .bind(&fields.location)
    .bind(actor.user_id)
    .bind(fields.category_id)
    .fetch_one(pool.get_ref())
    .await?;

    tracing::info!(event_id = %event.id, organizer_id = %actor.user_id, "Event created");

    Ok(HttpResponse::Created().json(event))
}

/// PUT /api/events/{id}
pub async fn update_event(
    path: web::Path<Uuid>,
    form: web::Json<EventRequest>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let event = fetch_event(pool.get_ref(), path.into_inner()).await?;
    ensure_organizer(&actor, &event)?;

    let fields = form.validate(false)?;

    let event = sqlx::query_as::<_, Event>(&format!(
        r#"
        UPDATE events SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            date = COALESCE($4, date),
            hour = COALESCE($5, hour),
            location = COALESCE($6, location),
            category_id = COALESCE($7, category_id),
            updated_at = now()
        WHERE id = $1
        RETURNING {}
        "#,
        EVENT_COLUMNS
    ))
    .bind(event.id)
    .bind(&fields.title)
    .bind(&fields.description)
    .bind(fields.date)
    .bind(fields.hour)
    .bind(&fields.location)
    .bind(fields.category_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::not_found("Event"))?;

    Ok(HttpResponse::Ok().json(event))
}

/// DELETE /api/events/{id}
pub async fn delete_event(
    path: web::Path<Uuid>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let event = fetch_event(pool.get_ref(), path.into_inner()).await?;
    ensure_organizer(&actor, &event)?;

    sqlx::query("DELETE FROM events WHERE id = $1")
        .bind(event.id)
        .execute(pool.get_ref())
        .await?;

    tracing::info!(event_id = %event.id, "Event deleted");

    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/events/search?start=&end=&location=
///
/// Date bounds are inclusive; location matches case-insensitively anywhere.
pub async fn search_events(
    params: web::Query<SearchParams>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let location = params.validate()?;

    let events = sqlx::query_as::<_, Event>(&format!(
        r#"
        SELECT {}
        FROM events
        WHERE ($1::date IS NULL OR date >= $1)
          AND ($2::date IS NULL OR date <= $2)
          AND ($3::text IS NULL OR location ILIKE $3)
        ORDER BY date, hour
        "#,
        EVENT_COLUMNS
    ))
    .bind(params.start)
    .bind(params.end)
    .bind(location)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(events))
}

// ============================================================================
// Participants
// ============================================================================

/// POST /api/events/{id}/participants
///
/// Without a body the caller joins the event.
///
/// # Errors
/// - 400: Body present but not a valid participant request
/// - 403: Adding someone else without being the organizer
/// - 404: Unknown event
pub async fn add_participant(
    path: web::Path<Uuid>,
    body: web::Bytes,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let participant = participant_from_body(&body, actor.user_id)?;
    let event = fetch_event(pool.get_ref(), path.into_inner()).await?;

    if !can_manage_participant(actor.user_id, participant, event.organizer_id) {
        return Err(AppError::forbidden("only the organizer can add other participants"));
    }

    sqlx::query(
        r#"
        INSERT INTO event_participants (event_id, user_id, created_at)
        VALUES ($1, $2, now())
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(event.id)
    .bind(participant)
    .execute(pool.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(serde_json::json!({
        "event_id": event.id,
        "participant_id": participant,
    })))
}

/// DELETE /api/events/{id}/participants/{user_id}
pub async fn remove_participant(
    path: web::Path<(Uuid, Uuid)>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let (event_id, participant) = path.into_inner();
    let event = fetch_event(pool.get_ref(), event_id).await?;

    if !can_manage_participant(actor.user_id, participant, event.organizer_id) {
        return Err(AppError::forbidden("only the organizer can remove other participants"));
    }

    let deleted = sqlx::query("DELETE FROM event_participants WHERE event_id = $1 AND user_id = $2")
        .bind(event.id)
        .bind(participant)
        .execute(pool.get_ref())
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::not_found("Participant"));
    }

    Ok(HttpResponse::NoContent().finish())
}

// ============================================================================
// Invitations
// ============================================================================

/// POST /api/events/{id}/invitations
///
/// # Errors
/// - 400: Empty list, or an invitee who is not the organizer's friend
/// - 403: Caller is not the organizer
/// - 404: Unknown event or user
pub async fn invite_friends(
    path: web::Path<Uuid>,
    form: web::Json<InvitationRequest>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let event = fetch_event(pool.get_ref(), path.into_inner()).await?;
    ensure_organizer(&actor, &event)?;

    let mut seen = HashSet::new();
    let invited: Vec<Uuid> = form
        .invited_friend_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();
    if invited.is_empty() {
        return Err(AppError::invalid("invited_friend_ids must not be empty"));
    }

    let existing: HashSet<Uuid> =
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = ANY($1)")
            .bind(&invited)
            .fetch_all(pool.get_ref())
            .await?
            .into_iter()
            .collect();
    if let Some(unknown) = missing_ids(&invited, &existing).first() {
        return Err(AppError::not_found(format!("User {}", unknown)));
    }

    let friends: HashSet<Uuid> = sqlx::query_scalar::<_, Uuid>(
        "SELECT friend_id FROM friendships WHERE user_id = $1 AND friend_id = ANY($2)",
    )
    .bind(actor.user_id)
    .bind(&invited)
    .fetch_all(pool.get_ref())
    .await?
    .into_iter()
    .collect();
    let strangers = missing_ids(&invited, &friends);
    if !strangers.is_empty() {
        return Err(ValidationError::Multiple(
            strangers
                .iter()
                .map(|id| format!("user {} is not your friend", id))
                .collect(),
        )
        .into());
    }

    let mut tx = pool.begin().await?;
    for user_id in &invited {
        sqlx::query(
            r#"
            INSERT INTO event_invitations (event_id, user_id, created_at)
            VALUES ($1, $2, now())
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(user_id)
        .execute(&mut tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(event_id = %event.id, invited = invited.len(), "Friends invited to event");

    Ok(HttpResponse::Created().json(serde_json::json!({
        "event_id": event.id,
        "invited": invited,
    })))
}

/// POST /api/events/{id}/invitations/accept
///
/// Turns the caller's invitation into participation.
pub async fn accept_invitation(
    path: web::Path<Uuid>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let event_id = path.into_inner();
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM event_invitations WHERE event_id = $1 AND user_id = $2")
        .bind(event_id)
        .bind(actor.user_id)
        .execute(&mut tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::not_found("Invitation"));
    }

    sqlx::query(
        r#"
        INSERT INTO event_participants (event_id, user_id, created_at)
        VALUES ($1, $2, now())
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(event_id)
    .bind(actor.user_id)
    .execute(&mut tx)
    .await?;

    tx.commit().await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Invitation accepted",
        "event_id": event_id,
    })))
}

/// POST /api/events/{id}/invitations/refuse
pub async fn refuse_invitation(
    path: web::Path<Uuid>,
    actor: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let event_id = path.into_inner();

    let deleted = sqlx::query("DELETE FROM event_invitations WHERE event_id = $1 AND user_id = $2")
        .bind(event_id)
        .bind(actor.user_id)
        .execute(pool.get_ref())
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::not_found("Invitation"));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Invitation refused",
        "event_id": event_id,
    })))
}
