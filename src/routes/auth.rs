/// Authentication Routes
///
/// Handles signup, login, logout and current user information.
/// Session tokens travel in HttpOnly cookies, never in response bodies.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditAction, AuditLog};
use crate::auth::cookies::{
    access_cookie, refresh_cookie, refresh_token_from, removal_cookie, ACCESS_TOKEN_COOKIE,
    REFRESH_TOKEN_COOKIE,
};
use crate::auth::{
    hash_password, validate_password_strength, verify_against_dummy, verify_password,
    AuthenticatedUser, CredentialStore, TokenKind, TokenService,
};
use crate::configuration::ApplicationSettings;
use crate::error::{AppError, AuthError, ErrorContext, ValidationError};
use crate::models::{NewUser, UserResponse};
use crate::validators::{is_valid_email, is_valid_name, is_valid_text};

/// User registration request
///
/// Every field is optional at the wire level so that all missing fields can
/// be reported at once.
#[derive(Deserialize, Default)]
pub struct SignupRequest {
    pub email: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub password: Option<String>,
    pub confirmation: Option<String>,
    pub age: Option<i32>,
    pub city: Option<String>,
}

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user: UserResponse,
    pub token_type: String,
    pub expires_in: i64,
}

/// Signup fields that passed validation, password still in clear
#[derive(Debug)]
struct ValidSignup {
    email: String,
    firstname: String,
    lastname: String,
    password: String,
    age: Option<i32>,
    city: Option<String>,
}

fn required<'a>(field: &str, value: &'a Option<String>, errors: &mut Vec<String>) -> Option<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => value.as_deref(),
        _ => {
            errors.push(format!("{} is required", field));
            None
        }
    }
}

/// Check every signup field, collecting all problems
fn validate_signup(form: &SignupRequest) -> Result<ValidSignup, Vec<String>> {
    let mut errors = Vec::new();

    let email = required("email", &form.email, &mut errors);
    let firstname = required("firstname", &form.firstname, &mut errors);
    let lastname = required("lastname", &form.lastname, &mut errors);
    let password = required("password", &form.password, &mut errors);
    let confirmation = required("confirmation", &form.confirmation, &mut errors);

    let email = email.and_then(|e| is_valid_email(e).map_err(|e| errors.push(e.to_string())).ok());
    let firstname = firstname
        .and_then(|n| is_valid_name("firstname", n).map_err(|e| errors.push(e.to_string())).ok());
    let lastname = lastname
        .and_then(|n| is_valid_name("lastname", n).map_err(|e| errors.push(e.to_string())).ok());

    if let Some(p) = password {
        if let Err(e) = validate_password_strength(p) {
            errors.push(e.to_string());
        }
        if matches!(confirmation, Some(c) if c != p) {
            errors.push("password and confirmation do not match".to_string());
        }
    }

    if matches!(form.age, Some(age) if !(0..=150).contains(&age)) {
        errors.push("age must be between 0 and 150".to_string());
    }

    let city = match form.city.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => is_valid_text("city", c, 100)
            .map_err(|e| errors.push(e.to_string()))
            .ok(),
        _ => None,
    };

    match (email, firstname, lastname, password) {
        (Some(email), Some(firstname), Some(lastname), Some(password)) if errors.is_empty() => {
            Ok(ValidSignup {
                email,
                firstname,
                lastname,
                password: password.to_string(),
                age: form.age,
                city,
            })
        }
        _ => Err(errors),
    }
}

/// POST /auth/signup
///
/// # Errors
/// - 400: Every validation problem found, listed in `details`
/// - 409: Email registered concurrently with this request
pub async fn signup(
    form: web::Json<SignupRequest>,
    store: web::Data<dyn CredentialStore>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_signup");

    let (signup, mut errors) = match validate_signup(&form) {
        Ok(signup) => (Some(signup), Vec::new()),
        Err(errors) => (None, errors),
    };

    if let Some(email) = form.email.as_deref().and_then(|e| is_valid_email(e).ok()) {
        if store.find_by_email(&email).await?.is_some() {
            AuditLog::failure(AuditAction::Signup, "Email already used").record();
            errors.push("email is already used".to_string());
        }
    }

    let signup = match signup {
        Some(signup) if errors.is_empty() => signup,
        _ => return Err(ValidationError::Multiple(errors).into()),
    };

    let password_hash = hash_password(&signup.password)?;

    let user = store
        .insert(NewUser {
            email: signup.email,
            firstname: signup.firstname,
            lastname: signup.lastname,
            password_hash,
            age: signup.age,
            city: signup.city,
        })
        .await?;

    AuditLog::success(AuditAction::Signup, "User registered")
        .with_user_id(user.id)
        .record();
    tracing::info!(
        request_id = %context.request_id,
        user_id = %user.id,
        "User registered successfully"
    );

    Ok(HttpResponse::Created().json(UserResponse::from(&user)))
}

/// POST /auth/login
///
/// Sets the access and refresh cookies on success.
///
/// # Errors
/// - 400: Malformed email
/// - 401: Unknown email or wrong password (same response for both)
pub async fn login(
    form: web::Json<LoginRequest>,
    store: web::Data<dyn CredentialStore>,
    tokens: web::Data<TokenService>,
    app: web::Data<ApplicationSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");
    let email = is_valid_email(&form.email)?;

    let user = match store.find_by_email(&email).await? {
        Some(user) if verify_password(&form.password, &user.password_hash)? => user,
        Some(user) => {
            AuditLog::failure(AuditAction::Login, "Wrong password")
                .with_user_id(user.id)
                .record();
            return Err(AuthError::InvalidCredentials.into());
        }
        None => {
            verify_against_dummy(&form.password);
            AuditLog::failure(AuditAction::Login, "Unknown email").record();
            return Err(AuthError::InvalidCredentials.into());
        }
    };

    let access_token = tokens.issue(user.id, TokenKind::Access)?;
    let refresh_token = tokens.issue(user.id, TokenKind::Refresh)?;
    let access_expiry = tokens.expiry_seconds(TokenKind::Access);

    AuditLog::success(AuditAction::Login, "User logged in")
        .with_user_id(user.id)
        .record();
    tracing::info!(
        request_id = %context.request_id,
        user_id = %user.id,
        "User logged in successfully"
    );

    Ok(HttpResponse::Ok()
        .cookie(access_cookie(access_token, access_expiry, app.secure_cookies))
        .cookie(refresh_cookie(
            refresh_token,
            tokens.expiry_seconds(TokenKind::Refresh),
            app.secure_cookies,
        ))
        .json(LoginResponse {
            user: UserResponse::from(&user),
            token_type: "Bearer".to_string(),
            expires_in: access_expiry,
        }))
}

/// POST /auth/logout
///
/// Revokes the presented refresh token when it is still valid and clears
/// both cookies. Always succeeds.
pub async fn logout(
    req: HttpRequest,
    store: web::Data<dyn CredentialStore>,
    tokens: web::Data<TokenService>,
    app: web::Data<ApplicationSettings>,
) -> Result<HttpResponse, AppError> {
    if let Some(token) = refresh_token_from(&req) {
        match tokens.verify(&token, TokenKind::Refresh) {
            Ok(claims) => {
                store
                    .revoke_refresh_token(&token, claims.user_id(), claims.expires_at())
                    .await?;
                AuditLog::success(AuditAction::Logout, "Refresh token revoked")
                    .with_user_id(claims.user_id())
                    .record();
            }
            Err(e) => {
                tracing::debug!(reason = %e, "Logout with unusable refresh token");
            }
        }
    }

    Ok(HttpResponse::Ok()
        .cookie(removal_cookie(ACCESS_TOKEN_COOKIE, app.secure_cookies))
        .cookie(removal_cookie(REFRESH_TOKEN_COOKIE, app.secure_cookies))
        .json(serde_json::json!({ "message": "Logged out" })))
}

/// GET /api/me
///
/// # Errors
/// - 404: Account deleted after the access token was issued
pub async fn current_user(
    user: web::ReqData<AuthenticatedUser>,
    store: web::Data<dyn CredentialStore>,
) -> Result<HttpResponse, AppError> {
    let user = store
        .find_by_id(user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    Ok(HttpResponse::Ok().json(UserResponse::from(&user)))
}
