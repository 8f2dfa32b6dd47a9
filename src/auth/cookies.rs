//! Session cookies carrying the access and refresh tokens.

use actix_web::cookie::{time::Duration, Cookie, SameSite};
use actix_web::HttpRequest;

pub const ACCESS_TOKEN_COOKIE: &str = "token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

fn session_cookie(name: &'static str, value: String, max_age_seconds: i64, secure: bool) -> Cookie<'static> {
    Cookie::build(name, value)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(Duration::seconds(max_age_seconds))
        .finish()
}

pub fn access_cookie(token: String, max_age_seconds: i64, secure: bool) -> Cookie<'static> {
    session_cookie(ACCESS_TOKEN_COOKIE, token, max_age_seconds, secure)
}

pub fn refresh_cookie(token: String, max_age_seconds: i64, secure: bool) -> Cookie<'static> {
    session_cookie(REFRESH_TOKEN_COOKIE, token, max_age_seconds, secure)
}

/// Expired cookie instructing the client to drop `name`
pub fn removal_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = session_cookie(name, String::new(), 0, secure);
    cookie.make_removal();
    cookie
}

/// Refresh token presented by the client, if any
pub fn refresh_token_from(req: &HttpRequest) -> Option<String> {
    req.cookie(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
