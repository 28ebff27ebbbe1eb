use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::Local;
use password_hash::SaltString;
use rand_core::OsRng;
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::error::{Error, Result};
use crate::models::User;

pub const SESSION_COOKIE: &str = "session";

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Creates a session row, keeps only the newest `keep` sessions and sets the cookie.
pub fn start_session(
    conn: &Connection,
    cookies: &CookieJar<'_>,
    user_id: i64,
    keep: i64,
) -> Result<()> {
    let token = Uuid::new_v4().to_string();
    let created_at = Local::now().to_rfc3339();
    db::create_session(conn, user_id, &token, &created_at)?;
    db::prune_sessions(conn, user_id, keep)?;

    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookies.add(cookie);
    Ok(())
}

pub fn end_session(pool: &DbPool, cookies: &CookieJar<'_>) {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        if let Ok(conn) = pool.get() {
            let _ = db::delete_session(&conn, cookie.value());
        }
    }
    cookies.remove(Cookie::build(SESSION_COOKIE).path("/"));
}

pub fn current_user(pool: &DbPool, cookies: &CookieJar<'_>) -> Option<User> {
    let conn = pool.get().ok()?;
    let token = cookies.get(SESSION_COOKIE)?.value().to_string();
    db::user_by_session(&conn, &token).ok().flatten()
}

/// The logged-in user, or `Error::Unauthorized` which redirects to the login page.
pub fn require_user(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<User> {
    let Some(cookie) = cookies.get(SESSION_COOKIE) else {
        return Err(Error::Unauthorized);
    };
    let conn = pool.get()?;
    db::user_by_session(&conn, cookie.value())?.ok_or(Error::Unauthorized)
}
