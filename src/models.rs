/// Database rows and their public JSON shapes
///
/// Rows carrying secrets (`User::password_hash`) are never `Serialize`;
/// handlers convert them to a response type first.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Credential record plus profile
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub age: Option<i32>,
    pub city: Option<String>,
    pub level: i32,
    pub experience: i32,
    pub is_admin: bool,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub password_hash: String,
    pub age: Option<i32>,
    pub city: Option<String>,
}

impl NewUser {
    pub fn into_user(self, id: Uuid) -> User {
        let now = Utc::now();
        User {
            id,
            email: self.email,
            firstname: self.firstname,
            lastname: self.lastname,
            age: self.age,
            city: self.city,
            level: 0,
            experience: 0,
            is_admin: false,
            password_hash: self.password_hash,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub age: Option<i32>,
    pub city: Option<String>,
    pub level: i32,
    pub experience: i32,
    pub is_admin: bool,
    pub created_at: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            firstname: user.firstname.clone(),
            lastname: user.lastname.clone(),
            age: user.age,
            city: user.city.clone(),
            level: user.level,
            experience: user.experience,
            is_admin: user.is_admin,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// Another user as seen in lists (friends, participants): no email
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserSummary {
    pub id: Uuid,
    pub firstname: String,
    pub lastname: String,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Category {
    pub id: Uuid,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub hour: NaiveTime,
    pub location: String,
    pub organizer_id: Uuid,
    pub category_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
