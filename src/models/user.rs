use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Full user row. `password_hash` never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub department_id: Option<i64>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User joined with its department, as returned by `/me`, `/login` and `/users`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserWithDepartment {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub department_id: Option<i64>,
    pub department_name: Option<String>,
    pub department_color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Department {
    pub id: i64,
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepartmentRef {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPayload {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub department: DepartmentRef,
}

impl From<UserWithDepartment> for UserPayload {
    fn from(u: UserWithDepartment) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            is_admin: u.is_admin,
            department: DepartmentRef {
                id: u.department_id,
                name: u.department_name,
                color: u.department_color,
            },
        }
    }
}

/// Minimal identity used in embedded summaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRef {
    pub id: i64,
    pub name: String,
    pub email: String,
}

pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub department_id: Option<i64>,
    pub is_admin: bool,
}
