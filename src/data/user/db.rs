use chrono::Utc;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};
use utoipa::ToSchema;

use super::User;
use crate::db::{is_foreign_key_violation, unique_violation_on, Db};
use crate::middleware::paging::Paging;
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::util::patch_field;
use crate::validate::Violations;

const USER_COLUMNS: &str =
    "id, name, email, email_verified, image, image_ref, role, created_at, updated_at";

pub mod problem {
    use crate::resp::problem::{problems, Problem};

    #[inline]
    pub fn not_found(id: &str) -> Problem {
        problems::not_found("user").insert_str("id", id).take()
    }

    #[inline]
    pub fn id_taken(id: &str) -> Problem {
        problems::conflict("a user with this id already exists")
            .insert_str("id", id)
            .take()
    }

    #[inline]
    pub fn email_taken(email: &str) -> Problem {
        problems::conflict("a user with this email already exists")
            .insert_str("email", email)
            .take()
    }

    #[inline]
    pub fn teaches_classes(id: &str) -> Problem {
        problems::conflict("user still teaches classes and cannot be deleted")
            .insert_str("id", id)
            .take()
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserCreateData {
    /// Externally issued identity id, e.g. `user_t1`.
    pub id: String,
    pub name: String,
    #[schema(format = "email")]
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl UserCreateData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut violations = Violations::new();
        violations.require_non_empty("id", &self.id);
        violations.require_non_empty("name", &self.name);
        violations.require_non_empty("email", &self.email);
        if !self.email.trim().is_empty() && !self.email.contains('@') {
            violations.push("email", "must be a valid e-mail address");
        }
        violations.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdateData {
    pub name: Option<String>,
    #[schema(format = "email")]
    pub email: Option<String>,
    pub role: Option<Role>,
    pub email_verified: Option<bool>,
    /// Absent field keeps the stored value, explicit `null` clears it.
    #[serde(default, deserialize_with = "patch_field")]
    #[schema(value_type = Option<String>)]
    pub image: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_field")]
    #[schema(value_type = Option<String>)]
    pub image_ref: Option<Option<String>>,
}

impl UserUpdateData {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.role.is_none()
            && self.email_verified.is_none()
            && self.image.is_none()
            && self.image_ref.is_none()
    }

    pub fn validate(&self) -> Result<(), Problem> {
        let mut violations = Violations::new();
        if self.is_empty() {
            violations.push("body", "must contain at least one updatable field");
        }
        violations.require_non_empty_opt("name", self.name.as_deref());
        violations.require_non_empty_opt("email", self.email.as_deref());
        if let Some(email) = &self.email {
            if !email.trim().is_empty() && !email.contains('@') {
                violations.push("email", "must be a valid e-mail address");
            }
        }
        violations.finish()
    }
}

/// Filters of the user listing; `search` matches name or email.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub search: Option<String>,
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter) {
    query.push(" WHERE 1 = 1");

    if let Some(role) = filter.role {
        query.push(" AND role = ").push_bind(role);
    }

    if let Some(search) = &filter.search {
        query
            .push(" AND (LOWER(name) LIKE '%' || LOWER(")
            .push_bind(search.clone())
            .push(") || '%' OR LOWER(email) LIKE '%' || LOWER(")
            .push_bind(search.clone())
            .push(") || '%')");
    }
}

#[allow(async_fn_in_trait)]
pub trait UserDbExt {
    async fn get_user(&self, id: &str) -> Result<Option<User>, Problem>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Problem>;

    /// Returns one page of users plus the total count under the same filter.
    async fn list_users(
        &self,
        filter: &UserFilter,
        paging: Paging,
    ) -> Result<(Vec<User>, i64), Problem>;

    async fn create_user(&self, data: UserCreateData) -> Result<User, Problem>;

    async fn update_user(&self, id: &str, data: UserUpdateData) -> Result<User, Problem>;

    async fn delete_user(&self, id: &str) -> Result<(), Problem>;
}

impl UserDbExt for Db {
    async fn get_user(&self, id: &str) -> Result<Option<User>, Problem> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(Problem::from)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Problem> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(self.pool())
            .await
            .map_err(Problem::from)
    }

    async fn list_users(
        &self,
        filter: &UserFilter,
        paging: Paging,
    ) -> Result<(Vec<User>, i64), Problem> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users");
        push_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(Problem::from)?;

        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filters(&mut query, filter);
        query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        query.push_bind(paging.limit());
        query.push(" OFFSET ");
        query.push_bind(paging.offset());

        let users = query
            .build_query_as::<User>()
            .fetch_all(self.pool())
            .await
            .map_err(Problem::from)?;

        Ok((users, total))
    }

    async fn create_user(&self, data: UserCreateData) -> Result<User, Problem> {
        if self.get_user(&data.id).await?.is_some() {
            return Err(problem::id_taken(&data.id));
        }
        if self.find_user_by_email(&data.email).await?.is_some() {
            return Err(problem::email_taken(&data.email));
        }

        let now = Utc::now();
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, name, email, email_verified, image, image_ref, role, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {USER_COLUMNS}"
        ))
        .bind(&data.id)
        .bind(&data.name)
        .bind(&data.email)
        .bind(data.email_verified)
        .bind(&data.image)
        .bind(&data.image_ref)
        .bind(data.role)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            // The unique index is the final authority; a race past the
            // advisory checks must map to the same conflict.
            if unique_violation_on(&e, "users.email") {
                problem::email_taken(&data.email)
            } else if unique_violation_on(&e, "users.id") {
                problem::id_taken(&data.id)
            } else {
                Problem::from(e)
            }
        })
    }

    async fn update_user(&self, id: &str, data: UserUpdateData) -> Result<User, Problem> {
        if self.get_user(id).await?.is_none() {
            return Err(problem::not_found(id));
        }

        if let Some(email) = &data.email {
            if let Some(existing) = self.find_user_by_email(email).await? {
                if existing.id != id {
                    return Err(problem::email_taken(email));
                }
            }
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE users SET ");
        let mut set = query.separated(", ");
        if let Some(name) = &data.name {
            set.push("name = ").push_bind_unseparated(name.clone());
        }
        if let Some(email) = &data.email {
            set.push("email = ").push_bind_unseparated(email.clone());
        }
        if let Some(role) = data.role {
            set.push("role = ").push_bind_unseparated(role);
        }
        if let Some(email_verified) = data.email_verified {
            set.push("email_verified = ")
                .push_bind_unseparated(email_verified);
        }
        if let Some(image) = &data.image {
            set.push("image = ").push_bind_unseparated(image.clone());
        }
        if let Some(image_ref) = &data.image_ref {
            set.push("image_ref = ")
                .push_bind_unseparated(image_ref.clone());
        }
        set.push("updated_at = ").push_bind_unseparated(Utc::now());

        query.push(" WHERE id = ").push_bind(id.to_owned());
        query.push(format!(" RETURNING {USER_COLUMNS}"));

        query
            .build_query_as::<User>()
            .fetch_optional(self.pool())
            .await
            .map_err(|e| {
                if unique_violation_on(&e, "users.email") {
                    problem::email_taken(data.email.as_deref().unwrap_or_default())
                } else {
                    Problem::from(e)
                }
            })?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn delete_user(&self, id: &str) -> Result<(), Problem> {
        let teaching: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classes WHERE teacher_id = ?")
            .bind(id)
            .fetch_one(self.pool())
            .await
            .map_err(Problem::from)?;
        if teaching > 0 {
            return Err(problem::teaches_classes(id));
        }

        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    problem::teaches_classes(id)
                } else {
                    Problem::from(e)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(problem::not_found(id));
        }
        Ok(())
    }
}
