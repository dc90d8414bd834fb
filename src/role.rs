use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    /// The user resource family is admin-only.
    pub fn can_manage_users(self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Department writes are admin-only; reads are open to every role.
    pub fn can_write_departments(self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Subject and class writes are allowed for admins and teachers.
    pub fn can_write_catalog(self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }

    /// Enrollment listing and administration is for admins and teachers;
    /// creating an enrollment (joining) is open to every authenticated role.
    pub fn can_manage_enrollments(self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Teacher => write!(f, "teacher"),
            Role::Student => write!(f, "student"),
        }
    }
}
