//! User account models.

use super::{
    normalize_email, normalize_phone, optional_text, required_text, validate_password,
    AccountStatus,
};
use crate::errors::ClinicError;
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::types::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Database row for a user. Holds the password hash, so it is never
/// serialized directly.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub clinic_id: Option<Uuid>,
    pub role: String,
    pub status: AccountStatus,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    /// Parsed role. The column is CHECK-constrained, so failure means the
    /// schema and code disagree.
    pub fn role(&self) -> Result<Role, ClinicError> {
        self.role
            .parse()
            .map_err(|e| ClinicError::Internal(format!("user {}: {e}", self.user_id)))
    }
}

/// User as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub clinic_id: Option<Uuid>,
    pub role: Role,
    pub status: AccountStatus,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserResponse {
    type Error = ClinicError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserResponse {
            role: row.role()?,
            user_id: row.user_id,
            clinic_id: row.clinic_id,
            status: row.status,
            full_name: row.full_name,
            email: row.email,
            phone: row.phone,
            created_at: row.created_at,
        })
    }
}

/// Staff or doctor account fields, before hashing.
#[derive(Debug)]
pub struct NewStaffAccount {
    pub role: Role,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: SecretString,
}

fn staff_role(role: Role) -> Result<Role, ClinicError> {
    match role {
        Role::Staff | Role::Doctor => Ok(role),
        _ => Err(ClinicError::BadRequest(
            "role must be staff or doctor".to_string(),
        )),
    }
}

/// Self-registration of staff or doctors to an active clinic.
#[derive(Debug, Deserialize)]
pub struct SelfRegisterRequest {
    pub clinic_id: Uuid,
    pub role: Role,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: SecretString,
}

impl SelfRegisterRequest {
    pub fn validate(self) -> Result<(Uuid, NewStaffAccount), ClinicError> {
        let account = CreateStaffRequest {
            role: self.role,
            full_name: self.full_name,
            email: self.email,
            phone: self.phone,
            password: self.password,
        }
        .validate()?;
        Ok((self.clinic_id, account))
    }
}

/// Account created by a clinic admin; approved immediately.
#[derive(Debug, Deserialize)]
pub struct CreateStaffRequest {
    pub role: Role,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: SecretString,
}

impl CreateStaffRequest {
    pub fn validate(self) -> Result<NewStaffAccount, ClinicError> {
        validate_password(self.password.expose_secret())?;
        let phone = match optional_text("phone", self.phone.as_deref(), 32)? {
            Some(p) => Some(normalize_phone(&p)?),
            None => None,
        };

        Ok(NewStaffAccount {
            role: staff_role(self.role)?,
            full_name: required_text("full_name", &self.full_name, 200)?,
            email: normalize_email(&self.email)?,
            phone,
            password: self.password,
        })
    }
}

/// Filters for the clinic admin user list.
#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub status: Option<AccountStatus>,
    pub role: Option<Role>,
}

/// Query for the public doctor directory.
#[derive(Debug, Deserialize)]
pub struct DoctorsQuery {
    pub clinic_id: Uuid,
}

/// Doctor entry in the public directory.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DoctorSummary {
    pub user_id: Uuid,
    pub full_name: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn staff_request(role: Role) -> CreateStaffRequest {
        CreateStaffRequest {
            role,
            full_name: " Dr. Grey ".to_string(),
            email: "Grey@Clinic.Test".to_string(),
            phone: Some("".to_string()),
            password: SecretString::from("seattle-grace"),
        }
    }

    #[test]
    fn test_create_staff_normalizes() {
        let account = staff_request(Role::Doctor).validate().unwrap();
        assert_eq!(account.role, Role::Doctor);
        assert_eq!(account.full_name, "Dr. Grey");
        assert_eq!(account.email, "grey@clinic.test");
        assert_eq!(account.phone, None);
    }

    #[test]
    fn test_create_staff_rejects_other_roles() {
        for role in [Role::Patient, Role::ClinicAdmin, Role::SuperAdmin] {
            assert!(matches!(
                staff_request(role).validate(),
                Err(ClinicError::BadRequest(_))
            ));
        }
    }

    #[test]
    fn test_user_response_hides_password_hash() {
        let row = UserRow {
            user_id: Uuid::new_v4(),
            clinic_id: Some(Uuid::new_v4()),
            role: "staff".to_string(),
            status: AccountStatus::Approved,
            full_name: "Sam".to_string(),
            email: Some("sam@clinic.test".to_string()),
            phone: None,
            password_hash: Some("$2b$12$abcdefghijklmnopqrstuv".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let response = UserResponse::try_from(row).unwrap();
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("$2b$"));
        assert!(json.contains("\"role\":\"staff\""));
    }

    #[test]
    fn test_user_row_unknown_role_is_internal() {
        let row = UserRow {
            user_id: Uuid::new_v4(),
            clinic_id: None,
            role: "janitor".to_string(),
            status: AccountStatus::Approved,
            full_name: "X".to_string(),
            email: None,
            phone: Some("+15550100".to_string()),
            password_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(matches!(row.role(), Err(ClinicError::Internal(_))));
    }
}
