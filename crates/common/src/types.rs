//! Common data types for clinic components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a clinic (tenant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClinicId(pub Uuid);

impl ClinicId {
    /// Create a new random clinic ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClinicId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClinicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a user (patient, staff, doctor or admin)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Create a new random user ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Role of an account.
///
/// Stored as lowercase text in the database and in access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Patient using the portal.
    Patient,
    /// Reception / front-desk staff.
    Staff,
    /// Doctor owning a daily queue.
    Doctor,
    /// Administrator of a single clinic.
    ClinicAdmin,
    /// Platform operator; not bound to a clinic.
    SuperAdmin,
}

impl Role {
    /// Returns the string representation used in storage and tokens.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Staff => "staff",
            Role::Doctor => "doctor",
            Role::ClinicAdmin => "clinic_admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Whether this role works at the clinic (as opposed to being a patient).
    #[must_use]
    pub fn is_clinic_member(&self) -> bool {
        matches!(self, Role::Staff | Role::Doctor | Role::ClinicAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Role::Patient),
            "staff" => Ok(Role::Staff),
            "doctor" => Ok(Role::Doctor),
            "clinic_admin" => Ok(Role::ClinicAdmin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [
            Role::Patient,
            Role::Staff,
            Role::Doctor,
            Role::ClinicAdmin,
            Role::SuperAdmin,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_role_rejects_unknown() {
        let err = "nurse".parse::<Role>().unwrap_err();
        assert_eq!(err, UnknownRole("nurse".to_string()));
    }

    #[test]
    fn test_role_serde_matches_as_str() {
        let json = serde_json::to_string(&Role::ClinicAdmin).unwrap();
        assert_eq!(json, "\"clinic_admin\"");
    }

    #[test]
    fn test_clinic_members() {
        assert!(Role::Staff.is_clinic_member());
        assert!(Role::Doctor.is_clinic_member());
        assert!(Role::ClinicAdmin.is_clinic_member());
        assert!(!Role::Patient.is_clinic_member());
        assert!(!Role::SuperAdmin.is_clinic_member());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ClinicId::new(), ClinicId::new());
        assert_ne!(UserId::new(), UserId::new());
    }
}
