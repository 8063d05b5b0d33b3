//! Seeded tenants for integration tests.
//!
//! Rows are written through the service's own repositories so fixtures
//! always match the live schema.

use clinic_service::crypto::hash_secret;
use clinic_service::models::{AccountStatus, ClinicRow, ClinicStatus, NewClinic};
use clinic_service::repositories::users::NewUser;
use clinic_service::repositories::{ClinicsRepository, UsersRepository};
use chrono::NaiveTime;
use common::secret::SecretString;
use common::types::Role;
use sqlx::PgPool;
use uuid::Uuid;

/// Password shared by every seeded staff account.
pub const TEST_PASSWORD: &str = "correct-horse-battery";

/// Clinic location used by `TestClinic::seed`.
pub const CLINIC_LATITUDE: f64 = 12.9716;
pub const CLINIC_LONGITUDE: f64 = 77.5946;

/// Consultation length of the seeded clinic.
pub const CONSULTATION_MINUTES: i32 = 10;

/// A seeded account.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user_id: Uuid,
    pub clinic_id: Option<Uuid>,
    pub role: Role,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// An active clinic with one approved account per role.
#[derive(Debug, Clone)]
pub struct TestClinic {
    pub clinic: ClinicRow,
    pub admin: TestUser,
    pub doctor: TestUser,
    pub staff: TestUser,
    pub patient: TestUser,
}

impl TestClinic {
    pub fn id(&self) -> Uuid {
        self.clinic.clinic_id
    }

    /// Seed an active clinic open around the clock (UTC).
    ///
    /// Staff accounts log in with `TEST_PASSWORD`; the patient has both a
    /// phone number and an email address.
    pub async fn seed(pool: &PgPool) -> Result<Self, anyhow::Error> {
        let suffix = short_suffix();
        let clinic = NewClinic {
            name: format!("Test Clinic {suffix}"),
            address: "1 Test Street".to_string(),
            phone: format!("+1555{}", digits(&suffix)),
            email: format!("front-desk-{suffix}@clinic.test"),
            latitude: CLINIC_LATITUDE,
            longitude: CLINIC_LONGITUDE,
            opening_time: NaiveTime::default(),
            closing_time: NaiveTime::from_hms_opt(23, 59, 59)
                .ok_or_else(|| anyhow::anyhow!("invalid closing time"))?,
            avg_consultation_minutes: CONSULTATION_MINUTES,
        };
        let created = ClinicsRepository::create(pool, &clinic).await?;
        let clinic = ClinicsRepository::set_status(pool, created.clinic_id, ClinicStatus::Active)
            .await?
            .ok_or_else(|| anyhow::anyhow!("clinic disappeared while seeding"))?;

        let password_hash = hash_secret(&SecretString::from(TEST_PASSWORD), 4).await?;
        let clinic_id = clinic.clinic_id;

        let admin = seed_user(pool, clinic_id, Role::ClinicAdmin, "Ada Admin", Some(&password_hash))
            .await?;
        let doctor = seed_user(pool, clinic_id, Role::Doctor, "Dr. Grace", Some(&password_hash))
            .await?;
        let staff = seed_user(pool, clinic_id, Role::Staff, "Sam Staff", Some(&password_hash))
            .await?;
        let patient = seed_user(pool, clinic_id, Role::Patient, "Pat Patient", None).await?;

        Ok(Self {
            clinic,
            admin,
            doctor,
            staff,
            patient,
        })
    }

    /// Another approved patient in this clinic.
    pub async fn add_patient(&self, pool: &PgPool, full_name: &str) -> Result<TestUser, anyhow::Error> {
        seed_user(pool, self.id(), Role::Patient, full_name, None).await
    }

    /// Another approved doctor in this clinic.
    pub async fn add_doctor(&self, pool: &PgPool, full_name: &str) -> Result<TestUser, anyhow::Error> {
        seed_user(pool, self.id(), Role::Doctor, full_name, None).await
    }

    /// A patient with no contact details at all.
    pub async fn add_unreachable_patient(&self, pool: &PgPool) -> Result<TestUser, anyhow::Error> {
        insert_user(
            pool,
            NewUser {
                clinic_id: Some(self.id()),
                role: Role::Patient,
                status: AccountStatus::Approved,
                full_name: "Quiet Patient",
                email: None,
                phone: None,
                password_hash: None,
            },
        )
        .await
    }
}

/// A platform super admin, logging in with `TEST_PASSWORD`.
pub async fn seed_super_admin(pool: &PgPool) -> Result<TestUser, anyhow::Error> {
    let suffix = short_suffix();
    let email = format!("root-{suffix}@platform.test");
    let password_hash = hash_secret(&SecretString::from(TEST_PASSWORD), 4).await?;
    insert_user(
        pool,
        NewUser {
            clinic_id: None,
            role: Role::SuperAdmin,
            status: AccountStatus::Approved,
            full_name: "Platform Operator",
            email: Some(&email),
            phone: None,
            password_hash: Some(&password_hash),
        },
    )
    .await
}

async fn seed_user(
    pool: &PgPool,
    clinic_id: Uuid,
    role: Role,
    full_name: &str,
    password_hash: Option<&str>,
) -> Result<TestUser, anyhow::Error> {
    let suffix = short_suffix();
    let email = format!("{}-{suffix}@clinic.test", role.as_str());
    let phone = format!("+1444{}", digits(&suffix));
    insert_user(
        pool,
        NewUser {
            clinic_id: Some(clinic_id),
            role,
            status: AccountStatus::Approved,
            full_name,
            email: Some(&email),
            phone: Some(&phone),
            password_hash,
        },
    )
    .await
}

async fn insert_user(pool: &PgPool, user: NewUser<'_>) -> Result<TestUser, anyhow::Error> {
    let row = UsersRepository::create(pool, &user).await?;
    Ok(TestUser {
        user_id: row.user_id,
        clinic_id: row.clinic_id,
        role: user.role,
        full_name: row.full_name,
        email: row.email,
        phone: row.phone,
    })
}

fn short_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Seven digits derived from a hex suffix, for unique phone numbers.
fn digits(suffix: &str) -> String {
    suffix
        .bytes()
        .map(|b| char::from(b'0' + b % 10))
        .take(7)
        .collect()
}
