//! User accounts: patients, staff, doctors and admins.

use super::{conflict_on_unique, timed};
use crate::errors::ClinicError;
use crate::models::{AccountStatus, DoctorSummary, NotificationChannel, UserRow};
use common::types::Role;
use sqlx::{PgExecutor, PgPool};
use tracing::instrument;
use uuid::Uuid;

const USER_COLUMNS: &str = "user_id, clinic_id, role, status, full_name, email, phone, \
                            password_hash, created_at, updated_at";

const DUPLICATE_ACCOUNT: &str = "An account with this email or phone already exists";

/// Fields for a new account.
#[derive(Debug)]
pub struct NewUser<'a> {
    pub clinic_id: Option<Uuid>,
    pub role: Role,
    pub status: AccountStatus,
    pub full_name: &'a str,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub password_hash: Option<&'a str>,
}

pub struct UsersRepository;

impl UsersRepository {
    #[instrument(skip_all, name = "clinic.repo.users.create")]
    pub async fn create(
        executor: impl PgExecutor<'_>,
        user: &NewUser<'_>,
    ) -> Result<UserRow, ClinicError> {
        let sql = format!(
            "INSERT INTO users (clinic_id, role, status, full_name, email, phone, password_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {USER_COLUMNS}"
        );

        timed(
            "create_user",
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(user.clinic_id)
                .bind(user.role.as_str())
                .bind(user.status)
                .bind(user.full_name)
                .bind(user.email)
                .bind(user.phone)
                .bind(user.password_hash)
                .fetch_one(executor),
        )
        .await
        .map_err(conflict_on_unique(DUPLICATE_ACCOUNT))
    }

    #[instrument(skip_all, name = "clinic.repo.users.find")]
    pub async fn find_by_id(
        executor: impl PgExecutor<'_>,
        user_id: Uuid,
    ) -> Result<Option<UserRow>, ClinicError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1");
        Ok(timed(
            "find_user",
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(user_id)
                .fetch_optional(executor),
        )
        .await?)
    }

    /// Every user in `user_ids` that exists, in no particular order.
    #[instrument(skip_all, name = "clinic.repo.users.find_many")]
    pub async fn find_many(
        executor: impl PgExecutor<'_>,
        user_ids: &[Uuid],
    ) -> Result<Vec<UserRow>, ClinicError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ANY($1)");
        Ok(timed(
            "find_users",
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(user_ids)
                .fetch_all(executor),
        )
        .await?)
    }

    /// A user of a specific clinic, optionally restricted to one role.
    #[instrument(skip_all, name = "clinic.repo.users.find_in_clinic")]
    pub async fn find_in_clinic(
        executor: impl PgExecutor<'_>,
        clinic_id: Uuid,
        user_id: Uuid,
        role: Option<Role>,
    ) -> Result<Option<UserRow>, ClinicError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE user_id = $1 AND clinic_id = $2 AND ($3::TEXT IS NULL OR role = $3)"
        );
        Ok(timed(
            "find_user_in_clinic",
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(user_id)
                .bind(clinic_id)
                .bind(role.map(|r| r.as_str()))
                .fetch_optional(executor),
        )
        .await?)
    }

    /// Staff, doctor or admin account by email (case-insensitive).
    #[instrument(skip_all, name = "clinic.repo.users.find_by_email")]
    pub async fn find_login_by_email(
        pool: &PgPool,
        email: &str,
    ) -> Result<Option<UserRow>, ClinicError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE LOWER(email) = LOWER($1) AND role <> 'patient'"
        );
        Ok(timed(
            "find_user_by_email",
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(email)
                .fetch_optional(pool),
        )
        .await?)
    }

    /// Patient of a clinic by phone or email, depending on the OTP channel.
    #[instrument(skip_all, name = "clinic.repo.users.find_patient")]
    pub async fn find_patient(
        pool: &PgPool,
        clinic_id: Uuid,
        channel: NotificationChannel,
        identifier: &str,
    ) -> Result<Option<UserRow>, ClinicError> {
        let predicate = match channel {
            NotificationChannel::Sms => "phone = $2",
            NotificationChannel::Email => "LOWER(email) = LOWER($2)",
        };
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE clinic_id = $1 AND role = 'patient' AND {predicate}"
        );
        Ok(timed(
            "find_patient",
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(clinic_id)
                .bind(identifier)
                .fetch_optional(pool),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.users.list")]
    pub async fn list_for_clinic(
        pool: &PgPool,
        clinic_id: Uuid,
        status: Option<AccountStatus>,
        role: Option<Role>,
    ) -> Result<Vec<UserRow>, ClinicError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE clinic_id = $1 \
               AND ($2::TEXT IS NULL OR status = $2) \
               AND ($3::TEXT IS NULL OR role = $3) \
             ORDER BY created_at DESC"
        );
        Ok(timed(
            "list_users",
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(clinic_id)
                .bind(status.map(|s| s.as_str()))
                .bind(role.map(|r| r.as_str()))
                .fetch_all(pool),
        )
        .await?)
    }

    /// Approve or reject a pending account of the clinic.
    ///
    /// Returns `None` if the user does not exist in the clinic or is not pending.
    #[instrument(skip_all, name = "clinic.repo.users.decide")]
    pub async fn decide_pending(
        pool: &PgPool,
        clinic_id: Uuid,
        user_id: Uuid,
        status: AccountStatus,
    ) -> Result<Option<UserRow>, ClinicError> {
        let sql = format!(
            "UPDATE users SET status = $3, updated_at = NOW() \
             WHERE user_id = $1 AND clinic_id = $2 AND status = 'pending' \
               AND role <> 'patient' \
             RETURNING {USER_COLUMNS}"
        );
        Ok(timed(
            "decide_pending_user",
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(user_id)
                .bind(clinic_id)
                .bind(status)
                .fetch_optional(pool),
        )
        .await?)
    }

    /// Approve every pending clinic admin of a clinic.
    #[instrument(skip_all, name = "clinic.repo.users.approve_admins")]
    pub async fn approve_pending_admins(
        executor: impl PgExecutor<'_>,
        clinic_id: Uuid,
    ) -> Result<Vec<UserRow>, ClinicError> {
        let sql = format!(
            "UPDATE users SET status = 'approved', updated_at = NOW() \
             WHERE clinic_id = $1 AND role = 'clinic_admin' AND status = 'pending' \
             RETURNING {USER_COLUMNS}"
        );
        Ok(timed(
            "approve_pending_admins",
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(clinic_id)
                .fetch_all(executor),
        )
        .await?)
    }

    /// Approved doctors of a clinic, by name.
    #[instrument(skip_all, name = "clinic.repo.users.doctors")]
    pub async fn list_doctors(
        pool: &PgPool,
        clinic_id: Uuid,
    ) -> Result<Vec<DoctorSummary>, ClinicError> {
        Ok(timed(
            "list_doctors",
            sqlx::query_as::<_, DoctorSummary>(
                r#"
                SELECT user_id, full_name
                FROM users
                WHERE clinic_id = $1 AND role = 'doctor' AND status = 'approved'
                ORDER BY full_name
                "#,
            )
            .bind(clinic_id)
            .fetch_all(pool),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.users.exists_super_admin")]
    pub async fn super_admin_exists(pool: &PgPool) -> Result<bool, ClinicError> {
        Ok(timed(
            "super_admin_exists",
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM users WHERE role = 'super_admin')",
            )
            .fetch_one(pool),
        )
        .await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn seed_clinic(pool: &PgPool) -> Uuid {
        sqlx::query_scalar(
            r#"
            INSERT INTO clinics (name, address, phone, email, latitude, longitude,
                                 opening_time, closing_time, avg_consultation_minutes, status)
            VALUES ('North', '1 Main St', '+15550100', 'north@clinic.test', 10, 10,
                    '08:00', '18:00', 10, 'active')
            RETURNING clinic_id
            "#,
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    fn staff<'a>(clinic_id: Uuid, email: &'a str) -> NewUser<'a> {
        NewUser {
            clinic_id: Some(clinic_id),
            role: Role::Staff,
            status: AccountStatus::Pending,
            full_name: "Front Desk",
            email: Some(email),
            phone: None,
            password_hash: Some("$2b$04$hash"),
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_create_and_find(pool: PgPool) {
        let clinic_id = seed_clinic(&pool).await;
        let user = UsersRepository::create(&pool, &staff(clinic_id, "desk@clinic.test"))
            .await
            .unwrap();

        assert_eq!(user.role().unwrap(), Role::Staff);
        assert_eq!(user.status, AccountStatus::Pending);

        let found = UsersRepository::find_login_by_email(&pool, "DESK@clinic.test")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.user_id, user.user_id);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_duplicate_staff_email_conflicts(pool: PgPool) {
        let clinic_id = seed_clinic(&pool).await;
        UsersRepository::create(&pool, &staff(clinic_id, "dup@clinic.test"))
            .await
            .unwrap();
        let err = UsersRepository::create(&pool, &staff(clinic_id, "Dup@Clinic.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClinicError::Conflict(_)));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_decide_only_pending(pool: PgPool) {
        let clinic_id = seed_clinic(&pool).await;
        let user = UsersRepository::create(&pool, &staff(clinic_id, "p@clinic.test"))
            .await
            .unwrap();

        let approved =
            UsersRepository::decide_pending(&pool, clinic_id, user.user_id, AccountStatus::Approved)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(approved.status, AccountStatus::Approved);

        let again =
            UsersRepository::decide_pending(&pool, clinic_id, user.user_id, AccountStatus::Rejected)
                .await
                .unwrap();
        assert!(again.is_none());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_find_patient_by_channel(pool: PgPool) {
        let clinic_id = seed_clinic(&pool).await;
        UsersRepository::create(
            &pool,
            &NewUser {
                clinic_id: Some(clinic_id),
                role: Role::Patient,
                status: AccountStatus::Approved,
                full_name: "Pat",
                email: Some("pat@mail.test"),
                phone: Some("+15550199"),
                password_hash: None,
            },
        )
        .await
        .unwrap();

        let by_phone =
            UsersRepository::find_patient(&pool, clinic_id, NotificationChannel::Sms, "+15550199")
                .await
                .unwrap();
        assert!(by_phone.is_some());

        let by_email = UsersRepository::find_patient(
            &pool,
            clinic_id,
            NotificationChannel::Email,
            "PAT@mail.test",
        )
        .await
        .unwrap();
        assert!(by_email.is_some());

        let other_clinic = UsersRepository::find_patient(
            &pool,
            Uuid::new_v4(),
            NotificationChannel::Sms,
            "+15550199",
        )
        .await
        .unwrap();
        assert!(other_clinic.is_none());
    }
}
