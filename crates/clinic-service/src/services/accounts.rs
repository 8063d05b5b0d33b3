//! Account lifecycle: clinic registration, staff accounts, password login.

use crate::crypto::{self, TokenSigner};
use crate::errors::ClinicError;
use crate::models::{
    AccountStatus, ClinicRegistrationResponse, ClinicRow, ClinicStatus, NewClinic,
    NewClinicAdmin, NewStaffAccount, TokenResponse, UserResponse, UserRow,
};
use crate::observability::hash_for_correlation;
use crate::repositories::users::NewUser;
use crate::repositories::{ClinicsRepository, UsersRepository};
use crate::services::notifier::{notify_best_effort, Notification, Notifier};
use common::secret::SecretString;
use common::types::Role;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Verified when no account matches so both paths cost one bcrypt check.
const DUMMY_PASSWORD_HASH: &str = "$2b$12$LQv3c1yqBWVHxkd0LHAkCOYz6TtxMQJqhN8/LewY5GyYqExt7YD3a";

/// Build the login response for an account.
pub fn token_response(signer: &TokenSigner, user: UserRow) -> Result<TokenResponse, ClinicError> {
    let role = user.role()?;
    let access_token = signer.issue(user.user_id, user.clinic_id, role)?;
    Ok(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: signer.ttl_seconds(),
        user: UserResponse::try_from(user)?,
    })
}

/// Create a pending clinic and its pending admin in one transaction.
#[instrument(skip_all, name = "clinic.accounts.register_clinic")]
pub async fn register_clinic(
    pool: &PgPool,
    clinic: &NewClinic,
    admin: &NewClinicAdmin,
    bcrypt_cost: u32,
) -> Result<ClinicRegistrationResponse, ClinicError> {
    let password_hash = crypto::hash_secret(&admin.password, bcrypt_cost).await?;

    let mut tx = pool.begin().await?;
    let clinic = ClinicsRepository::create(&mut *tx, clinic).await?;
    let admin = UsersRepository::create(
        &mut *tx,
        &NewUser {
            clinic_id: Some(clinic.clinic_id),
            role: Role::ClinicAdmin,
            status: AccountStatus::Pending,
            full_name: &admin.full_name,
            email: Some(&admin.email),
            phone: None,
            password_hash: Some(&password_hash),
        },
    )
    .await?;
    tx.commit().await?;

    info!(target: "clinic.accounts", clinic_id = %clinic.clinic_id, "Clinic registered, awaiting approval");

    Ok(ClinicRegistrationResponse {
        clinic,
        admin_user_id: admin.user_id,
    })
}

/// Change a clinic's status. Activation also approves its pending admins.
#[instrument(skip_all, name = "clinic.accounts.set_clinic_status", fields(status = %status))]
pub async fn set_clinic_status(
    pool: &PgPool,
    notifier: &dyn Notifier,
    clinic_id: Uuid,
    status: ClinicStatus,
) -> Result<ClinicRow, ClinicError> {
    let mut tx = pool.begin().await?;
    let clinic = ClinicsRepository::set_status(&mut *tx, clinic_id, status)
        .await?
        .ok_or_else(|| ClinicError::NotFound("Clinic not found".to_string()))?;
    let approved = if status == ClinicStatus::Active {
        UsersRepository::approve_pending_admins(&mut *tx, clinic_id).await?
    } else {
        Vec::new()
    };
    tx.commit().await?;

    for admin in &approved {
        notify_decision(notifier, &clinic.name, admin, AccountStatus::Approved).await;
    }

    info!(
        target: "clinic.accounts",
        clinic_id = %clinic_id,
        admins_approved = approved.len(),
        "Clinic status changed"
    );
    Ok(clinic)
}

/// Staff or doctor signing up to an active clinic. The account starts pending.
#[instrument(skip_all, name = "clinic.accounts.self_register")]
pub async fn self_register(
    pool: &PgPool,
    clinic_id: Uuid,
    account: &NewStaffAccount,
    bcrypt_cost: u32,
) -> Result<UserRow, ClinicError> {
    ClinicsRepository::get_active(pool, clinic_id).await?;
    create_account(pool, clinic_id, account, AccountStatus::Pending, bcrypt_cost).await
}

/// Account created by a clinic admin. Approved immediately.
#[instrument(skip_all, name = "clinic.accounts.create_staff")]
pub async fn create_staff(
    pool: &PgPool,
    clinic_id: Uuid,
    account: &NewStaffAccount,
    bcrypt_cost: u32,
) -> Result<UserRow, ClinicError> {
    create_account(pool, clinic_id, account, AccountStatus::Approved, bcrypt_cost).await
}

async fn create_account(
    pool: &PgPool,
    clinic_id: Uuid,
    account: &NewStaffAccount,
    status: AccountStatus,
    bcrypt_cost: u32,
) -> Result<UserRow, ClinicError> {
    let password_hash = crypto::hash_secret(&account.password, bcrypt_cost).await?;
    let user = UsersRepository::create(
        pool,
        &NewUser {
            clinic_id: Some(clinic_id),
            role: account.role,
            status,
            full_name: &account.full_name,
            email: Some(&account.email),
            phone: account.phone.as_deref(),
            password_hash: Some(&password_hash),
        },
    )
    .await?;

    info!(
        target: "clinic.accounts",
        user_id = %user.user_id,
        role = %account.role,
        status = %status,
        "Account created"
    );
    Ok(user)
}

/// Approve or reject a pending account, then tell the user.
#[instrument(skip_all, name = "clinic.accounts.decide", fields(decision = %decision))]
pub async fn decide_account(
    pool: &PgPool,
    notifier: &dyn Notifier,
    clinic: &ClinicRow,
    user_id: Uuid,
    decision: AccountStatus,
) -> Result<UserRow, ClinicError> {
    let user = UsersRepository::decide_pending(pool, clinic.clinic_id, user_id, decision)
        .await?
        .ok_or_else(|| ClinicError::NotFound("No pending account with that id".to_string()))?;

    notify_decision(notifier, &clinic.name, &user, decision).await;
    Ok(user)
}

async fn notify_decision(
    notifier: &dyn Notifier,
    clinic_name: &str,
    user: &UserRow,
    decision: AccountStatus,
) {
    let (subject, body) = match decision {
        AccountStatus::Approved => (
            "Account approved",
            format!("Your {clinic_name} account has been approved. You can now sign in."),
        ),
        _ => (
            "Account not approved",
            format!("Your {clinic_name} account request was not approved."),
        ),
    };

    // Staff accounts always have an email; prefer it over SMS here
    let notification = match (&user.email, &user.phone) {
        (Some(email), _) => Some(Notification::email(email.clone(), subject, body)),
        (None, phone) => Notification::to_contact(phone.as_deref(), None, subject, body),
    };
    if let Some(notification) = notification {
        notify_best_effort(notifier, "account_decision", notification).await;
    }
}

/// Email and password login for everyone except patients.
#[instrument(skip_all, name = "clinic.accounts.login")]
pub async fn login(
    pool: &PgPool,
    signer: &TokenSigner,
    email: &str,
    password: &SecretString,
) -> Result<TokenResponse, ClinicError> {
    let user = UsersRepository::find_login_by_email(pool, email).await?;

    let hash = user
        .as_ref()
        .and_then(|u| u.password_hash.as_deref())
        .unwrap_or(DUMMY_PASSWORD_HASH);
    let password_ok = crypto::verify_secret(password, hash).await?;

    let user = match user {
        Some(user) if password_ok && user.password_hash.is_some() => user,
        _ => {
            warn!(
                target: "clinic.accounts",
                email_hash = %hash_for_correlation(email),
                "Failed login"
            );
            return Err(ClinicError::InvalidCredentials);
        }
    };

    match user.status {
        AccountStatus::Approved => {}
        AccountStatus::Pending => {
            return Err(ClinicError::Forbidden("Account pending approval".to_string()))
        }
        AccountStatus::Rejected => {
            return Err(ClinicError::Forbidden("Account was rejected".to_string()))
        }
    }

    if let Some(clinic_id) = user.clinic_id {
        let clinic = ClinicsRepository::find_by_id(pool, clinic_id)
            .await?
            .ok_or_else(|| ClinicError::Forbidden("Clinic is not active".to_string()))?;
        if clinic.status != ClinicStatus::Active {
            return Err(ClinicError::Forbidden("Clinic is not active".to_string()));
        }
    }

    info!(target: "clinic.accounts", user_id = %user.user_id, "Login succeeded");
    token_response(signer, user)
}

/// Create the platform operator account on first start, if configured.
///
/// Returns whether an account was created.
#[instrument(skip_all, name = "clinic.accounts.bootstrap_super_admin")]
pub async fn bootstrap_super_admin(
    pool: &PgPool,
    email: &str,
    password: &SecretString,
    bcrypt_cost: u32,
) -> Result<bool, ClinicError> {
    if UsersRepository::super_admin_exists(pool).await? {
        return Ok(false);
    }

    let password_hash = crypto::hash_secret(password, bcrypt_cost).await?;
    UsersRepository::create(
        pool,
        &NewUser {
            clinic_id: None,
            role: Role::SuperAdmin,
            status: AccountStatus::Approved,
            full_name: "Platform Administrator",
            email: Some(email),
            phone: None,
            password_hash: Some(&password_hash),
        },
    )
    .await?;

    info!(target: "clinic.accounts", "Super admin account created");
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::services::notifier::RecordingNotifier;
    use chrono::NaiveTime;

    const TEST_COST: u32 = 4;

    fn signer() -> TokenSigner {
        TokenSigner::from_seed(&[7u8; 32], 3600, 300).unwrap()
    }

    fn clinic_fields(email: &str) -> NewClinic {
        NewClinic {
            name: "Riverside".to_string(),
            address: "1 River Rd".to_string(),
            phone: "+15550100".to_string(),
            email: email.to_string(),
            latitude: 12.0,
            longitude: 77.0,
            opening_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            closing_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            avg_consultation_minutes: 10,
        }
    }

    fn admin(email: &str) -> NewClinicAdmin {
        NewClinicAdmin {
            full_name: "Ada Admin".to_string(),
            email: email.to_string(),
            password: SecretString::from("correct horse"),
        }
    }

    #[test]
    fn test_dummy_hash_is_valid_bcrypt() {
        assert!(!bcrypt::verify("anything", DUMMY_PASSWORD_HASH).unwrap());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_registration_login_lifecycle(pool: PgPool) {
        let notifier = RecordingNotifier::new();
        let registration = register_clinic(
            &pool,
            &clinic_fields("front@riverside.test"),
            &admin("ada@riverside.test"),
            TEST_COST,
        )
        .await
        .unwrap();
        assert_eq!(registration.clinic.status, ClinicStatus::Pending);

        let password = SecretString::from("correct horse");
        let pending = login(&pool, &signer(), "ada@riverside.test", &password).await;
        match pending {
            Err(ClinicError::Forbidden(msg)) => assert_eq!(msg, "Account pending approval"),
            other => panic!("unexpected {other:?}"),
        }

        set_clinic_status(
            &pool,
            &notifier,
            registration.clinic.clinic_id,
            ClinicStatus::Active,
        )
        .await
        .unwrap();
        assert_eq!(notifier.sent_to("ada@riverside.test").len(), 1);

        let token = login(&pool, &signer(), "ADA@riverside.test", &password)
            .await
            .unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.user.role, Role::ClinicAdmin);

        let claims = signer().verify(&token.access_token).unwrap();
        assert_eq!(
            claims.clinic_id.as_deref(),
            Some(registration.clinic.clinic_id.to_string().as_str())
        );

        set_clinic_status(
            &pool,
            &notifier,
            registration.clinic.clinic_id,
            ClinicStatus::Suspended,
        )
        .await
        .unwrap();
        let suspended = login(&pool, &signer(), "ada@riverside.test", &password).await;
        assert!(matches!(suspended, Err(ClinicError::Forbidden(_))));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_login_rejects_unknown_and_wrong_password(pool: PgPool) {
        let unknown = login(
            &pool,
            &signer(),
            "nobody@clinic.test",
            &SecretString::from("whatever1"),
        )
        .await;
        assert!(matches!(unknown, Err(ClinicError::InvalidCredentials)));

        register_clinic(
            &pool,
            &clinic_fields("x@clinic.test"),
            &admin("bob@clinic.test"),
            TEST_COST,
        )
        .await
        .unwrap();
        let wrong = login(
            &pool,
            &signer(),
            "bob@clinic.test",
            &SecretString::from("wrong password"),
        )
        .await;
        assert!(matches!(wrong, Err(ClinicError::InvalidCredentials)));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_duplicate_admin_email_conflicts(pool: PgPool) {
        register_clinic(
            &pool,
            &clinic_fields("a@clinic.test"),
            &admin("dup@clinic.test"),
            TEST_COST,
        )
        .await
        .unwrap();
        let second = register_clinic(
            &pool,
            &clinic_fields("b@clinic.test"),
            &admin("dup@clinic.test"),
            TEST_COST,
        )
        .await;
        assert!(matches!(second, Err(ClinicError::Conflict(_))));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_bootstrap_super_admin_once(pool: PgPool) {
        let password = SecretString::from("platform-secret");
        assert!(bootstrap_super_admin(&pool, "root@platform.test", &password, TEST_COST)
            .await
            .unwrap());
        assert!(!bootstrap_super_admin(&pool, "root@platform.test", &password, TEST_COST)
            .await
            .unwrap());

        let token = login(&pool, &signer(), "root@platform.test", &password)
            .await
            .unwrap();
        assert_eq!(token.user.role, Role::SuperAdmin);
        assert!(token.user.clinic_id.is_none());
    }
}
