//! # Clinic Test Utilities
//!
//! Shared test utilities for the clinic service.
//!
//! This crate provides:
//! - Server test harness (`TestClinicServer` for E2E tests)
//! - Seeded tenants (`TestClinic` with an admin, doctor, staff member and patient)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use clinic_test_utils::*;
//!
//! #[sqlx::test(migrations = "../../migrations")]
//! async fn test_example(pool: PgPool) -> Result<()> {
//!     let server = TestClinicServer::spawn(pool).await?;
//!     let clinic = TestClinic::seed(server.pool()).await?;
//!
//!     let response = server
//!         .client()
//!         .get(format!("{}/api/v1/me", server.url()))
//!         .bearer_auth(server.token_for(&clinic.patient)?)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;

// Re-export commonly used items
pub use fixtures::*;
pub use server_harness::*;
