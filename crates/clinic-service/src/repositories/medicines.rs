//! Medicine inventory.

use super::{conflict_on_unique, timed};
use crate::errors::ClinicError;
use crate::models::{MedicineFields, MedicineRow};
use sqlx::{PgExecutor, PgPool};
use tracing::instrument;
use uuid::Uuid;

const MEDICINE_COLUMNS: &str = "medicine_id, clinic_id, name, generic_name, form, strength, \
                                unit, stock_quantity, reorder_level, is_active, created_at, \
                                updated_at";

const DUPLICATE_MEDICINE: &str = "A medicine with this name and strength already exists";

/// Result of a stock adjustment.
#[derive(Debug)]
pub enum StockAdjustment {
    Adjusted(MedicineRow),
    /// The delta would take stock below zero.
    Insufficient,
    /// The delta would take stock past what the column holds.
    TooLarge,
    NotFound,
}

pub struct MedicinesRepository;

impl MedicinesRepository {
    #[instrument(skip_all, name = "clinic.repo.medicines.create")]
    pub async fn create(
        pool: &PgPool,
        clinic_id: Uuid,
        fields: &MedicineFields,
    ) -> Result<MedicineRow, ClinicError> {
        let sql = format!(
            "INSERT INTO medicines (clinic_id, name, generic_name, form, strength, unit, \
                                    stock_quantity, reorder_level) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {MEDICINE_COLUMNS}"
        );
        timed(
            "create_medicine",
            sqlx::query_as::<_, MedicineRow>(&sql)
                .bind(clinic_id)
                .bind(&fields.name)
                .bind(&fields.generic_name)
                .bind(&fields.form)
                .bind(&fields.strength)
                .bind(&fields.unit)
                .bind(fields.stock_quantity)
                .bind(fields.reorder_level)
                .fetch_one(pool),
        )
        .await
        .map_err(conflict_on_unique(DUPLICATE_MEDICINE))
    }

    /// Active medicine of a clinic.
    #[instrument(skip_all, name = "clinic.repo.medicines.find")]
    pub async fn find(
        executor: impl PgExecutor<'_>,
        clinic_id: Uuid,
        medicine_id: Uuid,
    ) -> Result<Option<MedicineRow>, ClinicError> {
        let sql = format!(
            "SELECT {MEDICINE_COLUMNS} FROM medicines \
             WHERE medicine_id = $1 AND clinic_id = $2 AND is_active"
        );
        Ok(timed(
            "find_medicine",
            sqlx::query_as::<_, MedicineRow>(&sql)
                .bind(medicine_id)
                .bind(clinic_id)
                .fetch_optional(executor),
        )
        .await?)
    }

    /// Active medicines of a clinic among `medicine_ids`.
    #[instrument(skip_all, name = "clinic.repo.medicines.find_many")]
    pub async fn find_many(
        executor: impl PgExecutor<'_>,
        clinic_id: Uuid,
        medicine_ids: &[Uuid],
    ) -> Result<Vec<MedicineRow>, ClinicError> {
        let sql = format!(
            "SELECT {MEDICINE_COLUMNS} FROM medicines \
             WHERE clinic_id = $1 AND medicine_id = ANY($2) AND is_active"
        );
        Ok(timed(
            "find_medicines",
            sqlx::query_as::<_, MedicineRow>(&sql)
                .bind(clinic_id)
                .bind(medicine_ids)
                .fetch_all(executor),
        )
        .await?)
    }

    /// Active medicines, optionally filtered by name and low stock.
    #[instrument(skip_all, name = "clinic.repo.medicines.list")]
    pub async fn list(
        pool: &PgPool,
        clinic_id: Uuid,
        search: Option<&str>,
        low_stock_only: bool,
    ) -> Result<Vec<MedicineRow>, ClinicError> {
        let pattern = search.map(|q| format!("%{}%", escape_like(q)));
        let sql = format!(
            "SELECT {MEDICINE_COLUMNS} FROM medicines \
             WHERE clinic_id = $1 AND is_active \
               AND ($2::TEXT IS NULL OR name ILIKE $2 OR generic_name ILIKE $2) \
               AND (NOT $3 OR stock_quantity <= reorder_level) \
             ORDER BY name, strength"
        );
        Ok(timed(
            "list_medicines",
            sqlx::query_as::<_, MedicineRow>(&sql)
                .bind(clinic_id)
                .bind(pattern)
                .bind(low_stock_only)
                .fetch_all(pool),
        )
        .await?)
    }

    #[instrument(skip_all, name = "clinic.repo.medicines.update")]
    pub async fn update(
        pool: &PgPool,
        clinic_id: Uuid,
        medicine_id: Uuid,
        fields: &MedicineFields,
    ) -> Result<Option<MedicineRow>, ClinicError> {
        let sql = format!(
            "UPDATE medicines SET name = $3, generic_name = $4, form = $5, strength = $6, \
                 unit = $7, reorder_level = $8, updated_at = NOW() \
             WHERE medicine_id = $1 AND clinic_id = $2 AND is_active \
             RETURNING {MEDICINE_COLUMNS}"
        );
        timed(
            "update_medicine",
            sqlx::query_as::<_, MedicineRow>(&sql)
                .bind(medicine_id)
                .bind(clinic_id)
                .bind(&fields.name)
                .bind(&fields.generic_name)
                .bind(&fields.form)
                .bind(&fields.strength)
                .bind(&fields.unit)
                .bind(fields.reorder_level)
                .fetch_optional(pool),
        )
        .await
        .map_err(conflict_on_unique(DUPLICATE_MEDICINE))
    }

    /// Soft delete. Returns false if there was no active medicine.
    #[instrument(skip_all, name = "clinic.repo.medicines.deactivate")]
    pub async fn deactivate(
        pool: &PgPool,
        clinic_id: Uuid,
        medicine_id: Uuid,
    ) -> Result<bool, ClinicError> {
        let result = timed(
            "deactivate_medicine",
            sqlx::query(
                r#"
                UPDATE medicines SET is_active = FALSE, updated_at = NOW()
                WHERE medicine_id = $1 AND clinic_id = $2 AND is_active
                "#,
            )
            .bind(medicine_id)
            .bind(clinic_id)
            .execute(pool),
        )
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Add `delta` to stock in one statement.
    ///
    /// The sum is taken in BIGINT so it can neither go below zero nor
    /// overflow the INTEGER column.
    #[instrument(skip_all, name = "clinic.repo.medicines.adjust")]
    pub async fn adjust_stock(
        pool: &PgPool,
        clinic_id: Uuid,
        medicine_id: Uuid,
        delta: i32,
    ) -> Result<StockAdjustment, ClinicError> {
        let sql = format!(
            "UPDATE medicines \
             SET stock_quantity = (stock_quantity::BIGINT + $3)::INTEGER, updated_at = NOW() \
             WHERE medicine_id = $1 AND clinic_id = $2 AND is_active \
               AND stock_quantity::BIGINT + $3 BETWEEN 0 AND $4 \
             RETURNING {MEDICINE_COLUMNS}"
        );
        let updated = timed(
            "adjust_medicine_stock",
            sqlx::query_as::<_, MedicineRow>(&sql)
                .bind(medicine_id)
                .bind(clinic_id)
                .bind(i64::from(delta))
                .bind(i64::from(i32::MAX))
                .fetch_optional(pool),
        )
        .await?;

        match updated {
            Some(row) => Ok(StockAdjustment::Adjusted(row)),
            None => match Self::find(pool, clinic_id, medicine_id).await? {
                Some(row) if i64::from(row.stock_quantity) + i64::from(delta) < 0 => {
                    Ok(StockAdjustment::Insufficient)
                }
                Some(_) => Ok(StockAdjustment::TooLarge),
                None => Ok(StockAdjustment::NotFound),
            },
        }
    }
}

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like(" para "), "para");
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    async fn seed_clinic(pool: &PgPool) -> Uuid {
        sqlx::query_scalar(
            r#"
            INSERT INTO clinics (name, address, phone, email, latitude, longitude,
                                 opening_time, closing_time, avg_consultation_minutes, status)
            VALUES ('M', 'Addr', '+15550100', 'm@clinic.test', 0, 0, '08:00', '18:00', 10, 'active')
            RETURNING clinic_id
            "#,
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    fn fields(name: &str, stock: i32, reorder: i32) -> MedicineFields {
        MedicineFields {
            name: name.to_string(),
            generic_name: None,
            form: "tablet".to_string(),
            strength: "500mg".to_string(),
            unit: "tablet".to_string(),
            stock_quantity: stock,
            reorder_level: reorder,
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_adjust_stock_never_negative(pool: PgPool) {
        let clinic_id = seed_clinic(&pool).await;
        let med = MedicinesRepository::create(&pool, clinic_id, &fields("Paracetamol", 5, 2))
            .await
            .unwrap();

        let result = MedicinesRepository::adjust_stock(&pool, clinic_id, med.medicine_id, -6)
            .await
            .unwrap();
        assert!(matches!(result, StockAdjustment::Insufficient));

        let result = MedicinesRepository::adjust_stock(&pool, clinic_id, med.medicine_id, -5)
            .await
            .unwrap();
        match result {
            StockAdjustment::Adjusted(row) => assert_eq!(row.stock_quantity, 0),
            other => panic!("unexpected {other:?}"),
        }

        let result = MedicinesRepository::adjust_stock(&pool, clinic_id, Uuid::new_v4(), 1)
            .await
            .unwrap();
        assert!(matches!(result, StockAdjustment::NotFound));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_adjust_stock_past_integer_range(pool: PgPool) {
        let clinic_id = seed_clinic(&pool).await;
        let med = MedicinesRepository::create(&pool, clinic_id, &fields("Cetirizine", 10, 2))
            .await
            .unwrap();

        let result = MedicinesRepository::adjust_stock(&pool, clinic_id, med.medicine_id, i32::MAX)
            .await
            .unwrap();
        assert!(matches!(result, StockAdjustment::TooLarge));

        let result = MedicinesRepository::adjust_stock(&pool, clinic_id, med.medicine_id, i32::MIN)
            .await
            .unwrap();
        assert!(matches!(result, StockAdjustment::Insufficient));

        let stored = MedicinesRepository::find(&pool, clinic_id, med.medicine_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.stock_quantity, 10);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_duplicate_active_medicine(pool: PgPool) {
        let clinic_id = seed_clinic(&pool).await;
        let med = MedicinesRepository::create(&pool, clinic_id, &fields("Ibuprofen", 1, 0))
            .await
            .unwrap();

        let dup = MedicinesRepository::create(&pool, clinic_id, &fields("ibuprofen", 1, 0)).await;
        assert!(matches!(dup, Err(ClinicError::Conflict(_))));

        // Re-adding is allowed once the old entry is deleted
        assert!(MedicinesRepository::deactivate(&pool, clinic_id, med.medicine_id)
            .await
            .unwrap());
        MedicinesRepository::create(&pool, clinic_id, &fields("Ibuprofen", 1, 0))
            .await
            .unwrap();
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_list_filters(pool: PgPool) {
        let clinic_id = seed_clinic(&pool).await;
        MedicinesRepository::create(&pool, clinic_id, &fields("Amoxicillin", 100, 10))
            .await
            .unwrap();
        MedicinesRepository::create(&pool, clinic_id, &fields("Aspirin", 3, 10))
            .await
            .unwrap();

        let all = MedicinesRepository::list(&pool, clinic_id, None, false)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let low = MedicinesRepository::list(&pool, clinic_id, None, true)
            .await
            .unwrap();
        assert_eq!(low.len(), 1);
        assert!(low.iter().all(MedicineRow::is_low_stock));

        let search = MedicinesRepository::list(&pool, clinic_id, Some("amox"), false)
            .await
            .unwrap();
        assert_eq!(search.len(), 1);
    }
}
