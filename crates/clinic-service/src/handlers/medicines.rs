//! Medicine inventory handlers.
//!
//! Staff and clinic admins maintain the inventory; doctors can read it when
//! writing prescriptions.

use crate::errors::ClinicError;
use crate::middleware::{require_role, AuthUser};
use crate::models::{
    AdjustStockRequest, CreateMedicineRequest, MedicineListQuery, MedicineRow,
    UpdateMedicineRequest,
};
use crate::repositories::medicines::StockAdjustment;
use crate::repositories::MedicinesRepository;
use crate::routes::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::Role;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const INVENTORY_ROLES: &[Role] = &[Role::Staff, Role::ClinicAdmin];
const READER_ROLES: &[Role] = &[Role::Staff, Role::ClinicAdmin, Role::Doctor];

fn not_found() -> ClinicError {
    ClinicError::NotFound("Medicine not found".to_string())
}

/// Handler for GET /api/v1/medicines?q=&low_stock=
#[instrument(skip_all, name = "clinic.handlers.list_medicines")]
pub async fn list_medicines(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<MedicineListQuery>,
) -> Result<Json<Vec<MedicineRow>>, ClinicError> {
    require_role(&user, READER_ROLES)?;
    let search = query.q.as_deref().filter(|q| !q.trim().is_empty());
    Ok(Json(
        MedicinesRepository::list(&state.pool, user.clinic()?, search, query.low_stock).await?,
    ))
}

/// Handler for POST /api/v1/medicines
#[instrument(skip_all, name = "clinic.handlers.create_medicine")]
pub async fn create_medicine(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateMedicineRequest>,
) -> Result<(StatusCode, Json<MedicineRow>), ClinicError> {
    require_role(&user, INVENTORY_ROLES)?;
    let fields = request.validate()?;
    let medicine = MedicinesRepository::create(&state.pool, user.clinic()?, &fields).await?;
    Ok((StatusCode::CREATED, Json(medicine)))
}

/// Handler for GET /api/v1/medicines/:medicine_id
#[instrument(skip_all, name = "clinic.handlers.get_medicine", fields(medicine_id = %medicine_id))]
pub async fn get_medicine(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(medicine_id): Path<Uuid>,
) -> Result<Json<MedicineRow>, ClinicError> {
    require_role(&user, READER_ROLES)?;
    MedicinesRepository::find(&state.pool, user.clinic()?, medicine_id)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

/// Handler for PATCH /api/v1/medicines/:medicine_id
#[instrument(skip_all, name = "clinic.handlers.update_medicine", fields(medicine_id = %medicine_id))]
pub async fn update_medicine(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(medicine_id): Path<Uuid>,
    Json(request): Json<UpdateMedicineRequest>,
) -> Result<Json<MedicineRow>, ClinicError> {
    require_role(&user, INVENTORY_ROLES)?;
    let clinic_id = user.clinic()?;

    let current = MedicinesRepository::find(&state.pool, clinic_id, medicine_id)
        .await?
        .ok_or_else(not_found)?;
    let fields = request.apply_to(&current)?;

    MedicinesRepository::update(&state.pool, clinic_id, medicine_id, &fields)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

/// Handler for DELETE /api/v1/medicines/:medicine_id
///
/// Soft delete: the row stays for prescriptions that reference it.
#[instrument(skip_all, name = "clinic.handlers.delete_medicine", fields(medicine_id = %medicine_id))]
pub async fn delete_medicine(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(medicine_id): Path<Uuid>,
) -> Result<StatusCode, ClinicError> {
    require_role(&user, INVENTORY_ROLES)?;
    if MedicinesRepository::deactivate(&state.pool, user.clinic()?, medicine_id).await? {
        info!(target: "clinic.handlers.medicines", medicine_id = %medicine_id, "Medicine deactivated");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}

/// Handler for POST /api/v1/medicines/:medicine_id/stock
///
/// # Response
///
/// - 200 OK: updated medicine
/// - 404 Not Found: unknown or inactive medicine
/// - 409 Conflict: stock would go below zero
#[instrument(skip_all, name = "clinic.handlers.adjust_stock", fields(medicine_id = %medicine_id))]
pub async fn adjust_stock(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(medicine_id): Path<Uuid>,
    Json(request): Json<AdjustStockRequest>,
) -> Result<Json<MedicineRow>, ClinicError> {
    require_role(&user, INVENTORY_ROLES)?;
    let delta = request.validate()?;

    match MedicinesRepository::adjust_stock(&state.pool, user.clinic()?, medicine_id, delta)
        .await?
    {
        StockAdjustment::Adjusted(medicine) => {
            if medicine.is_low_stock() {
                info!(
                    target: "clinic.handlers.medicines",
                    medicine_id = %medicine_id,
                    stock = medicine.stock_quantity,
                    "Medicine at or below reorder level"
                );
            }
            Ok(Json(medicine))
        }
        StockAdjustment::Insufficient => Err(ClinicError::Conflict(
            "Not enough stock for this adjustment".to_string(),
        )),
        StockAdjustment::TooLarge => Err(ClinicError::Conflict(
            "Stock quantity would exceed the supported maximum".to_string(),
        )),
        StockAdjustment::NotFound => Err(not_found()),
    }
}
