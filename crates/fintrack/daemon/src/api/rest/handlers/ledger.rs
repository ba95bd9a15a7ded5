//! Ledger handlers. Every route here runs behind the tenant context layer,
//! so the handle always points at the caller's own tenant store.

use crate::api::rest::state::RequestTenant;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    Json,
};
use fintrack_store::QueryWindow;
use fintrack_types::{EntryKind, LedgerEntry, NewLedgerEntry, TenantId};
use serde::{Deserialize, Serialize};

const MAX_PAGE: usize = 500;

/// Query parameters for listing entries
#[derive(Debug, Default, Deserialize)]
pub struct ListEntriesQuery {
    pub kind: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListEntriesQuery {
    fn kind(&self) -> ApiResult<Option<EntryKind>> {
        self.kind
            .as_deref()
            .map(|kind| {
                kind.parse::<EntryKind>()
                    .map_err(|e| ApiError::BadRequest(e.to_string()))
            })
            .transpose()
    }

    fn window(&self) -> QueryWindow {
        let default = QueryWindow::default();
        QueryWindow {
            limit: self.limit.unwrap_or(default.limit).min(MAX_PAGE),
            offset: self.offset.unwrap_or(default.offset),
        }
    }
}

/// List entries, newest first
pub async fn list_entries(
    Extension(ctx): Extension<RequestTenant>,
    Query(query): Query<ListEntriesQuery>,
) -> ApiResult<Json<Vec<LedgerEntry>>> {
    let entries = ctx
        .handle
        .list_entries(query.kind()?, query.window())
        .await?;
    Ok(Json(entries))
}

/// Record an entry attributed to the caller
pub async fn record_entry(
    Extension(ctx): Extension<RequestTenant>,
    Json(request): Json<NewLedgerEntry>,
) -> ApiResult<(StatusCode, Json<LedgerEntry>)> {
    let entry = request
        .into_entry(ctx.principal.account_id, chrono::Utc::now())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let entry = ctx.handle.record_entry(entry).await?;
    tracing::debug!(tenant = %ctx.handle.tenant(), entry = %entry.id, "ledger entry recorded");
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Ledger summary response
#[derive(Debug, Serialize)]
pub struct LedgerSummaryResponse {
    pub tenant_id: TenantId,
    pub entries: u64,
    pub expense_minor: i64,
    pub income_minor: i64,
    pub balance_minor: i64,
}

/// Totals over the caller's ledger
pub async fn ledger_summary(
    Extension(ctx): Extension<RequestTenant>,
) -> ApiResult<Json<LedgerSummaryResponse>> {
    let totals = ctx.handle.totals().await?;
    Ok(Json(LedgerSummaryResponse {
        tenant_id: ctx.handle.tenant().clone(),
        entries: totals.entries,
        expense_minor: totals.expense_minor,
        income_minor: totals.income_minor,
        balance_minor: totals.balance_minor(),
    }))
}
