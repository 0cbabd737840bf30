//! Read-only settlement views

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use batch_settlement::{
    state::{Address, Batch, BatchId, LedgerSlot, ProposalId, SettlementParams, SettlementProposal},
    SettlementEngine, SettlementEvent,
};
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{KeeperError, Result},
    types::{BatchReceiverResponse, CurrentBatchResponse},
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
}

/// Create views router
pub fn views_router(state: AppState) -> Router {
    Router::new()
        .route("/api/params", get(params))
        .route("/api/batches/current", get(current_batch))
        .route("/api/batches/{batch}", get(batch))
        .route("/api/proposals/{id}", get(proposal))
        .route("/api/vaults/{vault}/proposals", get(pending_proposals))
        .route("/api/vaults/{vault}/batches/{batch}/ledger", get(ledger_snapshot))
        .route("/api/vaults/{vault}/batches/{batch}/receiver", get(batch_receiver))
        .route("/api/events", get(events))
        .with_state(state)
}

/// Entries returned by `/api/events` when no `limit` is given.
const DEFAULT_EVENTS_LIMIT: usize = 100;
const MAX_EVENTS_LIMIT: usize = 1_000;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

fn parse_address(raw: &str) -> Result<Address> {
    raw.parse()
        .map_err(|e| KeeperError::BadRequest(format!("Invalid address {raw}: {e}")))
}

/// GET /api/params
async fn params(State(state): State<AppState>) -> Json<SettlementParams> {
    Json(state.engine.params())
}

/// GET /api/batches/current
async fn current_batch(State(state): State<AppState>) -> Json<CurrentBatchResponse> {
    Json(CurrentBatchResponse {
        batch: state.engine.current_batch(),
        now: state.engine.now(),
    })
}

/// GET /api/batches/{batch}
async fn batch(State(state): State<AppState>, Path(batch): Path<BatchId>) -> Result<Json<Batch>> {
    state
        .engine
        .batch(batch)
        .map(Json)
        .ok_or_else(|| KeeperError::NotFound(format!("batch {batch}")))
}

/// GET /api/proposals/{id}
async fn proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SettlementProposal>> {
    let id: ProposalId = id
        .parse()
        .map_err(|e| KeeperError::BadRequest(format!("Invalid proposal id {id}: {e}")))?;

    state
        .engine
        .proposal(&id)
        .map(Json)
        .ok_or_else(|| KeeperError::NotFound(format!("proposal {id}")))
}

/// GET /api/vaults/{vault}/proposals
async fn pending_proposals(
    State(state): State<AppState>,
    Path(vault): Path<String>,
) -> Result<Json<Vec<SettlementProposal>>> {
    let vault = parse_address(&vault)?;
    let pending = state.engine.pending_proposals(&vault);
    debug!(%vault, pending = pending.len(), "Listed pending proposals");
    Ok(Json(pending))
}

/// GET /api/vaults/{vault}/batches/{batch}/ledger
async fn ledger_snapshot(
    State(state): State<AppState>,
    Path((vault, batch)): Path<(String, BatchId)>,
) -> Result<Json<LedgerSlot>> {
    let vault = parse_address(&vault)?;
    Ok(Json(state.engine.ledger_snapshot(vault, batch)))
}

/// GET /api/vaults/{vault}/batches/{batch}/receiver
async fn batch_receiver(
    State(state): State<AppState>,
    Path((vault, batch)): Path<(String, BatchId)>,
) -> Result<Json<BatchReceiverResponse>> {
    let vault = parse_address(&vault)?;
    let receiver = state.engine.batch_receiver(&vault, batch)?;
    Ok(Json(BatchReceiverResponse { batch, receiver }))
}

/// GET /api/events?limit=N
///
/// Most recent journal entries, oldest first.
async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<SettlementEvent>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENTS_LIMIT)
        .min(MAX_EVENTS_LIMIT);
    Json(state.engine.recent_events(limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Deployment;
    use axum::{http::StatusCode, response::IntoResponse};
    use batch_settlement::state::{BatchPolicy, ProposalStatus};

    fn state(d: &Deployment) -> AppState {
        AppState {
            engine: d.engine.clone(),
        }
    }

    #[tokio::test]
    async fn test_proposal_view() {
        let d = Deployment::new(BatchPolicy::Manual);
        let id = d.closed_gateway_proposal();

        let Json(found) = proposal(State(state(&d)), Path(id.to_string()))
            .await
            .unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.status, ProposalStatus::Proposed);
        assert_eq!(found.netted, 100);
    }

    #[tokio::test]
    async fn test_unknown_proposal_is_not_found() {
        let d = Deployment::new(BatchPolicy::Manual);
        let unknown = ProposalId::new([9; 32]);

        let err = proposal(State(state(&d)), Path(unknown.to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_address_is_bad_request() {
        let d = Deployment::new(BatchPolicy::Manual);

        let err = pending_proposals(State(state(&d)), Path("not-base58-0OIl".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_pending_and_ledger_views() {
        let d = Deployment::new(BatchPolicy::Manual);
        let id = d.closed_gateway_proposal();

        let Json(pending) = pending_proposals(State(state(&d)), Path(d.gateway.to_string()))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);

        let Json(slot) = ledger_snapshot(State(state(&d)), Path((d.gateway.to_string(), 1)))
            .await
            .unwrap();
        assert_eq!(slot.deposited, 200);
        assert_eq!(slot.requested, 100);
    }

    #[tokio::test]
    async fn test_batch_views() {
        let d = Deployment::new(BatchPolicy::Manual);
        d.closed_gateway_proposal();

        let Json(current) = current_batch(State(state(&d))).await;
        assert_eq!(current.batch, 1);

        let Json(detail) = batch(State(state(&d)), Path(1)).await.unwrap();
        assert_eq!(detail.vaults, vec![d.gateway]);

        let err = batch(State(state(&d)), Path(99)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_receiver_view_rejects_gateway() {
        let d = Deployment::new(BatchPolicy::Manual);

        let Json(receiver) = batch_receiver(State(state(&d)), Path((d.pooled.to_string(), 1)))
            .await
            .unwrap();
        assert_eq!(receiver.batch, 1);

        let err = batch_receiver(State(state(&d)), Path((d.gateway.to_string(), 1)))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_events_and_params() {
        let d = Deployment::new(BatchPolicy::Manual);
        d.closed_gateway_proposal();

        let Json(recent) = events(State(state(&d)), Query(EventsQuery::default())).await;
        assert!(recent
            .iter()
            .any(|event| matches!(event, SettlementEvent::SettlementProposed { .. })));

        let Json(last) = events(State(state(&d)), Query(EventsQuery { limit: Some(1) })).await;
        assert_eq!(last.len(), 1);
        assert_eq!(last.last(), recent.last());

        let Json(params) = params(State(state(&d))).await;
        assert_eq!(params, SettlementParams::default());
    }
}
