//! Cash session (till) open/close lifecycle.
//!
//! At most one session may be open at a time. The caller check here gives a
//! readable error; the partial unique index on `cash_sessions(status)` backs
//! it up inside the write transaction.

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{CashSession, CashSessionStatus};
use crate::store::LocalStore;

#[derive(Debug, Error)]
pub enum CashSessionError {
    #[error("A cash session is already open ({0})")]
    AlreadyOpen(String),

    #[error("Cash session {0} is not open")]
    NotOpen(String),

    #[error("Amount must not be negative (got {0})")]
    NegativeAmount(f64),

    #[error("Cash session not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn check_amount(amount: f64) -> Result<(), CashSessionError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(CashSessionError::NegativeAmount(amount));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Open / close
// ---------------------------------------------------------------------------

/// Open a new cash session with the counted opening float.
pub async fn open_session(
    store: &LocalStore,
    opening_amount: f64,
) -> Result<CashSession, CashSessionError> {
    check_amount(opening_amount)?;

    if let Some(existing) = current_open_session(store).await? {
        warn!(session_id = %existing.id, "Refusing to open a second cash session");
        return Err(CashSessionError::AlreadyOpen(existing.id));
    }

    let session = CashSession {
        id: Uuid::new_v4().to_string(),
        remote_id: None,
        opening_amount,
        opened_at: Utc::now(),
        closing_amount: None,
        closed_at: None,
        status: CashSessionStatus::Open,
        synchronized: false,
    };

    match store.insert(session.clone()).await {
        Ok(_) => {}
        Err(StoreError::DuplicateKey { .. }) => {
            let holder = current_open_session(store)
                .await?
                .map(|s| s.id)
                .unwrap_or_default();
            return Err(CashSessionError::AlreadyOpen(holder));
        }
        Err(e) => return Err(e.into()),
    }

    info!(session_id = %session.id, opening_amount, "Cash session opened");
    Ok(session)
}

/// Close an open session with the counted closing amount.
pub async fn close_session(
    store: &LocalStore,
    session_id: &str,
    closing_amount: f64,
) -> Result<CashSession, CashSessionError> {
    check_amount(closing_amount)?;

    let closed = store
        .modify::<CashSession, _, CashSessionError, _>(session_id, move |session| {
            if session.status != CashSessionStatus::Open {
                return Err(CashSessionError::NotOpen(session.id.clone()));
            }
            session.status = CashSessionStatus::Closed;
            session.closing_amount = Some(closing_amount);
            session.closed_at = Some(Utc::now());
            session.synchronized = false;
            Ok(session.clone())
        })
        .await?
        .ok_or_else(|| CashSessionError::NotFound(session_id.to_string()))?;

    info!(
        session_id = %closed.id,
        opening_amount = closed.opening_amount,
        closing_amount,
        "Cash session closed"
    );
    Ok(closed)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub async fn current_open_session(store: &LocalStore) -> Result<Option<CashSession>, StoreError> {
    let mut open: Vec<CashSession> = store
        .get_by_index("status", CashSessionStatus::Open.as_str())
        .await?;
    Ok(open.pop())
}

pub async fn unsynchronized_sessions(store: &LocalStore) -> Result<Vec<CashSession>, StoreError> {
    store.get_by_index("synchronized", false).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_and_close_session() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let session = open_session(&store, 100.0).await.unwrap();
        assert_eq!(session.status, CashSessionStatus::Open);
        assert_eq!(
            current_open_session(&store).await.unwrap().map(|s| s.id),
            Some(session.id.clone())
        );

        let closed = close_session(&store, &session.id, 180.5).await.unwrap();
        assert_eq!(closed.status, CashSessionStatus::Closed);
        assert_eq!(closed.closing_amount, Some(180.5));
        assert!(closed.closed_at.is_some());
        assert!(!closed.synchronized);
        assert!(current_open_session(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_only_one_open_session() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let first = open_session(&store, 50.0).await.unwrap();

        let err = open_session(&store, 20.0).await.unwrap_err();
        assert!(matches!(err, CashSessionError::AlreadyOpen(ref id) if *id == first.id));

        close_session(&store, &first.id, 50.0).await.unwrap();
        let second = open_session(&store, 20.0).await.unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(unsynchronized_sessions(&store).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_schema_backs_up_single_open_check() {
        let store = LocalStore::open_in_memory().await.unwrap();
        open_session(&store, 10.0).await.unwrap();

        let rogue = CashSession {
            id: "rogue".into(),
            remote_id: None,
            opening_amount: 0.0,
            opened_at: Utc::now(),
            closing_amount: None,
            closed_at: None,
            status: CashSessionStatus::Open,
            synchronized: false,
        };
        let err = store.insert(rogue).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn test_close_errors() {
        let store = LocalStore::open_in_memory().await.unwrap();
        assert!(matches!(
            close_session(&store, "missing", 0.0).await.unwrap_err(),
            CashSessionError::NotFound(_)
        ));

        let session = open_session(&store, 0.0).await.unwrap();
        assert!(matches!(
            close_session(&store, &session.id, -1.0).await.unwrap_err(),
            CashSessionError::NegativeAmount(_)
        ));
        close_session(&store, &session.id, 0.0).await.unwrap();
        assert!(matches!(
            close_session(&store, &session.id, 0.0).await.unwrap_err(),
            CashSessionError::NotOpen(_)
        ));
        assert!(matches!(
            open_session(&store, -5.0).await.unwrap_err(),
            CashSessionError::NegativeAmount(_)
        ));
    }
}
