use async_trait::async_trait;
use anyhow::Result;

/// Unit-of-work boundary wrapped around every mutating engine operation.
///
/// The engine calls `begin` first, then exactly one of `commit` or
/// `rollback`. Stores that cannot roll back simply keep what was written.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn begin(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;
}

/// No-op boundary used when the store has no transactions.
#[derive(Debug, Default)]
pub struct NoTransaction;

#[async_trait]
impl Transaction for NoTransaction {
    async fn begin(&self) -> Result<()> {
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }
}
