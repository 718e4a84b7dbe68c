//! Database layer for the billing ledger.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  FeeEngine  │  (one transaction per usage batch)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries over a borrowed connection)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Transactions
//!
//! Repositories take `&mut PgConnection`, so the transaction boundary belongs to the caller:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let wallet = Wallets::new(&mut tx).get_by_user_id(user_id).await?;
//! Consumptions::new(&mut tx).create(&request).await?;
//! tx.commit().await?;
//! ```
//!
//! Dropping the transaction without committing rolls everything back.

pub mod errors;
pub mod handlers;
pub mod models;
