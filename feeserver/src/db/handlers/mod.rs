//! Repository implementations for the billing tables.
//!
//! Each repository borrows a `PgConnection`, so it can run either directly on a pooled connection
//! or inside a transaction opened by the caller.

pub mod consumption;
pub mod prices;
pub mod wallets;

pub use consumption::Consumptions;
pub use prices::ModelPrices;
pub use wallets::Wallets;
