//! Database record structures matching the billing table schemas.

pub mod consumption;
pub mod prices;
pub mod wallets;
