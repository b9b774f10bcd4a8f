//! Inventory reservation core.
//!
//! Guarantees that no ticket tier ever sells more units than its quota,
//! however many buyers check out concurrently. Units are held for a bounded
//! time while a buyer pays, converted to sold units on payment confirmation,
//! and returned to the pool on cancellation or expiry.
//!
//! Storage is reached only through [`gateway::InventoryGateway`]; the
//! Postgres implementation lives in `boxoffice_db`.

pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hold;
pub mod hold_manager;
pub mod ledger;
pub mod memory;
pub mod order;
pub mod order_machine;
pub mod payment;
pub mod reclaimer;
pub mod status;
pub mod tier;
pub mod types;
