//! Repository layer.
//!
//! Each repository is a zero-sized struct whose methods take any Postgres
//! executor as the first argument: `&PgPool` for standalone statements, or
//! `&mut *tx` when the statement is one step of a gateway transaction.

pub mod hold_repo;
pub mod order_repo;
pub mod ticket_tier_repo;

pub use hold_repo::HoldRepo;
pub use order_repo::OrderRepo;
pub use ticket_tier_repo::TicketTierRepo;
