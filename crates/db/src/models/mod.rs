//! Database row structs.
//!
//! Each submodule contains a `FromRow` struct matching the table's columns
//! and a conversion into the corresponding `boxoffice_core` domain type.
//! Status columns are stored as SMALLINT ids; an id with no matching enum
//! variant is reported as invalid stored data.

pub mod hold;
pub mod order;
pub mod tier;
