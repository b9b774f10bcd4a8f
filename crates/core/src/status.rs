//! Hold and order status enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table. The order transition
//! table lives here so every caller enforces the same rules.

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Every variant, in seed data order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some($name::$variant), )+
                    _ => None,
                }
            }

            /// The lookup table `name` column for this status.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_status_enum! {
    /// Inventory hold lifecycle status.
    HoldStatus {
        Active = 1 => "active",
        Confirmed = 2 => "confirmed",
        Released = 3 => "released",
        Expired = 4 => "expired",
    }
}

define_status_enum! {
    /// Order lifecycle status.
    OrderStatus {
        Pending = 1 => "pending",
        Paid = 2 => "paid",
        Confirmed = 3 => "confirmed",
        Expired = 4 => "expired",
        Cancelled = 5 => "cancelled",
        Refunded = 6 => "refunded",
    }
}

impl HoldStatus {
    /// Only active holds count against a tier's available pool.
    pub fn is_active(self) -> bool {
        self == HoldStatus::Active
    }

    /// Every status except `Active` is final.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl OrderStatus {
    /// Statuses with no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        order_transitions::valid_transitions(self).is_empty()
    }
}

/// Order state machine.
///
/// ```text
/// pending -> paid -> confirmed -> refunded
///    |        |
///    |        +----> cancelled
///    +-------------> cancelled
///    +-------------> expired
/// ```
pub mod order_transitions {
    use super::OrderStatus::{self, *};
    use crate::error::CoreError;

    /// Returns the set of statuses reachable from `from`.
    ///
    /// Terminal states (Expired, Cancelled, Refunded) return an empty slice.
    pub fn valid_transitions(from: OrderStatus) -> &'static [OrderStatus] {
        match from {
            Pending => &[Paid, Expired, Cancelled],
            Paid => &[Confirmed, Cancelled],
            Confirmed => &[Refunded],
            Expired | Cancelled | Refunded => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a transition, returning [`CoreError::IllegalTransition`] for
    /// anything outside the table.
    pub fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<(), CoreError> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(CoreError::IllegalTransition { from, to })
        }
    }
}
