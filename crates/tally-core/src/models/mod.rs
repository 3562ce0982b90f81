//! Domain models for the token ledger

pub mod balance;
pub mod event;
pub mod pack;
pub mod payment;
pub mod reservation;
pub mod transaction;

pub use balance::TokenBalance;
pub use event::ProcessedEvent;
pub use pack::ProductPack;
pub use payment::{Payment, PaymentStatus};
pub use reservation::{split_commit, CommitSplit, ReservationState, TokenReservation};
pub use transaction::{TokenTransaction, TransactionType};
