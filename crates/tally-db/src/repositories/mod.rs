//! Repository implementations
//!
//! Each repository wraps the pool for read paths and exposes `*_in_tx`
//! variants taking a `&mut Transaction` for the sections that must compose
//! atomically with other writes.

pub mod balance_repo;
pub mod event_repo;
pub mod pack_repo;
pub mod payment_repo;
pub mod reservation_repo;
pub mod transaction_repo;

pub use balance_repo::BalanceRepository;
pub use event_repo::ProcessedEventRepository;
pub use pack_repo::PackRepository;
pub use payment_repo::PaymentRepository;
pub use reservation_repo::ReservationRepository;
pub use transaction_repo::{JournalTotals, TransactionRepository};
