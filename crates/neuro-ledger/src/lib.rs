//! Append-only audit ledger.
//!
//! Events are hash-chained (each carries the SHA-256 of its predecessor's
//! canonical form), critical events carry detached signatures, and every
//! accepted event fans out to three storage tiers with independent failure
//! semantics. The facade in [`ledger::Ledger`] is the single writer of the
//! chain cursor.

pub mod event;
pub mod hash_chain;
pub mod ledger;
pub mod processor;
pub mod signer;
pub mod storage;
pub mod transport;

pub use event::{EventType, LedgerEvent, LogFields, GENESIS_HASH};
pub use hash_chain::ChainVerification;
pub use ledger::{Ledger, LEDGER_TOPIC};
pub use processor::{EventProcessor, RetryPolicy};
pub use signer::{EventSigner, KeyStore, LocalKeyStore};
pub use transport::{EventTransport, InProcessTransport};
