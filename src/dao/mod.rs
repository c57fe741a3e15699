/// Database model definitions.
pub mod models;
/// Round and score ledger storage and retrieval operations.
pub mod round_store;
