//! Ledger data structures and the rules for extending the chain.
//!
//! - `Header` / `Block`: immutable, hash-linked and signed by the validator
//! - `Transaction`: signed opaque payload
//! - `Validator`: the append gate
//! - `Blockchain`: header list plus storage behind one lock

pub mod block;
pub mod blockchain;
pub mod transaction;
pub mod validator;
