//! Bookshelf crypto helpers
//!
//! The site never stores a provider's raw subject identifier. Accounts are
//! linked through a pseudonymous key: the hex SHA-256 digest of the subject.
//! Random tokens here guard the OAuth round trip against forged callbacks.

pub mod identity;
pub mod keys;
