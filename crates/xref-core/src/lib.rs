//! Identifier mapping engine.
//!
//! [`IdMapper`] owns the authoritative mapping and counter tables. It
//! validates every request, hands out gap-free per-key counter values, and
//! returns the stored external id for repeat requests. Durability is
//! delegated to an optional [`xref_store::PersistenceProvider`].

pub mod mapper;

pub use mapper::IdMapper;
