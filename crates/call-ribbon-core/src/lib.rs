//! Core types for call-ribbon.
//!
//! This crate provides the identifiers shared by every other crate in the
//! workspace:
//!
//! - **Record identifiers**: [`TenantId`], [`CustomerId`], [`SessionId`], [`EventId`], [`NoteId`]
//! - **Lookup keys**: [`ApiKeyHash`], the hashed form of a tenant API key
//!
//! # Example
//!
//! ```
//! use call_ribbon_core::{ApiKeyHash, SessionId, TenantId};
//!
//! let tenant_id: TenantId = "6ba7b810-9dad-11d1-80b4-00c04fd430c8".parse().unwrap();
//! let session_id = SessionId::generate();
//! let key = ApiKeyHash::of("demo-api-key-789");
//!
//! assert_eq!(key.to_hex().len(), 64);
//! assert_ne!(tenant_id.as_bytes(), session_id.as_bytes());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{ApiKeyHash, CustomerId, EventId, IdError, NoteId, SessionId, TenantId};
