//! # fisco-db: Database Layer for Fisco
//!
//! This crate provides database access for the Fisco emission system.
//! It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fisco Data Flow                                  │
//! │                                                                         │
//! │  Emission Pipeline (fisco-engine)                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     fisco-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ Establishment │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Counter       │    │ 001_init.sql │  │   │
//! │  │   │ Connection    │    │ Document      │    │ ...          │  │   │
//! │  │   │ Management    │    │ Contingency   │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │          /var/lib/fisco/fisco.db (one file per store)           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (counter, document, etc.)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fisco_db::{Database, DbConfig};
//!
//! // Create database with default config
//! let config = DbConfig::new("path/to/fisco.db");
//! let db = Database::new(config).await?;
//!
//! // Allocate a document number - atomic, never reused
//! let number = db.counters().allocate_number("est-1", 1).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::contingency::ContingencyRepository;
pub use repository::counter::CounterRepository;
pub use repository::document::DocumentRepository;
pub use repository::establishment::EstablishmentRepository;
