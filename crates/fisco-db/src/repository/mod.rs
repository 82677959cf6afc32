//! # Repository Module
//!
//! Database repository implementations for Fisco.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  The Repository pattern abstracts database access behind a clean API.  │
//! │                                                                         │
//! │  Emission Pipeline                                                     │
//! │       │                                                                 │
//! │       │  db.counters().allocate_number("est-1", 1)                     │
//! │       │  ↓                                                              │
//! │       ▼                                                                 │
//! │  CounterRepository                                                     │
//! │  ├── allocate_number(&self, establishment_id, series)                  │
//! │  ├── allocate_offline_number(&self, establishment_id)                  │
//! │  └── peek_next_number(&self, establishment_id, series)                 │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • Clean separation of concerns                                        │
//! │  • Easy to test (in-memory database)                                   │
//! │  • SQL is isolated in one place                                        │
//! │  • Counter atomicity lives in exactly one function                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`establishment::EstablishmentRepository`] - Fiscal configuration rows
//! - [`counter::CounterRepository`] - Online series + offline counters
//! - [`document::DocumentRepository`] - Fiscal documents and their items
//! - [`contingency::ContingencyRepository`] - Offline sale records

pub mod contingency;
pub mod counter;
pub mod document;
pub mod establishment;
