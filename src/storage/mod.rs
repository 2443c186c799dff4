// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

pub mod memory;
pub mod mssql;
pub mod postgres;
pub mod traits;

pub use memory::{MemorySource, MemoryTarget};
pub use mssql::{MssqlSource, SourceConnectionManager};
pub use postgres::PostgresTarget;
pub use traits::{SourceStore, StorageError, TargetStore, TargetTransaction, TargetWriter};
