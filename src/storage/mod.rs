// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key-value backends for the durable queue.

pub mod memory;
pub mod sql;
pub mod traits;
