// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! CouchDB REST Client
//!
//! Thin HTTP layer used by `CouchGridStore` and the conflict resolver.
//!
//! # API Endpoints
//!
//! - `GET/PUT /{db}/{id}` - Document CRUD (`?rev=` for a specific revision)
//! - `POST /{db}/_bulk_docs` - Bulk create/update/tombstone
//! - `GET /{db}/_design/{ddoc}/_view/{view}` - Map/reduce views
//! - `PUT /{db}/_design/{ddoc}/_update/{handler}/{id}` - Server-side update procedure
//! - `GET /{db}/_changes` - Long-poll and continuous change feeds

pub mod client;
pub mod design;
pub mod types;

pub use client::CouchClient;
