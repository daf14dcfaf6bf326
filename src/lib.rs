//! # Quaff
//!
//! Declarative remote API synchronization.
//!
//! Quaff pulls items from remote endpoints described in configuration and
//! maps them onto local entities through path-based field maps. Endpoint
//! configuration is inherited from parent endpoints, requests go through a
//! pluggable transport, responses are decoded by content type, and every
//! pass is paginated until the remote side is exhausted.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │ Api / CLI │──▶│ Endpoint  │──▶│ Transport  │──▶│ Response │
//! │  (sync)   │   │ resolve + │   │ http/file  │   │ decode   │
//! └───────────┘   │ paginate  │   └────────────┘   └────┬─────┘
//!                 └─────┬─────┘                         │ items
//!                       ▼                               ▼
//!                 ┌───────────┐   ┌──────────────────────────┐
//!                 │   Store   │◀──│ Mapper (field map, hooks)│
//!                 │ mem/SQLite│   └──────────────────────────┘
//!                 └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! quaff init                    # create database
//! quaff endpoints               # show resolved endpoints
//! quaff fetch list:items        # print decoded items of the first page
//! quaff sync list:items         # fetch, map, and persist
//! quaff sync all                # every enabled api
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Entities and sync reports |
//! | [`path`] | Delimited path traversal and building |
//! | [`field_map`] | Field map sigil decoding |
//! | [`decode`] | Content-type resolution and body decoding |
//! | [`xml`] | XML/HTML tree and XPath subset |
//! | [`response`] | Fetch outcomes |
//! | [`transport`] | Pluggable http/file transports |
//! | [`helpers`] | Map helpers for `field()` entries |
//! | [`mapper`] | Payload → entity mapping |
//! | [`hooks`] | Endpoint extension points |
//! | [`endpoint`] | Endpoint resolution and the sync loop |
//! | [`context`] | Runtime context and registries |
//! | [`api`] | Api lookup and bulk sync |
//! | [`store`] | Entity persistence |
//! | [`progress`] | Sync progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sources`] | Endpoint listing for the CLI |

pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod decode;
pub mod endpoint;
pub mod error;
pub mod field_map;
pub mod helpers;
pub mod hooks;
pub mod mapper;
pub mod migrate;
pub mod models;
pub mod path;
pub mod progress;
pub mod response;
pub mod sources;
pub mod store;
pub mod transport;
pub mod xml;

pub use context::Quaff;
pub use error::{QuaffError, QuaffResult};
