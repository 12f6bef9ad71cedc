//! # pricewatch
//!
//! Catalog re-fetch scheduler, change-detection engine and price-drop
//! notification fan-out.
//!
//! One binary runs any combination of three services, selected by
//! `PIPELINE_ROLE`:
//!
//! - **crawler**: discovers catalog items, refreshes them on a priority
//!   schedule and reconciles each snapshot against the store, recording
//!   price and stock changes in one transaction.
//! - **analyzer**: matches price changes against users' alert rules and
//!   boosts the priority of trending or anomalous items.
//! - **notifier**: stores notifications and pushes them to connected
//!   users over WebSocket without ever blocking the consume loop.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── Live push (ws/)
//!     │
//!     ├── Scheduler ─ ReconcileEngine ── item_changed ──┐
//!     │       ▲                                         │
//!     │       └──────── priority_update ── AlertMatcher ◄┘
//!     │                                       │
//!     │                                  notify_user
//!     │                                       ▼
//!     ├── Notifier ─ ChannelRegistry ─────────┘
//!     │
//!     ├── Broker (memory | PostgreSQL LISTEN/NOTIFY)
//!     └── Store  (memory | PostgreSQL)
//! ```

pub mod api;
pub mod app_state;
pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod persistence;
pub mod service;
pub mod shutdown;
pub mod ws;
