#![warn(clippy::nursery, clippy::pedantic)]

// fadebin Ephemeral Paste Server
// Copyright (C) 2021  Edward Shen
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::store::PasteStore;

mod api;
mod clock;
mod config;
mod html;
mod paste;
mod short_code;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = PasteStore::open(&config.database).with_context(|| {
        format!("Failed to open database at {}", config.database.display())
    })?;

    let app = api::router(
        AppState {
            store: Arc::new(store),
            clock: Arc::new(SystemClock),
            public_url: config.public_url,
        },
        api::cors(&config.cors_origins),
    );

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();

    info!(bind = %config.bind, "Serving pastes");
    axum::Server::try_bind(&config.bind)
        .with_context(|| format!("Failed to bind to {}", config.bind))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Some(signal) = signals.next().await {
                info!(signal, "Shutting down");
            }
        })
        .await?;

    signals_handle.close();
    Ok(())
}
