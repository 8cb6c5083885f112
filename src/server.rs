// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The HTTP shell: a JSON API over the soundboard plus the bundled web page.

mod handlers;

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use rust_embed::RustEmbed;
use tracing::info;

use crate::soundboard::Soundboard;

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(RustEmbed)]
#[folder = "web/"]
struct Web;

/// Builds the router over the given soundboard.
pub fn router(board: Arc<Soundboard>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route(
            "/api/bindings",
            get(handlers::list_bindings).post(handlers::bind),
        )
        .route(
            "/api/bindings/:trigger",
            get(handlers::get_binding).delete(handlers::unbind),
        )
        .route(
            "/api/bindings/:trigger/rename",
            post(handlers::rename_binding),
        )
        .route("/api/bindings/:trigger/icon", put(handlers::set_icon))
        .route("/api/play/:trigger", post(handlers::play))
        .route("/api/stop", post(handlers::stop_all))
        .route("/api/stop/:trigger", post(handlers::stop))
        .route(
            "/api/volume",
            get(handlers::get_volume).post(handlers::set_volume),
        )
        .route("/api/assets", get(handlers::list_assets))
        .route(
            "/api/assets/:name",
            get(handlers::read_asset)
                .put(handlers::upload_asset)
                .delete(handlers::delete_asset),
        )
        .route("/api/assets/:name/rename", post(handlers::rename_asset))
        .route("/api/icons", get(handlers::list_icons))
        .route(
            "/api/icons/:name",
            get(handlers::read_icon)
                .put(handlers::upload_icon)
                .delete(handlers::delete_icon),
        )
        .route("/api/icons/:name/rename", post(handlers::rename_icon))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(board)
}

/// Serves the soundboard until ctrl-c.
pub async fn serve(board: Arc<Soundboard>, addr: SocketAddr) -> Result<(), Box<dyn Error>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, device = board.device_name(), "Soundboard listening");

    axum::serve(listener, router(board.clone()))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
        })
        .await?;

    board.stop_all();
    Ok(())
}
