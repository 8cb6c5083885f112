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

//! HTTP request handlers. Every soundboard call runs on the blocking pool.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::Web;
use crate::assets::AssetRef;
use crate::config::Retrigger;
use crate::mapping::{Binding, PlaybackOptions};
use crate::soundboard::{self, AssetSource, Soundboard};

// ============================================================================
// Errors
// ============================================================================

/// A failed request.
pub enum ApiError {
    Board(soundboard::Error),
    Join(tokio::task::JoinError),
    NotFound(&'static str),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    fn ok() -> StatusResponse {
        StatusResponse {
            status: "ok".to_string(),
            message: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Board(e) => {
                let status = match e {
                    soundboard::Error::UnknownTrigger(_) => StatusCode::NOT_FOUND,
                    soundboard::Error::DuplicateTrigger(_) => StatusCode::CONFLICT,
                    soundboard::Error::InvalidTrigger(_) | soundboard::Error::InvalidAsset(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    soundboard::Error::AssetLoadError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    soundboard::Error::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    soundboard::Error::PersistenceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    error!(err = %e, "Request failed");
                }
                (status, e.to_string())
            }
            ApiError::Join(e) => {
                error!(err = %e, "Soundboard task failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
        };

        (
            status,
            Json(StatusResponse {
                status: "error".to_string(),
                message: Some(message),
            }),
        )
            .into_response()
    }
}

/// Runs a soundboard call on the blocking pool.
async fn blocking<T, F>(board: Arc<Soundboard>, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Soundboard) -> Result<T, soundboard::Error> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(&board))
        .await
        .map_err(ApiError::Join)?
        .map_err(ApiError::Board)
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct BindingResponse {
    pub trigger: String,
    pub name: String,
    pub file: String,
    pub format: String,
    pub looped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrigger: Option<Retrigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_voices: Option<NonZeroU32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub playing: bool,
}

impl BindingResponse {
    fn new(binding: &Binding, playing: bool) -> BindingResponse {
        let options = binding.options();
        BindingResponse {
            trigger: binding.trigger().to_string(),
            name: binding.asset().name().to_string(),
            file: binding.asset().file().to_string(),
            format: binding.asset().format().to_string(),
            looped: options.looped,
            retrigger: options.retrigger,
            max_voices: options.max_voices,
            icon: binding.icon().map(str::to_string),
            playing,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BindingsResponse {
    pub bindings: Vec<BindingResponse>,
}

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    trigger: String,
    /// File in the asset directory, or an absolute path.
    asset: String,
    /// Logical name; defaults to the file stem.
    name: Option<String>,
    #[serde(default)]
    overwrite: bool,
    #[serde(default)]
    looped: bool,
    retrigger: Option<Retrigger>,
    max_voices: Option<NonZeroU32>,
    /// File in the icon directory.
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameTriggerRequest {
    trigger: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlayResponse {
    pub status: String,
    pub trigger: String,
    pub instance: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopAllResponse {
    pub stopped: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub level: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeResponse {
    pub level: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssetResponse {
    pub name: String,
    pub file: String,
    pub format: String,
}

impl From<&AssetRef> for AssetResponse {
    fn from(asset: &AssetRef) -> Self {
        AssetResponse {
            name: asset.name().to_string(),
            file: asset.file().to_string(),
            format: asset.format().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssetsResponse {
    pub assets: Vec<AssetResponse>,
}

#[derive(Debug, Deserialize)]
pub struct RenameAssetRequest {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteAssetResponse {
    pub status: String,
    pub unbound: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetIconRequest {
    /// Null clears the icon.
    icon: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IconResponse {
    pub file: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IconsResponse {
    pub icons: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteIconResponse {
    pub status: String,
    pub cleared: Vec<String>,
}

// ============================================================================
// UI
// ============================================================================

/// GET / - The soundboard page
pub async fn index() -> Result<Html<Vec<u8>>, ApiError> {
    Web::get("index.html")
        .map(|file| Html(file.data.into_owned()))
        .ok_or(ApiError::NotFound("index.html"))
}

// ============================================================================
// Binding Endpoints
// ============================================================================

/// GET /api/bindings - All bindings with their playing state
pub async fn list_bindings(
    State(board): State<Arc<Soundboard>>,
) -> Result<Json<BindingsResponse>, ApiError> {
    let bindings: Vec<BindingResponse> = blocking(board, |board| {
        let playing = board.playing();
        Ok(board
            .list()
            .iter()
            .map(|binding| {
                let is_playing = playing.iter().any(|t| t == binding.trigger().as_str());
                BindingResponse::new(binding, is_playing)
            })
            .collect())
    })
    .await?;
    Ok(Json(BindingsResponse { bindings }))
}

/// POST /api/bindings - Bind a trigger to an asset
pub async fn bind(
    State(board): State<Arc<Soundboard>>,
    Json(req): Json<BindRequest>,
) -> Result<Json<BindingResponse>, ApiError> {
    info!(trigger = req.trigger, asset = req.asset, "Bind request");
    let binding = blocking(board, move |board| {
        let options = PlaybackOptions {
            looped: req.looped,
            retrigger: req.retrigger,
            max_voices: req.max_voices,
        };
        let source = AssetSource::Existing {
            name: req.name,
            file: req.asset,
        };
        let binding = board.bind_with_icon(
            &req.trigger,
            source,
            options,
            req.icon.as_deref(),
            req.overwrite,
        )?;
        Ok(BindingResponse::new(&binding, false))
    })
    .await?;
    Ok(Json(binding))
}

/// GET /api/bindings/:trigger - Resolve a trigger
pub async fn get_binding(
    State(board): State<Arc<Soundboard>>,
    Path(trigger): Path<String>,
) -> Result<Json<BindingResponse>, ApiError> {
    let binding = blocking(board, move |board| {
        let binding = board.binding(&trigger)?;
        Ok(BindingResponse::new(&binding, board.is_playing(&trigger)))
    })
    .await?;
    Ok(Json(binding))
}

/// DELETE /api/bindings/:trigger - Unbind a trigger
pub async fn unbind(
    State(board): State<Arc<Soundboard>>,
    Path(trigger): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    blocking(board, move |board| board.unbind(&trigger)).await?;
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/bindings/:trigger/rename - Rename a trigger
pub async fn rename_binding(
    State(board): State<Arc<Soundboard>>,
    Path(trigger): Path<String>,
    Json(req): Json<RenameTriggerRequest>,
) -> Result<Json<BindingResponse>, ApiError> {
    let binding = blocking(board, move |board| {
        let binding = board.rename(&trigger, &req.trigger)?;
        Ok(BindingResponse::new(&binding, false))
    })
    .await?;
    Ok(Json(binding))
}

/// PUT /api/bindings/:trigger/icon - Set or clear a pad's icon
pub async fn set_icon(
    State(board): State<Arc<Soundboard>>,
    Path(trigger): Path<String>,
    Json(req): Json<SetIconRequest>,
) -> Result<Json<BindingResponse>, ApiError> {
    let binding = blocking(board, move |board| {
        let binding = board.set_icon(&trigger, req.icon.as_deref())?;
        Ok(BindingResponse::new(&binding, board.is_playing(&trigger)))
    })
    .await?;
    Ok(Json(binding))
}

// ============================================================================
// Playback Endpoints
// ============================================================================

/// POST /api/play/:trigger - Play a trigger
pub async fn play(
    State(board): State<Arc<Soundboard>>,
    Path(trigger): Path<String>,
) -> Result<Json<PlayResponse>, ApiError> {
    let instance = blocking(board, move |board| board.play(&trigger)).await?;
    Ok(Json(PlayResponse {
        status: "playing".to_string(),
        trigger: instance.trigger().to_string(),
        instance: instance.id(),
    }))
}

/// POST /api/stop/:trigger - Stop a trigger
pub async fn stop(
    State(board): State<Arc<Soundboard>>,
    Path(trigger): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    blocking(board, move |board| board.stop(&trigger)).await?;
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/stop - Stop everything
pub async fn stop_all(
    State(board): State<Arc<Soundboard>>,
) -> Result<Json<StopAllResponse>, ApiError> {
    let stopped = blocking(board, |board| Ok(board.stop_all())).await?;
    Ok(Json(StopAllResponse { stopped }))
}

/// GET /api/volume - Current master volume
pub async fn get_volume(
    State(board): State<Arc<Soundboard>>,
) -> Result<Json<VolumeResponse>, ApiError> {
    let level = blocking(board, |board| board.volume()).await?;
    Ok(Json(VolumeResponse { level }))
}

/// POST /api/volume - Set the master volume (0.0 - 1.0)
pub async fn set_volume(
    State(board): State<Arc<Soundboard>>,
    Json(req): Json<VolumeRequest>,
) -> Result<Json<VolumeResponse>, ApiError> {
    let level = blocking(board, move |board| board.set_volume(req.level)).await?;
    Ok(Json(VolumeResponse { level }))
}

// ============================================================================
// Asset Endpoints
// ============================================================================

/// GET /api/assets - Audio files in the asset directory
pub async fn list_assets(
    State(board): State<Arc<Soundboard>>,
) -> Result<Json<AssetsResponse>, ApiError> {
    let assets = blocking(board, |board| board.assets()).await?;
    Ok(Json(AssetsResponse {
        assets: assets.iter().map(AssetResponse::from).collect(),
    }))
}

/// GET /api/assets/:name - Download an asset
pub async fn read_asset(
    State(board): State<Arc<Soundboard>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let content_type = content_type(&name);
    let bytes = blocking(board, move |board| board.read_asset(&name)).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// PUT /api/assets/:name - Upload an asset (raw body)
pub async fn upload_asset(
    State(board): State<Arc<Soundboard>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<AssetResponse>, ApiError> {
    info!(file = name, bytes = body.len(), "Upload request");
    let asset = blocking(board, move |board| board.import_asset(&name, &body)).await?;
    Ok(Json(AssetResponse::from(&asset)))
}

/// DELETE /api/assets/:name - Delete an asset and unbind its triggers
pub async fn delete_asset(
    State(board): State<Arc<Soundboard>>,
    Path(name): Path<String>,
) -> Result<Json<DeleteAssetResponse>, ApiError> {
    let unbound = blocking(board, move |board| board.delete_asset(&name)).await?;
    Ok(Json(DeleteAssetResponse {
        status: "ok".to_string(),
        unbound: unbound.iter().map(|t| t.to_string()).collect(),
    }))
}

/// POST /api/assets/:name/rename - Rename an asset; its bindings follow
pub async fn rename_asset(
    State(board): State<Arc<Soundboard>>,
    Path(name): Path<String>,
    Json(req): Json<RenameAssetRequest>,
) -> Result<Json<AssetResponse>, ApiError> {
    let asset = blocking(board, move |board| board.rename_asset(&name, &req.name)).await?;
    Ok(Json(AssetResponse::from(&asset)))
}

// ============================================================================
// Icon Endpoints
// ============================================================================

/// GET /api/icons - Images in the icon directory
pub async fn list_icons(
    State(board): State<Arc<Soundboard>>,
) -> Result<Json<IconsResponse>, ApiError> {
    let icons = blocking(board, |board| board.icons()).await?;
    Ok(Json(IconsResponse { icons }))
}

/// GET /api/icons/:name - Download an icon
pub async fn read_icon(
    State(board): State<Arc<Soundboard>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let (bytes, content_type) = blocking(board, move |board| board.read_icon(&name)).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// PUT /api/icons/:name - Upload an icon (raw body)
pub async fn upload_icon(
    State(board): State<Arc<Soundboard>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<IconResponse>, ApiError> {
    info!(file = name, bytes = body.len(), "Icon upload request");
    let file = blocking(board, move |board| board.import_icon(&name, &body)).await?;
    Ok(Json(IconResponse { file }))
}

/// DELETE /api/icons/:name - Delete an icon and clear it from its pads
pub async fn delete_icon(
    State(board): State<Arc<Soundboard>>,
    Path(name): Path<String>,
) -> Result<Json<DeleteIconResponse>, ApiError> {
    let cleared = blocking(board, move |board| board.delete_icon(&name)).await?;
    Ok(Json(DeleteIconResponse {
        status: "ok".to_string(),
        cleared: cleared.iter().map(|t| t.to_string()).collect(),
    }))
}

/// POST /api/icons/:name/rename - Rename an icon; its pads follow
pub async fn rename_icon(
    State(board): State<Arc<Soundboard>>,
    Path(name): Path<String>,
    Json(req): Json<RenameAssetRequest>,
) -> Result<Json<IconResponse>, ApiError> {
    let file = blocking(board, move |board| board.rename_icon(&name, &req.name)).await?;
    Ok(Json(IconResponse { file }))
}

fn content_type(file: &str) -> &'static str {
    match std::path::Path::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("wav") | Some("wave") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("ogg") | Some("oga") => "audio/ogg",
        _ => "application/octet-stream",
    }
}
