//! Module handlers: multipart upload, listings, download, distribution.

use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use storm_core::ModuleMeta;
use storm_registry::ModuleUpload;

use crate::ApiState;
use crate::error::ApiError;

/// POST /modules — multipart fields: name, version, description, file.
pub async fn upload_module(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut name = None;
    let mut version = None;
    let mut description = String::new();
    let mut file_name = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("unreadable multipart body: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" => name = Some(read_text(field).await?),
            "version" => version = Some(read_text(field).await?),
            "description" => description = read_text(field).await?,
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::validation(format!("unreadable file field: {e}")))?
                        .to_vec(),
                );
            }
            other => {
                return Err(ApiError::validation(format!(
                    "unexpected multipart field: {other:?}"
                )));
            }
        }
    }

    let name = name.filter(|n| !n.is_empty()).ok_or_else(|| {
        ApiError::validation("module name is required")
    })?;
    let version = version.filter(|v| !v.is_empty()).ok_or_else(|| {
        ApiError::validation("module version is required")
    })?;
    let bytes = bytes.ok_or_else(|| ApiError::validation("file field is required"))?;

    let meta = state.modules.upload(
        ModuleUpload {
            file_name: file_name.unwrap_or_else(|| format!("{name}-{version}.bin")),
            name,
            version,
            description,
            uploaded_by: "operator".to_string(),
        },
        &bytes,
    )?;
    let location = format!("/modules/{}/{}", meta.name, meta.version);
    Ok((
        StatusCode::CREATED,
        [(axum::http::header::LOCATION, location)],
        Json(meta),
    ))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::validation(format!("unreadable multipart field: {e}")))
}

/// GET /modules
pub async fn list_modules(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ModuleMeta>>, ApiError> {
    Ok(Json(state.modules.find_all()?))
}

/// GET /modules/{name}
pub async fn list_versions(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ModuleMeta>>, ApiError> {
    let versions = state.modules.find_by_name(&name)?;
    if versions.is_empty() {
        return Err(ApiError::not_found(
            "MODULE_NOT_FOUND",
            format!("module not found: {name}"),
        ));
    }
    Ok(Json(versions))
}

/// GET /modules/{name}/{version}
pub async fn get_module(
    State(state): State<ApiState>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<ModuleMeta>, ApiError> {
    state
        .modules
        .find(&name, &version)?
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found(
                "MODULE_NOT_FOUND",
                format!("module not found: {name}:{version}"),
            )
        })
}

/// GET /modules/{name}/{version}/download
pub async fn download_module(
    State(state): State<ApiState>,
    Path((name, version)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let meta = state.modules.find(&name, &version)?.ok_or_else(|| {
        ApiError::not_found(
            "MODULE_NOT_FOUND",
            format!("module not found: {name}:{version}"),
        )
    })?;
    let bytes = state.modules.open(&name, &version)?;
    Ok((
        StatusCode::OK,
        [
            (
                axum::http::header::CONTENT_TYPE,
                "application/octet-stream".to_string(),
            ),
            (
                axum::http::header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", meta.file_name),
            ),
        ],
        bytes,
    ))
}

/// DELETE /modules/{name}/{version}
pub async fn delete_module(
    State(state): State<ApiState>,
    Path((name, version)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    if !state.modules.delete(&name, &version)? {
        return Err(ApiError::not_found(
            "MODULE_NOT_FOUND",
            format!("module not found: {name}:{version}"),
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionResponse {
    /// Nodes the artifact was pushed to.
    pub count: u32,
    pub already_present: u32,
    pub failures: Vec<DistributionFailure>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionFailure {
    pub node_id: String,
    pub error: String,
}

/// POST /modules/{name}/{version}/distribute
pub async fn distribute_all(
    State(state): State<ApiState>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<DistributionResponse>, ApiError> {
    let report = state.distributor.distribute_to_all_nodes(&name, &version).await?;
    Ok(Json(DistributionResponse {
        count: report.pushed,
        already_present: report.already_present,
        failures: report
            .failures
            .into_iter()
            .map(|(node_id, error)| DistributionFailure { node_id, error })
            .collect(),
    }))
}

/// POST /modules/{name}/{version}/distribute/{nodeId}
pub async fn distribute_node(
    State(state): State<ApiState>,
    Path((name, version, node_id)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .distributor
        .distribute_to_node(&name, &version, &node_id)
        .await?;
    Ok(StatusCode::OK)
}
