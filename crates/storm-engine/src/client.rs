//! The engine HTTP client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use storm_core::{HttpTimeouts, MatchEndpoints, ModuleMeta};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Engine acknowledgement of a created match.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMatch {
    #[serde(rename = "matchId")]
    pub local_match_id: String,
    pub endpoints: MatchEndpoints,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMatchBody<'a> {
    match_id: &'a str,
    modules: &'a [String],
}

/// Client toward a node's engine. Cheap to clone; the underlying connection
/// pool is shared.
#[derive(Clone)]
pub struct EngineClient {
    http: reqwest::Client,
    token: Option<String>,
}

impl EngineClient {
    pub fn new(timeouts: &HttpTimeouts, token: Option<String>) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .timeout(Duration::from_secs(timeouts.read_secs))
            .build()
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(Self { http, token })
    }

    /// Ask the engine to start a match in the given container. The control
    /// plane mints the local match id; the engine echoes it with the
    /// advertise endpoints.
    pub async fn create_match(
        &self,
        address: &str,
        container_id: &str,
        local_match_id: &str,
        modules: &[String],
    ) -> EngineResult<EngineMatch> {
        let url = join(address, &format!("containers/{container_id}/matches"));
        let body = CreateMatchBody {
            match_id: local_match_id,
            modules,
        };
        let response = self
            .authed(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;
        let ack: EngineMatch = response
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;
        debug!(%url, match_id = %ack.local_match_id, "engine acknowledged match");
        Ok(ack)
    }

    pub async fn finish_match(
        &self,
        address: &str,
        container_id: &str,
        local_match_id: &str,
    ) -> EngineResult<()> {
        let url = join(
            address,
            &format!("containers/{container_id}/matches/{local_match_id}/finish"),
        );
        let response = self
            .authed(self.http.post(&url))
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn delete_match(
        &self,
        address: &str,
        container_id: &str,
        local_match_id: &str,
    ) -> EngineResult<()> {
        let url = join(
            address,
            &format!("containers/{container_id}/matches/{local_match_id}"),
        );
        let response = self
            .authed(self.http.delete(&url))
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await?;
        Ok(())
    }

    /// Probe whether the node already holds the artifact with this hash.
    pub async fn has_module(&self, address: &str, hash: &str) -> EngineResult<bool> {
        let url = join(address, &format!("modules/{hash}"));
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(transport)?;
        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        check_status(response).await?;
        Ok(true)
    }

    /// Push artifact bytes to the node, keyed by content hash.
    pub async fn distribute_module(
        &self,
        address: &str,
        meta: &ModuleMeta,
        bytes: Vec<u8>,
    ) -> EngineResult<()> {
        let url = join(address, &format!("modules/{}", meta.hash));
        let response = self
            .authed(self.http.put(&url))
            .header("x-module-name", &meta.name)
            .header("x-module-version", &meta.version)
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await?;
        debug!(%url, module = %meta.name, "module pushed to node");
        Ok(())
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn join(address: &str, path: &str) -> String {
    format!("{}/{}", address.trim_end_matches('/'), path)
}

fn transport(e: reqwest::Error) -> EngineError {
    EngineError::Transport(e.to_string())
}

async fn check_status(response: reqwest::Response) -> EngineResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(EngineError::Status {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post, put};

    fn client() -> EngineClient {
        EngineClient::new(&HttpTimeouts::default(), Some("cp-token".to_string())).unwrap()
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn create_match_round_trips_ack() {
        let router = Router::new().route(
            "/containers/{container}/matches",
            post(
                |Path(container): Path<String>, body: axum::Json<serde_json::Value>| async move {
                    assert_eq!(container, "c0");
                    let local = body.0["matchId"].as_str().unwrap().to_string();
                    axum::Json(serde_json::json!({
                        "matchId": local,
                        "endpoints": {
                            "httpBase": "http://n1:8080/matches/m1",
                            "wsBase": "ws://n1:8080/matches/m1",
                        }
                    }))
                },
            ),
        );
        let addr = serve(router).await;

        let ack = client()
            .create_match(&addr, "c0", "m1", &["entity-module".to_string()])
            .await
            .unwrap();
        assert_eq!(ack.local_match_id, "m1");
        assert_eq!(ack.endpoints.http_base, "http://n1:8080/matches/m1");
    }

    #[tokio::test]
    async fn engine_5xx_is_unavailable() {
        let router = Router::new().route(
            "/containers/{container}/matches",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let addr = serve(router).await;

        let err = client()
            .create_match(&addr, "c0", "m1", &[])
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(matches!(err, EngineError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn connection_refused_is_transport() {
        let err = client()
            .create_match("http://127.0.0.1:1", "c0", "m1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn has_module_maps_404_to_false() {
        let router = Router::new().route(
            "/modules/{hash}",
            get(|Path(hash): Path<String>| async move {
                if hash == "present" {
                    StatusCode::OK
                } else {
                    StatusCode::NOT_FOUND
                }
            }),
        );
        let addr = serve(router).await;

        let client = client();
        assert!(client.has_module(&addr, "present").await.unwrap());
        assert!(!client.has_module(&addr, "absent").await.unwrap());
    }

    #[tokio::test]
    async fn distribute_module_pushes_bytes_with_headers() {
        let router = Router::new().route(
            "/modules/{hash}",
            put(
                |Path(hash): Path<String>,
                 headers: axum::http::HeaderMap,
                 body: axum::body::Bytes| async move {
                    assert_eq!(hash, "deadbeef");
                    assert_eq!(headers["x-module-name"], "entity-module");
                    assert_eq!(headers["x-module-version"], "1.0.0");
                    assert_eq!(&body[..], b"artifact");
                    StatusCode::CREATED
                },
            ),
        );
        let addr = serve(router).await;

        let bytes = b"artifact".to_vec();
        let meta = ModuleMeta {
            name: "entity-module".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            file_name: "entity-module.wasm".to_string(),
            file_size: bytes.len() as u64,
            hash: "deadbeef".to_string(),
            uploaded_by: "ops".to_string(),
            uploaded_at: 1000,
        };
        client()
            .distribute_module(&addr, &meta, bytes)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn finish_match_hits_finish_route() {
        let router = Router::new().route(
            "/containers/{container}/matches/{id}/finish",
            post(|| async { StatusCode::OK }),
        );
        let addr = serve(router).await;
        client().finish_match(&addr, "c0", "m1").await.unwrap();
    }
}
