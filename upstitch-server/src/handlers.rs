//! HTTP request handlers for the upload server

use hyper::header::{HeaderValue, CONTENT_TYPE, SERVER};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, info};
use upstitch_core::{response, UploadOutcome};
use upstitch_engine::UploadAssembler;
use crate::context::RequestContext;

const SERVER_HEADER: &str = concat!("upstitch/", env!("CARGO_PKG_VERSION"));

/// Shared state for every connection
pub struct AppState {
    pub assembler: UploadAssembler,
    pub upload_path: String,
}

/// Main request handler
pub async fn handle_request(
    req: Request<Body>,
    state: Arc<AppState>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("Handling {} {}", method, path);

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => handle_health(),
        (&Method::POST, p) if p == state.upload_path => handle_upload(req, &state.assembler).await,
        _ => json_response(StatusCode::NOT_FOUND, json!({"error": "Not found"}).to_string()),
    };

    info!("{} {} -> {}", method, path, response.status());
    Ok(response)
}

fn handle_health() -> Response<Body> {
    json_response(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "service": "upstitch",
            "timestamp": chrono::Utc::now().to_rfc3339()
        })
        .to_string(),
    )
}

/// Upload handler; failures are reported in the body with status 200
async fn handle_upload(req: Request<Body>, assembler: &UploadAssembler) -> Response<Body> {
    let outcome = match RequestContext::parse(req, &assembler.config().temp_dir).await {
        Ok(context) => context.handle(assembler).await,
        Err(e) => {
            error!("Problem parsing upload request: {}", e);
            UploadOutcome::failure(e.to_string())
        }
    };

    text_response(StatusCode::OK, response::encode(&outcome))
}

fn json_response(status: StatusCode, body: String) -> Response<Body> {
    build_response(status, "application/json", body)
}

fn text_response(status: StatusCode, body: String) -> Response<Body> {
    build_response(status, "text/plain", body)
}

fn build_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(SERVER, HeaderValue::from_static(SERVER_HEADER));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::CONTENT_LENGTH;
    use upstitch_engine::UploadConfig;

    fn state() -> (Arc<AppState>, tempfile::TempDir) {
        let (config, temp) = UploadConfig::temp().unwrap();
        let state = AppState {
            assembler: UploadAssembler::new(config).unwrap(),
            upload_path: "/upload".to_string(),
        };
        (Arc::new(state), temp)
    }

    async fn body_string(response: Response<Body>) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _temp) = state();
        let req = Request::get("/health").body(Body::empty()).unwrap();

        let response = handle_request(req, state).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "upstitch");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (state, _temp) = state();
        let req = Request::get("/upload").body(Body::empty()).unwrap();

        let response = handle_request(req, state).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, r#"{"error":"Not found"}"#);
    }

    #[tokio::test]
    async fn test_raw_upload_success() {
        let (state, _temp) = state();
        let req = Request::post("/upload?qqfile=hello.txt")
            .header(CONTENT_LENGTH, "5")
            .body(Body::from("hello"))
            .unwrap();

        let response = handle_request(req, state.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(body_string(response).await, r#"{"success": true}"#);

        let written = state.assembler.config().upload_dir.join("hello.txt");
        assert_eq!(std::fs::read(written).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_raw_upload_size_mismatch_is_still_200() {
        let (state, _temp) = state();
        let req = Request::post("/upload?qqfile=short.txt")
            .header(CONTENT_LENGTH, "10")
            .body(Body::from("12345"))
            .unwrap();

        let response = handle_request(req, state).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            r#"{"error": "Unexpected file size mismatch. Actual bytes 5. Expected bytes 10."}"#
        );
    }

    #[tokio::test]
    async fn test_malformed_multipart_is_reported_in_body() {
        let (state, _temp) = state();
        let req = Request::post("/upload")
            .header(CONTENT_TYPE, "multipart/form-data; boundary=abc")
            .body(Body::from("garbage"))
            .unwrap();

        let response = handle_request(req, state).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(body["error"].is_string());
        assert!(body.get("success").is_none());
    }
}
