use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, Method,
};
use tower_http::cors::{Any, CorsLayer};

use crate::{config::AppConfig, middleware::request_id::REQUEST_ID_HEADER};

pub fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE, request_id.clone()])
        .expose_headers([request_id]);

    // Browsers reject credentialed responses with a wildcard origin.
    if config.cors_origins.iter().any(|origin| origin.trim() == "*") {
        return layer.allow_origin(Any).allow_credentials(false);
    }
    let origins = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect::<Vec<_>>();
    layer.allow_origin(origins).allow_credentials(true)
}
