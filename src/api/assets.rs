//! Embedded entry and chat pages
//!
//! In development, falls back to serving from the filesystem.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::{Html, IntoResponse, Response},
};
use rust_embed::Embed;
use std::path::PathBuf;

const UI_DIR: &str = "ui";

#[derive(Embed)]
#[folder = "ui"]
struct Assets;

/// Serve files under `/assets/`, embedded first, then from disk
pub async fn serve_static(req: Request<Body>) -> Response {
    let path = req.uri().path().trim_start_matches('/');

    if let Some(content) = Assets::get(path) {
        return with_mime(path, content.data.into_owned());
    }

    let fs_path = PathBuf::from(UI_DIR).join(path);
    if !path.contains("..") && fs_path.is_file() {
        if let Ok(content) = std::fs::read(&fs_path) {
            return with_mime(path, content);
        }
    }

    (StatusCode::NOT_FOUND, "Not found").into_response()
}

/// Serve a top-level HTML page by file name
pub fn serve_page(name: &str) -> Response {
    let html = Assets::get(name)
        .and_then(|content| String::from_utf8(content.data.into_owned()).ok())
        .or_else(|| std::fs::read_to_string(PathBuf::from(UI_DIR).join(name)).ok());

    match html {
        Some(content) => Html(content).into_response(),
        None => (StatusCode::NOT_FOUND, Html(format!("<h1>404 - {name} not found</h1>"))).into_response(),
    }
}

fn with_mime(path: &str, body: Vec<u8>) -> Response {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    ([(header::CONTENT_TYPE, mime.as_ref().to_string())], body).into_response()
}
