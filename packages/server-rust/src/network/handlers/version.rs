/// `GET /version`: the server's crate version as plain text.
pub async fn version_handler() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
