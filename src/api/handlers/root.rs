//! Service banner for `/`.

use axum::response::IntoResponse;

use crate::APP_USER_AGENT;

pub async fn root() -> impl IntoResponse {
    APP_USER_AGENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn root_returns_name_and_version() {
        let response = root().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
