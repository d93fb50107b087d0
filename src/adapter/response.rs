use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::endpoint::EndpointResponse;

impl IntoResponse for EndpointResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
