//! Response plumbing shared by the HTTP endpoints. Success payloads are
//! endpoint-specific structs serialized as-is; failures all share one JSON
//! shape carrying the error kind, so clients can branch on `success`.

use axum::Json;

use crate::errors::{ErrorKind, ToolError};

/// Marker for endpoint payload types. Erasure keeps the handlers free to
/// return whatever struct fits the endpoint while the router sees one
/// reply type.
pub(crate) trait Payload: erased_serde::Serialize {}
erased_serde::serialize_trait_object!(Payload);

#[derive(serde::Serialize, Debug)]
pub struct ApiFailure {
    pub success: bool,
    pub kind: ErrorKind,
    pub message: String,
}

/// One of: an endpoint payload, serialized transparently, or an
/// [`ApiFailure`].
#[derive(serde::Serialize)]
#[serde(untagged)]
pub(crate) enum ApiReply {
    Payload(Box<dyn Payload + Send + Sync>),
    Failure(ApiFailure),
}

pub(crate) fn reply<T>(payload: T) -> Json<ApiReply>
where
    T: Payload + Send + Sync + 'static,
{
    Json(ApiReply::Payload(Box::new(payload)))
}

pub(crate) fn failure(err: ToolError) -> Json<ApiReply> {
    Json(ApiReply::Failure(ApiFailure {
        success: false,
        kind: err.kind,
        message: err.message,
    }))
}
