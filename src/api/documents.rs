//! Document endpoints
//!
//! A fixed catalogue standing in for document storage. Listing is open to
//! anonymous callers; creating needs `documents:edit`.

use axum::{Json, Router, http::StatusCode, middleware, routing::get};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::{CurrentUser, MaybeUser, Permission, attach_session};
use crate::error::{AppError, Result};

/// Create documents router
///
/// Routes:
/// - GET /documents - List documents (attach)
/// - POST /documents - Create a document (require + documents:edit)
pub fn documents_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/documents", get(list_documents).post(create_document))
        .route_layer(middleware::from_fn_with_state(state, attach_session))
}

#[derive(Debug, Clone, Serialize)]
struct DocumentSummary {
    id: &'static str,
    title: &'static str,
    visibility: &'static str,
}

const PUBLIC_DOCUMENTS: &[DocumentSummary] = &[DocumentSummary {
    id: "doc-1",
    title: "Public sample document",
    visibility: "public",
}];

const PRIVATE_DOCUMENTS: &[DocumentSummary] = &[DocumentSummary {
    id: "doc-2",
    title: "Team working draft",
    visibility: "private",
}];

#[derive(Debug, Serialize)]
struct DocumentList {
    /// "public" for anonymous readers, otherwise the session type
    mode: &'static str,
    items: Vec<DocumentSummary>,
}

/// GET /documents
async fn list_documents(MaybeUser(session): MaybeUser) -> Json<DocumentList> {
    let reader = session.filter(|session| session.allows(Permission::DocumentsRead));

    let list = match reader {
        Some(session) => DocumentList {
            mode: session.kind.as_str(),
            items: PUBLIC_DOCUMENTS
                .iter()
                .chain(PRIVATE_DOCUMENTS)
                .cloned()
                .collect(),
        },
        None => DocumentList {
            mode: "public",
            items: PUBLIC_DOCUMENTS.to_vec(),
        },
    };

    Json(list)
}

#[derive(Debug, Deserialize)]
struct CreateDocumentRequest {
    #[serde(default)]
    title: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct CreatedDocument {
    id: String,
    title: String,
    owner: String,
}

/// POST /documents
async fn create_document(
    current: CurrentUser,
    body: Option<Json<CreateDocumentRequest>>,
) -> Result<(StatusCode, Json<CreatedDocument>)> {
    current.require(Permission::DocumentsEdit)?;
    let CurrentUser(session) = current;

    let title = body
        .and_then(|Json(request)| request.title)
        .and_then(|title| title.as_str().map(ToOwned::to_owned))
        .filter(|title| !title.is_empty())
        .ok_or_else(|| AppError::Validation("title is required".to_string()))?;

    let owner = session
        .user
        .username
        .clone()
        .unwrap_or_else(|| session.user.name.clone());

    let document = CreatedDocument {
        id: format!("doc-{}", ulid::Ulid::new()),
        title,
        owner,
    };

    tracing::info!(id = %document.id, owner = %document.owner, "Document created");

    Ok((StatusCode::CREATED, Json(document)))
}
