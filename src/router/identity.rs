use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use validator::{ValidationError, ValidationErrors};

use crate::AppState;
use crate::directory::DirectoryRecord;
use crate::error::{Result, ServerError};

#[derive(Debug, Deserialize)]
pub struct Params {
    username: Option<String>,
    email: Option<String>,
}

fn missing_selector() -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add(
        "username",
        ValidationError::new("username")
            .with_message("Provide `username` or `email`.".into()),
    );
    errors
}

/// Handler to resolve a directory identity by username and/or email.
pub async fn handler(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<DirectoryRecord>> {
    let username = params.username.as_deref().filter(|u| !u.is_empty());
    let email = params.email.as_deref().filter(|e| !e.is_empty());

    if username.is_none() && email.is_none() {
        return Err(missing_selector().into());
    }

    let Some(auth) = &state.auth else {
        return Err(ServerError::NotFound);
    };

    match auth.lookup_identity(username, email).await {
        Some(identity) => Ok(Json(identity)),
        None => Err(ServerError::NotFound),
    }
}
