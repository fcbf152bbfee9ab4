use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Username must not be empty."
    ))]
    pub username: String,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Password must not be empty."
    ))]
    pub password: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub authenticated: bool,
}

/// Handler to authenticate a user against the directory.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let Some(auth) = &state.auth else {
        tracing::error!(
            "`ldap` entry missing on `config.yaml` file, login is disabled"
        );
        return Err(ServerError::Unauthorized);
    };

    let authenticated =
        auth.authenticate(&body.username, &body.password).await;

    let outcome = if authenticated { "success" } else { "failure" };
    metrics::counter!("login_attempts_total", "outcome" => outcome)
        .increment(1);

    if !authenticated {
        return Err(ServerError::Unauthorized);
    }

    Ok(Json(Response {
        authenticated: true,
    }))
}
