use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json, Redirect},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ApiError;
use crate::handlers::AppState;
use crate::models::{Product, SessionFilters};

const CHAT_SOURCE: &str = "chatgpt";

#[derive(Debug, Deserialize)]
pub struct ChatCheckoutQuery {
    pub intent: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub budget: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopResponse {
    pub session_id: String,
    pub filters: SessionFilters,
    pub products: Vec<Product>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ChatCheckoutQuery {
    fn into_filters(self) -> Result<SessionFilters, ApiError> {
        let source = non_empty(self.source).unwrap_or_default();
        if !source.eq_ignore_ascii_case(CHAT_SOURCE) {
            return Err(ApiError::bad_request("Invalid request source"));
        }

        let intent = non_empty(self.intent)
            .ok_or_else(|| ApiError::bad_request("Missing shopping intent"))?;

        let budget = match non_empty(self.budget) {
            Some(raw) => Some(
                raw.parse::<i64>()
                    .map_err(|_| ApiError::bad_request("budget must be a whole number"))?,
            ),
            None => None,
        };

        Ok(SessionFilters {
            intent: Some(intent),
            color: non_empty(self.color),
            size: non_empty(self.size),
            budget,
        })
    }
}

// GET /chat-checkout
pub async fn chat_checkout(
    State(state): State<AppState>,
    Query(query): Query<ChatCheckoutQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = query.into_filters()?;
    let session = state.services.sessions.put(filters).await?;
    info!(session_id = %session.session_id, "Chat checkout session started");

    Ok(Redirect::to(&format!("/shop?session={}", session.session_id)))
}

// GET /shop?session=
pub async fn shop(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.services.sessions.require(&query.session).await?;
    let products = state.services.catalog.search(&session.filters).await?;

    Ok(Json(ShopResponse {
        session_id: session.session_id,
        filters: session.filters,
        products,
    }))
}
