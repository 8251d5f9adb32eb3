use crate::migrate::MigrationReport;
use crate::models::{Card, CardField, NameField, RawCardFields, UpdateCardRequest};
use crate::query::{CardQuery, ListCardsParams};
use crate::service::{CardError, CardService};
use crate::upload::{PageStore, PageUpload, MAX_PAGES, MAX_PAGE_BYTES};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use common::{auth::OwnerId, AppState};
use std::sync::Arc;
use serde_json::json;

/// Room for the maximum number of full-size pages plus the text fields.
const UPLOAD_BODY_LIMIT: usize = MAX_PAGES * MAX_PAGE_BYTES + 1024 * 1024;

impl IntoResponse for CardError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            CardError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            CardError::NotFound => (StatusCode::NOT_FOUND, "Card not found".to_string()),
            CardError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            CardError::Infrastructure(msg) | CardError::Storage(msg) => {
                tracing::error!("Card request failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": msg }))).into_response()
    }
}

pub fn cards_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/cards", get(list_cards))
        .route("/cards/{id}", get(get_card).put(update_card).delete(delete_card))
        .route("/occasions", get(list_occasions))
        .route("/froms", get(list_froms))
        .route("/tos", get(list_tos))
        .route("/autocomplete/{field}", get(autocomplete))
        .route(
            "/upload",
            post(upload_card).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/migrate-to-arrays", post(migrate_to_arrays))
        .with_state(state)
}

// Ids that do not parse cannot name a card the caller owns.
fn parse_card_id(raw: &str) -> Result<i64, CardError> {
    raw.trim().parse().map_err(|_| CardError::NotFound)
}

async fn list_cards(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerId>,
    Query(params): Query<ListCardsParams>,
) -> Result<Json<Vec<Card>>, CardError> {
    let query = CardQuery::from_params(owner.0, params);
    let cards = CardService::list_cards(&state.db, &query).await?;
    Ok(Json(cards))
}

async fn get_card(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<String>,
) -> Result<Json<Card>, CardError> {
    let id = parse_card_id(&id)?;
    let card = CardService::get_card(&state.db, owner.as_str(), id).await?;
    Ok(Json(card))
}

async fn list_occasions(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerId>,
) -> Result<Json<Vec<String>>, CardError> {
    let occasions = CardService::list_occasions(&state.db, owner.as_str()).await?;
    Ok(Json(occasions))
}

async fn list_froms(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerId>,
) -> Result<Json<Vec<String>>, CardError> {
    let names = CardService::list_names(&state.db, owner.as_str(), NameField::From).await?;
    Ok(Json(names))
}

async fn list_tos(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerId>,
) -> Result<Json<Vec<String>>, CardError> {
    let names = CardService::list_names(&state.db, owner.as_str(), NameField::To).await?;
    Ok(Json(names))
}

async fn autocomplete(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerId>,
    Path(field): Path<String>,
) -> Result<Json<Vec<String>>, CardError> {
    let field: CardField = field.parse().map_err(CardError::InvalidInput)?;
    let values =
        CardService::autocomplete(&state.db, &state.suggestions, owner.as_str(), field).await?;
    Ok(Json(values))
}

async fn upload_card(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerId>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, CardError> {
    let mut fields = RawCardFields::default();
    let mut pages = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CardError::InvalidInput(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "pages" || name == "pages[]" {
            if pages.len() >= MAX_PAGES {
                return Err(CardError::InvalidInput(format!(
                    "A card can have at most {} pages",
                    MAX_PAGES
                )));
            }
            let file_name = field.file_name().unwrap_or("page").to_string();
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| CardError::InvalidInput(e.body_text()))?;
            // An empty file input still submits a part.
            if bytes.is_empty() {
                continue;
            }
            pages.push(PageUpload { file_name, content_type, bytes });
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| CardError::InvalidInput(e.body_text()))?;
            fields.set(&name, value);
        }
    }

    let store = PageStore::new(&state.config.upload_dir);
    let card = CardService::create_card(
        &state.db,
        &store,
        &state.suggestions,
        owner.as_str(),
        fields,
        pages,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(json!({ "success": true, "card": card }))))
}

async fn update_card(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateCardRequest>, JsonRejection>,
) -> Result<Json<Card>, CardError> {
    let id = parse_card_id(&id)?;
    let Json(req) = payload.map_err(|e| CardError::InvalidInput(e.body_text()))?;
    let card = CardService::update_card(&state.db, &state.suggestions, owner.as_str(), id, req).await?;
    Ok(Json(card))
}

async fn delete_card(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CardError> {
    let id = parse_card_id(&id)?;
    CardService::delete_card(&state.db, &state.suggestions, owner.as_str(), id).await?;
    Ok(Json(json!({ "message": "Card deleted successfully" })))
}

async fn migrate_to_arrays(
    State(state): State<Arc<AppState>>,
    Extension(owner): Extension<OwnerId>,
) -> Result<Json<MigrationReport>, CardError> {
    if !state.config.is_admin(owner.as_str()) {
        tracing::warn!(owner = owner.as_str(), "Non-admin attempted migrate-to-arrays");
        return Err(CardError::Forbidden("Administrator access required".into()));
    }
    let report = CardService::migrate_to_arrays(&state.db, &state.suggestions).await?;
    Ok(Json(report))
}
