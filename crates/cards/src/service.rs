use crate::migrate::{LegacyFieldMigrator, MigrationReport};
use crate::models::{
    Card, CardChanges, CardDraft, CardField, NameField, RawCardFields, ScalarField,
    UpdateCardRequest,
};
use crate::query::CardQuery;
use crate::repository::CardRepository;
use crate::upload::{PageStore, PageUpload, MAX_PAGES};
use common::cache::SuggestionCache;
use database::{RepositoryError, Database};
use tracing::instrument;

#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Database error: {0}")]
    Infrastructure(String),
    #[error("Page storage error: {0}")]
    Storage(String),
    #[error("Card not found")]
    NotFound,
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl From<RepositoryError> for CardError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => CardError::NotFound,
            RepositoryError::CheckViolation(msg) => CardError::InvalidInput(msg),
            RepositoryError::Infrastructure(e) => CardError::Infrastructure(e.to_string()),
            _ => CardError::Infrastructure(err.to_string()),
        }
    }
}

pub struct CardService;

impl CardService {
    #[instrument(skip(db))]
    pub async fn list_cards(db: &Database, query: &CardQuery) -> Result<Vec<Card>, CardError> {
        let mut uow = db.begin().await?;
        let mut repo = CardRepository::new(uow.connection());

        let cards = repo.list(query).await?;
        Ok(cards)
    }

    #[instrument(skip(db))]
    pub async fn get_card(db: &Database, owner_id: &str, id: i64) -> Result<Card, CardError> {
        let mut uow = db.begin().await?;
        let mut repo = CardRepository::new(uow.connection());

        repo.find_by_id(owner_id, id).await?.ok_or(CardError::NotFound)
    }

    #[instrument(skip(db, store, cache, pages), fields(page_count = pages.len()))]
    pub async fn create_card(
        db: &Database,
        store: &PageStore,
        cache: &SuggestionCache,
        owner_id: &str,
        fields: RawCardFields,
        pages: Vec<PageUpload>,
    ) -> Result<Card, CardError> {
        let draft = CardDraft::new(fields).map_err(CardError::InvalidInput)?;

        if pages.is_empty() {
            return Err(CardError::InvalidInput("At least one page image is required".into()));
        }
        if pages.len() > MAX_PAGES {
            return Err(CardError::InvalidInput(format!(
                "A card can have at most {} pages",
                MAX_PAGES
            )));
        }
        for page in &pages {
            page.check().map_err(CardError::InvalidInput)?;
        }

        let uris = store
            .save_all(&pages)
            .await
            .map_err(|e| CardError::Storage(e.to_string()))?;

        let result = Self::insert_card(db, owner_id, draft, uris.clone()).await;
        if result.is_err() {
            store.discard(&uris).await;
        }
        let card = result?;

        cache.invalidate(owner_id).await;
        tracing::info!(card_id = card.id, "Card created");
        Ok(card)
    }

    async fn insert_card(
        db: &Database,
        owner_id: &str,
        draft: CardDraft,
        uris: Vec<String>,
    ) -> Result<Card, CardError> {
        let new_card = draft.with_pages(uris).map_err(CardError::InvalidInput)?;

        let mut uow = db.begin().await?;
        let mut repo = CardRepository::new(uow.connection());

        let card = repo.create(owner_id, &new_card).await?;

        uow.commit().await?;
        Ok(card)
    }

    #[instrument(skip(db, cache, req))]
    pub async fn update_card(
        db: &Database,
        cache: &SuggestionCache,
        owner_id: &str,
        id: i64,
        req: UpdateCardRequest,
    ) -> Result<Card, CardError> {
        let changes = CardChanges::new(req).map_err(CardError::InvalidInput)?;

        let mut uow = db.begin().await?;
        let mut repo = CardRepository::new(uow.connection());

        let card = repo
            .update(owner_id, id, &changes)
            .await?
            .ok_or(CardError::NotFound)?;

        uow.commit().await?;

        cache.invalidate(owner_id).await;
        Ok(card)
    }

    #[instrument(skip(db, cache))]
    pub async fn delete_card(
        db: &Database,
        cache: &SuggestionCache,
        owner_id: &str,
        id: i64,
    ) -> Result<(), CardError> {
        let mut uow = db.begin().await?;
        let mut repo = CardRepository::new(uow.connection());

        if !repo.delete(owner_id, id).await? {
            return Err(CardError::NotFound);
        }

        uow.commit().await?;

        cache.invalidate(owner_id).await;
        Ok(())
    }

    #[instrument(skip(db))]
    pub async fn list_occasions(db: &Database, owner_id: &str) -> Result<Vec<String>, CardError> {
        let mut uow = db.begin().await?;
        let mut repo = CardRepository::new(uow.connection());

        let occasions = repo.distinct_values(owner_id, ScalarField::Occasion).await?;
        Ok(occasions)
    }

    #[instrument(skip(db))]
    pub async fn list_names(
        db: &Database,
        owner_id: &str,
        field: NameField,
    ) -> Result<Vec<String>, CardError> {
        let mut uow = db.begin().await?;
        let mut repo = CardRepository::new(uow.connection());

        let names = repo.distinct_names(owner_id, field).await?;
        Ok(names)
    }

    #[instrument(skip(db, cache))]
    pub async fn autocomplete(
        db: &Database,
        cache: &SuggestionCache,
        owner_id: &str,
        field: CardField,
    ) -> Result<Vec<String>, CardError> {
        if let Some(values) = cache.get(owner_id, field.as_str()).await {
            return Ok(values);
        }
        let generation = cache.generation().await;

        let mut uow = db.begin().await?;
        let mut repo = CardRepository::new(uow.connection());

        let values = match field {
            CardField::Names(names) => repo.distinct_names(owner_id, names).await?,
            CardField::Scalar(scalar) => repo.distinct_values(owner_id, scalar).await?,
        };

        cache.put(owner_id, field.as_str(), generation, values.clone()).await;
        Ok(values)
    }

    #[instrument(skip(db, cache))]
    pub async fn migrate_to_arrays(
        db: &Database,
        cache: &SuggestionCache,
    ) -> Result<MigrationReport, CardError> {
        let report = LegacyFieldMigrator::new(db).run().await?;
        cache.clear().await;
        Ok(report)
    }
}
