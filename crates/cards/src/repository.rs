use crate::models::{
    decode_stored_names, encode_names, Card, CardChanges, FlipOrientation, NameField, NewCard,
    ScalarField,
};
use crate::query::{names_array, CardQuery, CARD_COLUMNS};
use chrono::{DateTime, SubsecRound, Utc};
use database::{self, RepositoryError};
use sqlx::{FromRow, QueryBuilder, Sqlite};

/// Fixed-width UTC timestamps so that ordering by the text column is chronological.
const UPLOAD_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

#[derive(FromRow)]
struct CardRecord {
    id: i64,
    owner_id: String,
    title: String,
    senders: Option<String>,
    recipients: Option<String>,
    occasion: String,
    pages: String,
    flip_orientation: String,
    note: String,
    upload_date: String,
}

fn decode_error<E>(err: E) -> RepositoryError
where
    E: std::error::Error + Send + Sync + 'static,
{
    RepositoryError::Infrastructure(sqlx::Error::Decode(Box::new(err)))
}

impl TryFrom<CardRecord> for Card {
    type Error = RepositoryError;

    fn try_from(record: CardRecord) -> Result<Self, Self::Error> {
        let pages: Vec<String> = serde_json::from_str(&record.pages).map_err(decode_error)?;
        let upload_date = DateTime::parse_from_rfc3339(&record.upload_date)
            .map_err(decode_error)?
            .with_timezone(&Utc);

        Ok(Card {
            id: record.id,
            owner_id: record.owner_id,
            title: record.title,
            from: decode_stored_names(record.senders.as_deref()),
            to: decode_stored_names(record.recipients.as_deref()),
            occasion: record.occasion,
            pages,
            flip_orientation: record
                .flip_orientation
                .parse()
                .unwrap_or(FlipOrientation::Horizontal),
            note: record.note,
            upload_date,
        })
    }
}

/// A card whose `from` or `to` column still holds a bare string.
#[derive(Debug, FromRow)]
pub(crate) struct LegacyNameRow {
    pub id: i64,
    pub senders: Option<String>,
    pub recipients: Option<String>,
}

pub(crate) struct CardRepository<'a> {
    conn: &'a mut database::Connection,
}

impl<'a> CardRepository<'a> {
    pub fn new(conn: &'a mut database::Connection) -> Self {
        Self { conn }
    }

    pub async fn create(&mut self, owner_id: &str, card: &NewCard) -> Result<Card, RepositoryError> {
        let upload_date = Utc::now().trunc_subsecs(6).format(UPLOAD_DATE_FORMAT).to_string();
        self.insert(owner_id, card, &upload_date).await
    }

    async fn insert(
        &mut self,
        owner_id: &str,
        card: &NewCard,
        upload_date: &str,
    ) -> Result<Card, RepositoryError> {
        let record = sqlx::query_as::<_, CardRecord>(&format!(
            "INSERT INTO cards (owner_id, title, senders, recipients, occasion, pages, flip_orientation, note, upload_date) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
            CARD_COLUMNS
        ))
        .bind(owner_id)
        .bind(card.title())
        .bind(encode_names(card.from()))
        .bind(encode_names(card.to()))
        .bind(card.occasion())
        .bind(encode_names(card.pages()))
        .bind(card.flip_orientation().as_str())
        .bind(card.note())
        .bind(upload_date)
        .fetch_one(&mut *self.conn)
        .await?;

        record.try_into()
    }

    pub async fn list(&mut self, query: &CardQuery) -> Result<Vec<Card>, RepositoryError> {
        let mut qb = query.build();
        let records = qb
            .build_query_as::<CardRecord>()
            .fetch_all(&mut *self.conn)
            .await?;

        let cards = records
            .into_iter()
            .map(Card::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(query.finish(cards))
    }

    pub async fn find_by_id(&mut self, owner_id: &str, id: i64) -> Result<Option<Card>, RepositoryError> {
        let record = sqlx::query_as::<_, CardRecord>(&format!(
            "SELECT {} FROM cards WHERE id = $1 AND owner_id = $2",
            CARD_COLUMNS
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        record.map(Card::try_from).transpose()
    }

    pub async fn distinct_values(
        &mut self,
        owner_id: &str,
        field: ScalarField,
    ) -> Result<Vec<String>, RepositoryError> {
        let values = sqlx::query_scalar::<_, String>(&format!(
            "SELECT DISTINCT {col} FROM cards WHERE owner_id = $1 AND trim({col}) <> '' ORDER BY {col}",
            col = field.column()
        ))
        .bind(owner_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(values)
    }

    /// Distinct names across every card's list, flattening arrays first.
    pub async fn distinct_names(
        &mut self,
        owner_id: &str,
        field: NameField,
    ) -> Result<Vec<String>, RepositoryError> {
        let names = sqlx::query_scalar::<_, String>(&format!(
            "SELECT DISTINCT trim(json_each.value) AS name FROM cards, json_each({}) \
             WHERE cards.owner_id = $1 AND json_each.type = 'text' AND trim(json_each.value) <> '' \
             ORDER BY name",
            names_array(field.column())
        ))
        .bind(owner_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(names)
    }

    /// Applies `changes` to the owner's card. `None` when no such card is visible.
    pub async fn update(
        &mut self,
        owner_id: &str,
        id: i64,
        changes: &CardChanges,
    ) -> Result<Option<Card>, RepositoryError> {
        if changes.is_empty() {
            return self.find_by_id(owner_id, id).await;
        }

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new("UPDATE cards SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(title) = changes.title() {
                set.push("title = ").push_bind_unseparated(title.to_string());
            }
            if let Some(from) = changes.from() {
                set.push("senders = ").push_bind_unseparated(encode_names(from));
            }
            if let Some(to) = changes.to() {
                set.push("recipients = ").push_bind_unseparated(encode_names(to));
            }
            if let Some(occasion) = changes.occasion() {
                set.push("occasion = ").push_bind_unseparated(occasion.to_string());
            }
            if let Some(pages) = changes.pages() {
                set.push("pages = ").push_bind_unseparated(encode_names(pages));
            }
            if let Some(orientation) = changes.flip_orientation() {
                set.push("flip_orientation = ").push_bind_unseparated(orientation.as_str());
            }
            if let Some(note) = changes.note() {
                set.push("note = ").push_bind_unseparated(note.to_string());
            }
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" AND owner_id = ").push_bind(owner_id.to_string());

        let result = qb.build().execute(&mut *self.conn).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_by_id(owner_id, id).await
    }

    /// Returns whether a card was removed.
    pub async fn delete(&mut self, owner_id: &str, id: i64) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM cards WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&mut *self.conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_legacy_name_fields(&mut self) -> Result<Vec<LegacyNameRow>, RepositoryError> {
        let rows = sqlx::query_as::<_, LegacyNameRow>(
            "SELECT id, senders, recipients FROM cards \
             WHERE json_type(senders) = 'text' OR json_type(recipients) = 'text' ORDER BY id",
        )
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows)
    }

    /// Overwrites only the name columns that are given.
    pub async fn write_names(
        &mut self,
        id: i64,
        from: Option<&[String]>,
        to: Option<&[String]>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE cards SET senders = COALESCE($1, senders), recipients = COALESCE($2, recipients) WHERE id = $3",
        )
        .bind(from.map(encode_names))
        .bind(to.map(encode_names))
        .bind(id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::insert_legacy_card;
    use super::*;
    use crate::models::{CardDraft, RawCardFields, UpdateCardRequest};
    use crate::query::{ListCardsParams, SortOrder};
    use database::get_test_db;

    fn new_card(title: &str, from: &str, to: &str, occasion: &str) -> NewCard {
        let mut fields = RawCardFields {
            title: Some(title.to_string()),
            occasion: Some(occasion.to_string()),
            ..Default::default()
        };
        fields.set("from", from.to_string());
        fields.set("to", to.to_string());
        CardDraft::new(fields)
            .unwrap()
            .with_pages(vec![format!("/uploads/{}.jpg", title)])
            .unwrap()
    }

    fn date(n: u32) -> String {
        format!("2024-01-{:02}T10:00:00.000000Z", n)
    }

    #[tokio::test]
    async fn test_create_card() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let mut repo = CardRepository::new(uow.connection());

        let card = repo.create("u1", &new_card("Test Card", "Bob", "Alice, Carol", "Birthday")).await.unwrap();
        assert!(card.id > 0);
        assert_eq!(card.owner_id, "u1");
        assert_eq!(card.from, vec!["Bob"]);
        assert_eq!(card.to, vec!["Alice", "Carol"]);

        let found = repo.find_by_id("u1", card.id).await.unwrap().unwrap();
        assert_eq!(found, card);
    }

    #[tokio::test]
    async fn test_find_is_owner_scoped() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let mut repo = CardRepository::new(uow.connection());

        let card = repo.create("u1", &new_card("Mine", "Bob", "", "Birthday")).await.unwrap();
        assert!(repo.find_by_id("u2", card.id).await.unwrap().is_none());
        assert!(repo.find_by_id("u1", card.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_legacy_rows_read_as_lists() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let id = insert_legacy_card(uow.connection(), "u1", "Old", Some(" Grandma "), None, &date(1)).await;

        let mut repo = CardRepository::new(uow.connection());
        let card = repo.find_by_id("u1", id).await.unwrap().unwrap();
        assert_eq!(card.from, vec!["Grandma"]);
        assert!(card.to.is_empty());
        assert_eq!(card.flip_orientation, FlipOrientation::Horizontal);
    }

    #[tokio::test]
    async fn test_from_filter_matches_lists_and_legacy_strings() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let legacy_id = insert_legacy_card(uow.connection(), "u1", "Legacy", Some("Alice"), None, &date(1)).await;

        let mut repo = CardRepository::new(uow.connection());
        let listed = repo.create("u1", &new_card("Listed", "Bob, Alice", "", "Birthday")).await.unwrap();
        repo.create("u1", &new_card("Other", "Bob", "", "Birthday")).await.unwrap();
        repo.create("u2", &new_card("Foreign", "Alice", "", "Birthday")).await.unwrap();

        let mut query = CardQuery::for_owner("u1");
        query.from = Some("Alice".into());
        let ids: Vec<i64> = repo.list(&query).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![legacy_id, listed.id]);
    }

    #[tokio::test]
    async fn test_to_and_occasion_filters() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let mut repo = CardRepository::new(uow.connection());

        let wanted = repo.create("u1", &new_card("A", "Bob", "Alice", "Wedding")).await.unwrap();
        repo.create("u1", &new_card("B", "Bob", "Alice", "Birthday")).await.unwrap();
        repo.create("u1", &new_card("C", "Bob", "Dan", "Wedding")).await.unwrap();

        let query = CardQuery::from_params(
            "u1",
            ListCardsParams {
                occasion: Some("Wedding".into()),
                to: Some("Alice".into()),
                ..Default::default()
            },
        );
        let cards = repo.list(&query).await.unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].id, wanted.id);

        let mut query = CardQuery::for_owner("u1");
        query.occasion = Some("Graduation".into());
        assert!(repo.list(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_across_fields() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let legacy_id = insert_legacy_card(uow.connection(), "u1", "Old", Some("Aunt Maggie"), None, &date(1)).await;

        let mut repo = CardRepository::new(uow.connection());
        let by_title = repo.create("u1", &new_card("Happy Birthday MAGGIE", "Bob", "", "Birthday")).await.unwrap();
        let by_to = repo.create("u1", &new_card("Thanks", "Bob", "Uncle Magnus, Maggie Jr", "Thank You")).await.unwrap();
        repo.create("u1", &new_card("Nothing", "Bob", "Alice", "Holiday")).await.unwrap();

        let mut query = CardQuery::for_owner("u1");
        query.search = Some("maggie".into());
        let ids: Vec<i64> = repo.list(&query).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![legacy_id, by_title.id, by_to.id]);

        query.search = Some("holi".into());
        assert_eq!(repo.list(&query).await.unwrap().len(), 1);

        query.search = Some("%".into());
        assert!(repo.list(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_folds_accented_names() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let legacy_id = insert_legacy_card(uow.connection(), "u1", "Bonne année", Some("Zoë"), None, &date(1)).await;

        let mut repo = CardRepository::new(uow.connection());
        let noel = repo.create("u1", &new_card("Joyeux Noël ÉLODIE", "José", "", "Christmas")).await.unwrap();
        repo.create("u1", &new_card("Cheers", "Bob", "", "Christmas")).await.unwrap();

        let mut query = CardQuery::for_owner("u1");
        query.search = Some("élodie".into());
        let ids: Vec<i64> = repo.list(&query).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![noel.id]);

        query.search = Some("JOSÉ".into());
        let ids: Vec<i64> = repo.list(&query).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![noel.id]);

        query.search = Some("ZOË".into());
        let ids: Vec<i64> = repo.list(&query).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![legacy_id]);
    }

    #[tokio::test]
    async fn test_padded_stored_names_filter_like_they_read() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO cards (owner_id, title, senders, recipients, pages, upload_date) \
             VALUES ('u1', 'Padded', '[\" Alice \", 7]', '[]', '[\"/uploads/p.jpg\"]', $1) RETURNING id",
        )
        .bind(date(1))
        .fetch_one(&mut *uow.connection())
        .await
        .unwrap();

        let mut repo = CardRepository::new(uow.connection());
        let card = repo.find_by_id("u1", id).await.unwrap().unwrap();
        assert_eq!(card.from, vec!["Alice"]);

        let mut query = CardQuery::for_owner("u1");
        query.from = Some("Alice".into());
        let ids: Vec<i64> = repo.list(&query).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![id]);

        query.from = Some("7".into());
        assert!(repo.list(&query).await.unwrap().is_empty());

        assert_eq!(repo.distinct_names("u1", NameField::From).await.unwrap(), vec!["Alice"]);
    }

    #[tokio::test]
    async fn test_sort_and_pagination() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        for n in 1..=25u32 {
            let mut repo = CardRepository::new(uow.connection());
            repo.insert("u1", &new_card(&format!("Card {}", n), "Bob", "", "Birthday"), &date(n))
                .await
                .unwrap();
        }
        let mut repo = CardRepository::new(uow.connection());

        let page_two = CardQuery::from_params(
            "u1",
            ListCardsParams {
                page: Some("2".into()),
                limit: Some("10".into()),
                ..Default::default()
            },
        );
        let titles: Vec<String> = repo.list(&page_two).await.unwrap().into_iter().map(|c| c.title).collect();
        let expected: Vec<String> = (11..=20).map(|n| format!("Card {}", n)).collect();
        assert_eq!(titles, expected);

        let mut newest = CardQuery::for_owner("u1");
        newest.sort = SortOrder::Newest;
        newest.limit = 100;
        let cards = repo.list(&newest).await.unwrap();
        assert_eq!(cards.len(), 25);
        assert!(cards.windows(2).all(|w| w[0].upload_date >= w[1].upload_date));
        assert_eq!(cards[0].title, "Card 25");

        let mut beyond = CardQuery::for_owner("u1");
        beyond.page = 4;
        assert!(repo.list(&beyond).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_distinct_values_and_names() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        insert_legacy_card(uow.connection(), "u1", "Old", Some("Zed"), Some("Alice"), &date(1)).await;

        let mut repo = CardRepository::new(uow.connection());
        repo.create("u1", &new_card("A", "Bob, Alice", "Carol", "Wedding")).await.unwrap();
        repo.create("u1", &new_card("B", "Bob", "", "Birthday")).await.unwrap();
        repo.create("u2", &new_card("C", "Mallory", "Eve", "Secret")).await.unwrap();

        let occasions = repo.distinct_values("u1", ScalarField::Occasion).await.unwrap();
        assert_eq!(occasions, vec!["Birthday", "Wedding"]);

        let titles = repo.distinct_values("u1", ScalarField::Title).await.unwrap();
        assert_eq!(titles, vec!["A", "B", "Old"]);

        let froms = repo.distinct_names("u1", NameField::From).await.unwrap();
        assert_eq!(froms, vec!["Alice", "Bob", "Zed"]);

        let tos = repo.distinct_names("u1", NameField::To).await.unwrap();
        assert_eq!(tos, vec!["Alice", "Carol"]);
    }

    #[tokio::test]
    async fn test_update_card() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let mut repo = CardRepository::new(uow.connection());

        let card = repo.create("u1", &new_card("Original", "Bob", "", "Birthday")).await.unwrap();
        let changes = CardChanges::new(UpdateCardRequest {
            title: Some("Updated".into()),
            from: Some(crate::models::NameList::One("Alice, Bob".into())),
            ..Default::default()
        })
        .unwrap();

        let updated = repo.update("u1", card.id, &changes).await.unwrap().unwrap();
        assert_eq!(updated.title, "Updated");
        assert_eq!(updated.from, vec!["Alice", "Bob"]);
        assert_eq!(updated.occasion, "Birthday");
        assert_eq!(updated.upload_date, card.upload_date);
        assert_eq!(updated.owner_id, "u1");
    }

    #[tokio::test]
    async fn test_update_other_owner_is_not_found() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let mut repo = CardRepository::new(uow.connection());

        let card = repo.create("u1", &new_card("Mine", "Bob", "", "Birthday")).await.unwrap();
        let changes = CardChanges::new(UpdateCardRequest {
            title: Some("Hijacked".into()),
            ..Default::default()
        })
        .unwrap();

        assert!(repo.update("u2", card.id, &changes).await.unwrap().is_none());
        assert!(repo.update("u2", card.id, &CardChanges::default()).await.unwrap().is_none());
        let unchanged = repo.find_by_id("u1", card.id).await.unwrap().unwrap();
        assert_eq!(unchanged.title, "Mine");
    }

    #[tokio::test]
    async fn test_delete_card() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let mut repo = CardRepository::new(uow.connection());

        let card = repo.create("u1", &new_card("To Be Deleted", "Bob", "", "Birthday")).await.unwrap();
        assert!(!repo.delete("u2", card.id).await.unwrap());
        assert!(repo.find_by_id("u1", card.id).await.unwrap().is_some());

        assert!(repo.delete("u1", card.id).await.unwrap());
        assert!(repo.find_by_id("u1", card.id).await.unwrap().is_none());
        assert!(!repo.delete("u1", card.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_legacy_name_fields() {
        let db = get_test_db().await;
        let mut uow = db.begin().await.unwrap();
        let legacy_id = insert_legacy_card(uow.connection(), "u1", "Old", None, Some("Alice"), &date(1)).await;

        let mut repo = CardRepository::new(uow.connection());
        repo.create("u1", &new_card("New", "Bob", "Alice", "Birthday")).await.unwrap();

        let rows = repo.find_legacy_name_fields().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, legacy_id);
        assert!(rows[0].senders.is_none());
        assert_eq!(rows[0].recipients.as_deref(), Some("\"Alice\""));
    }
}
