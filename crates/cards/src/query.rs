use crate::models::Card;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

pub(crate) const CARD_COLUMNS: &str =
    "id, owner_id, title, senders, recipients, occasion, pages, flip_orientation, note, upload_date";

/// SQL expression yielding the names stored in `column` as a JSON array.
///
/// Rows written before multi-name support hold a bare JSON string; those read
/// as a one-element array so filters match both shapes.
pub(crate) fn names_array(column: &str) -> String {
    format!(
        "(CASE json_type(cards.{col}) \
            WHEN 'array' THEN cards.{col} \
            WHEN 'text' THEN json_array(trim(json_extract(cards.{col}, '$'))) \
            ELSE json_array() END)",
        col = column
    )
}

/// Query string of `GET /cards`. Everything is optional and lenient.
#[derive(Debug, Default, Deserialize)]
pub struct ListCardsParams {
    pub occasion: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Oldest,
    Newest,
}

impl SortOrder {
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("newest") => SortOrder::Newest,
            _ => SortOrder::Oldest,
        }
    }

    fn direction(&self) -> &'static str {
        match self {
            SortOrder::Oldest => "ASC",
            SortOrder::Newest => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardQuery {
    pub owner_id: String,
    pub occasion: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub search: Option<String>,
    pub sort: SortOrder,
    pub page: i64,
    pub limit: i64,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_positive(value: Option<&str>, default: i64) -> i64 {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(default)
}

impl CardQuery {
    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            occasion: None,
            from: None,
            to: None,
            search: None,
            sort: SortOrder::default(),
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn from_params(owner_id: impl Into<String>, params: ListCardsParams) -> Self {
        Self {
            owner_id: owner_id.into(),
            occasion: non_blank(params.occasion),
            from: non_blank(params.from),
            to: non_blank(params.to),
            search: non_blank(params.search),
            sort: SortOrder::from_param(params.sort.as_deref()),
            page: parse_positive(params.page.as_deref(), DEFAULT_PAGE),
            limit: parse_positive(params.limit.as_deref(), DEFAULT_LIMIT).min(MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub(crate) fn build(&self) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM cards WHERE owner_id = ", CARD_COLUMNS));
        qb.push_bind(self.owner_id.clone());

        if let Some(occasion) = &self.occasion {
            qb.push(" AND occasion = ").push_bind(occasion.clone());
        }

        for (column, name) in [("senders", &self.from), ("recipients", &self.to)] {
            if let Some(name) = name {
                qb.push(format!(
                    " AND EXISTS (SELECT 1 FROM json_each({}) \
                     WHERE json_each.type = 'text' AND trim(json_each.value) = ",
                    names_array(column)
                ));
                qb.push_bind(name.clone()).push(")");
            }
        }

        let direction = self.sort.direction();
        qb.push(format!(" ORDER BY upload_date {0}, id {0}", direction));
        if self.search.is_none() {
            qb.push(" LIMIT ").push_bind(self.limit);
            qb.push(" OFFSET ").push_bind(self.offset());
        }
        qb
    }

    /// Applies the search term and the page window to rows returned by [`CardQuery::build`].
    ///
    /// SQLite's `lower()` folds ASCII only, so searching happens here on decoded cards
    /// where names have the same shape the caller reads back.
    pub(crate) fn finish(&self, cards: Vec<Card>) -> Vec<Card> {
        let Some(term) = &self.search else {
            return cards;
        };
        let needle = term.to_lowercase();
        let offset = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(self.limit).unwrap_or(usize::MAX);

        cards
            .into_iter()
            .filter(|card| mentions(card, &needle))
            .skip(offset)
            .take(limit)
            .collect()
    }
}

/// Literal substring match of an already lowercased needle.
fn mentions(card: &Card, needle: &str) -> bool {
    let contains = |text: &str| text.to_lowercase().contains(needle);
    contains(&card.title)
        || contains(&card.occasion)
        || card.from.iter().any(|name| contains(name))
        || card.to.iter().any(|name| contains(name))
}
