use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use validator::Validate;

pub const DEFAULT_OCCASION: &str = "Miscellaneous";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlipOrientation {
    #[default]
    Horizontal,
    Vertical,
}

impl FlipOrientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlipOrientation::Horizontal => "horizontal",
            FlipOrientation::Vertical => "vertical",
        }
    }
}

impl FromStr for FlipOrientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "horizontal" => Ok(FlipOrientation::Horizontal),
            "vertical" => Ok(FlipOrientation::Vertical),
            other => Err(format!(
                "Invalid flipOrientation '{}', expected 'horizontal' or 'vertical'",
                other
            )),
        }
    }
}

impl fmt::Display for FlipOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: i64,
    pub owner_id: String,
    pub title: String,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub occasion: String,
    pub pages: Vec<String>,
    pub flip_orientation: FlipOrientation,
    pub note: String,
    pub upload_date: DateTime<Utc>,
}

/// Fields whose stored value is a plain string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarField {
    Occasion,
    Title,
}

impl ScalarField {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            ScalarField::Occasion => "occasion",
            ScalarField::Title => "title",
        }
    }
}

/// Fields holding a list of names (possibly stored in the legacy single-string shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameField {
    From,
    To,
}

impl NameField {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            NameField::From => "senders",
            NameField::To => "recipients",
        }
    }
}

/// Fields offered for autocomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardField {
    Names(NameField),
    Scalar(ScalarField),
}

impl CardField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardField::Names(NameField::From) => "from",
            CardField::Names(NameField::To) => "to",
            CardField::Scalar(ScalarField::Occasion) => "occasion",
            CardField::Scalar(ScalarField::Title) => "title",
        }
    }
}

impl FromStr for CardField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "from" => Ok(CardField::Names(NameField::From)),
            "to" => Ok(CardField::Names(NameField::To)),
            "occasion" => Ok(CardField::Scalar(ScalarField::Occasion)),
            "title" => Ok(CardField::Scalar(ScalarField::Title)),
            other => Err(format!(
                "Invalid field '{}'. Must be one of: from, to, occasion, title",
                other
            )),
        }
    }
}

// --- Sender / recipient names ---

/// Names as clients send them: a JSON array, or one string that may be comma-separated.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NameList {
    Many(Vec<String>),
    One(String),
}

impl NameList {
    pub fn into_names(self) -> Vec<String> {
        match self {
            NameList::Many(names) => clean_names(names),
            NameList::One(raw) => split_names(&raw),
        }
    }
}

fn clean_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| name.as_ref().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Parses a raw text value: a JSON array literal, a comma-separated list, or a single name.
pub fn split_names(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        if let Ok(names) = serde_json::from_str::<Vec<String>>(trimmed) {
            return clean_names(names);
        }
    }
    clean_names(trimmed.split(','))
}

fn single_name(raw: &str) -> Vec<String> {
    clean_names([raw])
}

/// Decodes a stored name column into a list, whatever shape the row was written in.
///
/// Only string values count as names. This matches `names_array` plus the
/// `json_each.type = 'text'` guard used by the list filters.
pub(crate) fn decode_stored_names(stored: Option<&str>) -> Vec<String> {
    let Some(raw) = stored else {
        return Vec::new();
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => clean_names(items.into_iter().filter_map(|item| match item {
            Value::String(name) => Some(name),
            _ => None,
        })),
        Ok(Value::String(legacy)) => single_name(&legacy),
        Ok(_) => Vec::new(),
        Err(_) => single_name(raw),
    }
}

pub(crate) fn encode_names(names: &[String]) -> String {
    Value::from(names.to_vec()).to_string()
}

// --- Create ---

/// Text fields of an upload form before validation.
#[derive(Debug, Default, Clone)]
pub struct RawCardFields {
    pub title: Option<String>,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub occasion: Option<String>,
    pub flip_orientation: Option<String>,
    pub note: Option<String>,
}

impl RawCardFields {
    /// Records one form field. `from`/`to` may repeat; unknown fields (including
    /// `ownerId`) are ignored.
    pub fn set(&mut self, name: &str, value: String) {
        match name {
            "title" => self.title = Some(value),
            "from" | "from[]" => self.from.push(value),
            "to" | "to[]" => self.to.push(value),
            "occasion" => self.occasion = Some(value),
            "flipOrientation" => self.flip_orientation = Some(value),
            "note" => self.note = Some(value),
            _ => {}
        }
    }
}

fn occasion_or_default(occasion: Option<String>) -> String {
    occasion
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .unwrap_or_else(|| DEFAULT_OCCASION.to_string())
}

/// Validated card metadata, waiting for its page URIs.
#[derive(Debug, Clone)]
pub struct CardDraft {
    title: String,
    from: Vec<String>,
    to: Vec<String>,
    occasion: String,
    flip_orientation: FlipOrientation,
    note: String,
}

impl CardDraft {
    pub fn new(raw: RawCardFields) -> Result<Self, String> {
        let title = raw.title.unwrap_or_default().trim().to_string();
        if title.is_empty() {
            return Err("Title is required".to_string());
        }

        let flip_orientation = match raw.flip_orientation {
            Some(value) => value.parse()?,
            None => FlipOrientation::default(),
        };

        Ok(Self {
            title,
            from: raw.from.iter().flat_map(|v| split_names(v)).collect(),
            to: raw.to.iter().flat_map(|v| split_names(v)).collect(),
            occasion: occasion_or_default(raw.occasion),
            flip_orientation,
            note: raw.note.unwrap_or_default().trim().to_string(),
        })
    }

    pub fn with_pages(self, pages: Vec<String>) -> Result<NewCard, String> {
        let card = NewCard {
            title: self.title,
            from: self.from,
            to: self.to,
            occasion: self.occasion,
            pages,
            flip_orientation: self.flip_orientation,
            note: self.note,
        };
        card.validate().map_err(|e| e.to_string())?;
        Ok(card)
    }
}

// ENCAPSULATION: once built through CardDraft, a NewCard is valid.
#[derive(Debug, Clone, Validate)]
pub struct NewCard {
    #[validate(length(min = 1, message = "Title is required"))]
    title: String,
    from: Vec<String>,
    to: Vec<String>,
    occasion: String,
    #[validate(length(min = 1, message = "At least one page is required"))]
    pages: Vec<String>,
    flip_orientation: FlipOrientation,
    note: String,
}

impl NewCard {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn from(&self) -> &[String] {
        &self.from
    }

    pub fn to(&self) -> &[String] {
        &self.to
    }

    pub fn occasion(&self) -> &str {
        &self.occasion
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn flip_orientation(&self) -> FlipOrientation {
        self.flip_orientation
    }

    pub fn note(&self) -> &str {
        &self.note
    }
}

// --- Update ---

/// JSON body of `PUT /cards/{id}`. Fields left out are not touched;
/// `id`, `ownerId` and `uploadDate` are never read from the body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCardRequest {
    pub title: Option<String>,
    pub from: Option<NameList>,
    pub to: Option<NameList>,
    pub occasion: Option<String>,
    pub flip_orientation: Option<String>,
    pub note: Option<String>,
    pub pages: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Validate)]
pub struct CardChanges {
    #[validate(length(min = 1, message = "Title cannot be empty"))]
    title: Option<String>,
    from: Option<Vec<String>>,
    to: Option<Vec<String>>,
    occasion: Option<String>,
    #[validate(length(min = 1, message = "A card needs at least one page"))]
    pages: Option<Vec<String>>,
    flip_orientation: Option<FlipOrientation>,
    note: Option<String>,
}

impl CardChanges {
    pub fn new(req: UpdateCardRequest) -> Result<Self, String> {
        let flip_orientation = req
            .flip_orientation
            .map(|value| value.parse::<FlipOrientation>())
            .transpose()?;

        let changes = Self {
            title: req.title.map(|t| t.trim().to_string()),
            from: req.from.map(NameList::into_names),
            to: req.to.map(NameList::into_names),
            occasion: req.occasion.map(|o| occasion_or_default(Some(o))),
            pages: req.pages.map(clean_names),
            flip_orientation,
            note: req.note.map(|n| n.trim().to_string()),
        };
        changes.validate().map_err(|e| e.to_string())?;
        Ok(changes)
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.from.is_none()
            && self.to.is_none()
            && self.occasion.is_none()
            && self.pages.is_none()
            && self.flip_orientation.is_none()
            && self.note.is_none()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn from(&self) -> Option<&[String]> {
        self.from.as_deref()
    }

    pub fn to(&self) -> Option<&[String]> {
        self.to.as_deref()
    }

    pub fn occasion(&self) -> Option<&str> {
        self.occasion.as_deref()
    }

    pub fn pages(&self) -> Option<&[String]> {
        self.pages.as_deref()
    }

    pub fn flip_orientation(&self) -> Option<FlipOrientation> {
        self.flip_orientation
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }
}
