//! In-memory customer roster and the lookup indexes the matcher runs against.
//!
//! The roster is loaded once per import; derived comparison fields are
//! computed here and never persisted back, except when a merge updates the
//! canonical fields of a surviving record.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};

use super::text::{normalize_email, normalize_text, tokenize_name};
use crate::store::ClientRow;

/// One customer with identity fields plus derived comparison aids.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    /// Normalized at load time.
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,

    /// `first last`, normalized.
    pub forward_name: String,
    /// `last first`, normalized.
    pub reverse_name: String,
    /// All name words of length >= 2, normalized.
    pub name_tokens: HashSet<String>,
}

impl ClientRecord {
    pub fn from_row(row: ClientRow) -> Self {
        let mut record = Self {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row
                .email
                .map(|e| normalize_email(&e))
                .filter(|e| !e.is_empty()),
            phone: row.phone,
            birth_date: row.birth_date,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
            forward_name: String::new(),
            reverse_name: String::new(),
            name_tokens: HashSet::new(),
        };
        record.refresh_derived();
        record
    }

    /// Recompute the derived comparison fields from the canonical ones.
    /// Must be called after a merge mutates the record.
    pub fn refresh_derived(&mut self) {
        self.forward_name = normalize_text(&format!("{} {}", self.first_name, self.last_name));
        self.reverse_name = normalize_text(&format!("{} {}", self.last_name, self.first_name));
        self.name_tokens = tokenize_name(&format!("{} {}", self.first_name, self.last_name))
            .into_iter()
            .collect();
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Phone with every non-digit character removed.
    pub fn phone_digits(&self) -> String {
        self.phone
            .as_deref()
            .unwrap_or("")
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect()
    }
}

/// The loaded roster, addressable by client id. Merges mutate records in
/// place; the indexes are never rebuilt mid-run (redirects handle moved ids).
#[derive(Debug, Default)]
pub struct ClientRoster {
    clients: HashMap<String, ClientRecord>,
}

impl ClientRoster {
    pub fn from_rows(rows: Vec<ClientRow>) -> Self {
        let clients = rows
            .into_iter()
            .map(|row| {
                let record = ClientRecord::from_row(row);
                (record.id.clone(), record)
            })
            .collect();
        Self { clients }
    }

    pub fn get(&self, id: &str) -> Option<&ClientRecord> {
        self.clients.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ClientRecord> {
        self.clients.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values()
    }
}

/// Lookup tables over the roster: by normalized email, by full name in both
/// orderings, by individual name token. Soft-deleted clients are indexed too;
/// the matcher filters them after redirect resolution.
#[derive(Debug, Default)]
pub struct ClientIndexes {
    pub by_email: HashMap<String, Vec<String>>,
    pub by_name: HashMap<String, Vec<String>>,
    pub by_token: HashMap<String, Vec<String>>,
}

impl ClientIndexes {
    pub fn build(roster: &ClientRoster) -> Self {
        let mut by_email: HashMap<String, Vec<String>> = HashMap::new();
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        let mut by_token: HashMap<String, Vec<String>> = HashMap::new();

        for client in roster.iter() {
            if let Some(email) = &client.email {
                by_email.entry(email.clone()).or_default().push(client.id.clone());
            }
            if !client.forward_name.is_empty() {
                by_name
                    .entry(client.forward_name.clone())
                    .or_default()
                    .push(client.id.clone());
            }
            if !client.reverse_name.is_empty() && client.reverse_name != client.forward_name {
                by_name
                    .entry(client.reverse_name.clone())
                    .or_default()
                    .push(client.id.clone());
            }
            for token in &client.name_tokens {
                by_token.entry(token.clone()).or_default().push(client.id.clone());
            }
        }

        Self {
            by_email,
            by_name,
            by_token,
        }
    }
}
