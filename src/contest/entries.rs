// ============================================================================
// Entry Registry - blind submissions and bag numbers
// ============================================================================
//
// Entries are submitted in the clear but shown to other participants only by
// bag number until REVEAL. Bag numbers are applied as one batch: the whole
// assignment is validated first and then written, so a rejected batch leaves
// every entry unnumbered.
//
// ============================================================================

use super::RANKED_PLACES;
use crate::error::{ContestError, ContestResult};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Hidden details of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPayload {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub declared_price: Option<Decimal>,
}

impl EntryPayload {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            declared_price: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub contest_id: String,
    pub submitter_id: String,
    pub bag_number: Option<u32>,
    pub payload: EntryPayload,
    pub submitted_at: DateTime<Utc>,
    /// Per-contest submission order, the last tie-breaker
    pub seq: u64,
}

/// An entry as one viewer is allowed to see it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryView {
    pub bag_number: Option<u32>,
    pub entry_id: Option<String>,
    pub submitter_id: Option<String>,
    pub payload: Option<EntryPayload>,
    pub is_own: bool,
}

impl EntryView {
    fn full(entry: &Entry, viewer: &str) -> Self {
        Self {
            bag_number: entry.bag_number,
            entry_id: Some(entry.id.clone()),
            submitter_id: Some(entry.submitter_id.clone()),
            payload: Some(entry.payload.clone()),
            is_own: entry.submitter_id == viewer,
        }
    }

    fn masked(entry: &Entry) -> Self {
        Self {
            bag_number: entry.bag_number,
            entry_id: None,
            submitter_id: None,
            payload: None,
            is_own: false,
        }
    }
}

/// Entries of one contest keyed by entry id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryRegistry {
    entries: BTreeMap<String, Entry>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    pub fn submit(&mut self, contest_id: &str, submitter_id: &str, payload: EntryPayload, seq: u64) -> ContestResult<&Entry> {
        if payload.name.trim().is_empty() {
            return Err(ContestError::InvalidEntry("entry name must not be empty".into()));
        }
        if let Some(price) = payload.declared_price {
            if price.is_sign_negative() {
                return Err(ContestError::InvalidAmount(price));
            }
        }

        let entry = Entry {
            id: uuid::Uuid::new_v4().to_string(),
            contest_id: contest_id.to_string(),
            submitter_id: submitter_id.to_string(),
            bag_number: None,
            payload,
            submitted_at: Utc::now(),
            seq,
        };
        let id = entry.id.clone();
        let stored: &Entry = self.entries.entry(id).or_insert(entry);
        Ok(stored)
    }

    pub fn withdraw(&mut self, entry_id: &str) -> ContestResult<Entry> {
        self.entries
            .remove(entry_id)
            .ok_or_else(|| ContestError::EntryNotFound(entry_id.to_string()))
    }

    pub fn get(&self, entry_id: &str) -> Option<&Entry> {
        self.entries.get(entry_id)
    }

    pub fn by_bag(&self, bag_number: u32) -> Option<&Entry> {
        self.entries.values().find(|e| e.bag_number == Some(bag_number))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn is_bagged(&self) -> bool {
        !self.entries.is_empty() && self.entries.values().all(|e| e.bag_number.is_some())
    }

    pub fn ensure_enough(&self) -> ContestResult<()> {
        if self.entries.len() < RANKED_PLACES {
            return Err(ContestError::NotEnoughEntries {
                required: RANKED_PLACES,
                found: self.entries.len(),
            });
        }
        Ok(())
    }

    /// Validate a full assignment batch without touching any entry
    pub fn validate_assignment(&self, assignments: &[(String, u32)]) -> ContestResult<()> {
        self.ensure_enough()?;

        let mut seen_bags = HashSet::new();
        let mut seen_entries = HashSet::new();

        for (entry_id, bag) in assignments {
            if *bag == 0 {
                return Err(ContestError::InvalidBagNumber(*bag));
            }
            if !self.entries.contains_key(entry_id) {
                return Err(ContestError::IncompleteAssignment(format!(
                    "entry {} does not belong to this contest",
                    entry_id
                )));
            }
            if !seen_entries.insert(entry_id.as_str()) {
                return Err(ContestError::IncompleteAssignment(format!(
                    "entry {} is assigned more than once",
                    entry_id
                )));
            }
            if !seen_bags.insert(*bag) {
                return Err(ContestError::DuplicateBagNumber(*bag));
            }
        }

        let missing: Vec<&str> = self
            .entries
            .keys()
            .filter(|id| !seen_entries.contains(id.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ContestError::IncompleteAssignment(format!(
                "{} of {} entries have no bag number: {}",
                missing.len(),
                self.entries.len(),
                missing.join(", ")
            )));
        }

        Ok(())
    }

    /// Apply a bijective batch of bag numbers, all or nothing
    pub fn assign_bag_numbers(&mut self, assignments: &[(String, u32)]) -> ContestResult<()> {
        self.validate_assignment(assignments)?;

        let by_entry: HashMap<&str, u32> = assignments.iter().map(|(id, bag)| (id.as_str(), *bag)).collect();
        for entry in self.entries.values_mut() {
            entry.bag_number = by_entry.get(entry.id.as_str()).copied();
        }
        Ok(())
    }

    /// Shuffle bag numbers 1..=n over the entries
    pub fn shuffled_assignment(&self) -> Vec<(String, u32)> {
        let mut bags: Vec<u32> = (1..=self.entries.len() as u32).collect();
        bags.shuffle(&mut rand::thread_rng());
        self.entries.keys().cloned().zip(bags).collect()
    }

    /// Entries visible to `viewer`, sorted by bag number then submission order
    pub fn views(&self, viewer: &str, privileged: bool, revealed: bool) -> Vec<EntryView> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| (e.bag_number.unwrap_or(u32::MAX), e.seq));

        entries
            .into_iter()
            .map(|e| {
                if revealed || privileged || e.submitter_id == viewer {
                    EntryView::full(e, viewer)
                } else {
                    EntryView::masked(e)
                }
            })
            .collect()
    }
}
