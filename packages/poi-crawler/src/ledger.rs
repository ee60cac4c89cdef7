//! POI ledger: the deduplicated, validated accumulation of POIs for a session.
//!
//! Identity is a canonical key built from the normalized name plus the
//! normalized address, or name plus category when no address is known.
//! Merges only ever fill empty fields; a conflicting address is kept as an
//! alternate and the record is flagged for review.

use chrono::Utc;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{PoiCandidate, PoiRecord, PoiStatus};

/// Result of merging one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Created(String),
    Updated(String),
    /// Matched an existing record and changed nothing (idempotent re-merge)
    Unchanged(String),
    Rejected(RejectReason),
}

impl MergeOutcome {
    pub fn key(&self) -> Option<&str> {
        match self {
            MergeOutcome::Created(key)
            | MergeOutcome::Updated(key)
            | MergeOutcome::Unchanged(key) => Some(key),
            MergeOutcome::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    BelowThreshold { confidence: f32, threshold: f32 },
    EmptyName,
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize_text(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Address normalization: `normalize_text` plus common street abbreviations,
/// so "12 Main Street" and "12 main st." compare equal.
pub fn normalize_address(value: &str) -> String {
    normalize_text(value)
        .split(' ')
        .map(|token| match token {
            "street" => "st",
            "avenue" => "ave",
            "road" => "rd",
            "boulevard" => "blvd",
            "drive" => "dr",
            "lane" => "ln",
            "square" => "sq",
            "place" => "pl",
            "north" => "n",
            "south" => "s",
            "east" => "e",
            "west" => "w",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn name_category_key(name: &str, category: &str) -> String {
    format!("n:{name}|c:{category}")
}

fn name_address_key(name: &str, address: &str) -> String {
    format!("n:{name}|a:{address}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiLedger {
    confidence_threshold: f32,
    records: IndexMap<String, PoiRecord>,
    /// Candidate keys that resolved to a record under a different key
    #[serde(default)]
    aliases: HashMap<String, String>,
    /// name+category -> first record with that name and category
    #[serde(default)]
    by_name_category: HashMap<String, String>,
}

impl PoiLedger {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
            records: IndexMap::new(),
            aliases: HashMap::new(),
            by_name_category: HashMap::new(),
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Merge one candidate into the ledger.
    pub fn merge(&mut self, candidate: &PoiCandidate) -> MergeOutcome {
        // NaN never passes
        if !(candidate.confidence >= self.confidence_threshold) {
            return MergeOutcome::Rejected(RejectReason::BelowThreshold {
                confidence: candidate.confidence,
                threshold: self.confidence_threshold,
            });
        }

        let name = normalize_text(&candidate.name);
        if name.is_empty() {
            return MergeOutcome::Rejected(RejectReason::EmptyName);
        }
        let category = normalize_text(&candidate.category);
        let address = non_empty(candidate.address.as_deref())
            .map(normalize_address)
            .filter(|a| !a.is_empty());

        let name_category = name_category_key(&name, &category);
        let key = match &address {
            Some(address) => name_address_key(&name, address),
            None => name_category.clone(),
        };

        match self.find_target(&key, &name_category, address.is_some()) {
            Some(target) => {
                if target != key {
                    self.aliases.insert(key, target.clone());
                }
                self.update(&target, candidate)
            }
            None => self.create(key, name_category, candidate),
        }
    }

    fn find_target(&self, key: &str, name_category: &str, has_address: bool) -> Option<String> {
        if self.records.contains_key(key) {
            return Some(key.to_string());
        }
        if let Some(target) = self.aliases.get(key) {
            return Some(target.clone());
        }

        let by_name = self.by_name_category.get(name_category)?;
        if has_address {
            // Only places first seen without an address absorb an addressed
            // sighting; addressed records with another address are distinct
            // places sharing a name.
            (by_name == name_category).then(|| by_name.clone())
        } else {
            Some(by_name.clone())
        }
    }

    fn create(&mut self, key: String, name_category: String, candidate: &PoiCandidate) -> MergeOutcome {
        let now = Utc::now();
        let mut sources = IndexSet::new();
        sources.insert(candidate.source_url.clone());

        let record = PoiRecord {
            canonical_key: key.clone(),
            name: candidate.name.trim().to_string(),
            category: candidate.category.trim().to_string(),
            address: non_empty(candidate.address.as_deref()).map(str::to_string),
            alternate_addresses: Vec::new(),
            description: non_empty(candidate.description.as_deref()).map(str::to_string),
            sources,
            confidence: candidate.confidence,
            status: PoiStatus::Active,
            needs_review: false,
            first_seen: now,
            last_updated: now,
        };

        self.by_name_category.entry(name_category).or_insert_with(|| key.clone());
        self.records.insert(key.clone(), record);
        MergeOutcome::Created(key)
    }

    fn update(&mut self, key: &str, candidate: &PoiCandidate) -> MergeOutcome {
        let threshold = self.confidence_threshold;
        let Some(record) = self.records.get_mut(key) else {
            return MergeOutcome::Rejected(RejectReason::EmptyName);
        };
        let mut changed = false;

        if let Some(incoming) = non_empty(candidate.address.as_deref()) {
            match record.address.as_deref() {
                None => {
                    record.address = Some(incoming.to_string());
                    changed = true;
                }
                Some(existing) => {
                    let incoming_norm = normalize_address(incoming);
                    let already_seen = normalize_address(existing) == incoming_norm
                        || record
                            .alternate_addresses
                            .iter()
                            .any(|alt| normalize_address(alt) == incoming_norm);
                    if !already_seen {
                        tracing::warn!(
                            key = %record.canonical_key,
                            existing = %existing,
                            incoming = %incoming,
                            "Conflicting address kept as alternate"
                        );
                        record.alternate_addresses.push(incoming.to_string());
                        record.needs_review = true;
                        changed = true;
                    }
                }
            }
        }

        if record.description.is_none() {
            if let Some(description) = non_empty(candidate.description.as_deref()) {
                record.description = Some(description.to_string());
                changed = true;
            }
        }

        if record.category.is_empty() && !candidate.category.trim().is_empty() {
            record.category = candidate.category.trim().to_string();
            changed = true;
        }

        if record.sources.insert(candidate.source_url.clone()) {
            changed = true;
        }

        if candidate.confidence > record.confidence {
            record.confidence = candidate.confidence;
            changed = true;
        }

        if record.status == PoiStatus::Rejected && record.confidence >= threshold {
            record.status = PoiStatus::Active;
            changed = true;
        }

        if changed {
            record.last_updated = Utc::now();
            MergeOutcome::Updated(key.to_string())
        } else {
            MergeOutcome::Unchanged(key.to_string())
        }
    }

    /// Apply a (possibly stricter) threshold to existing records, marking
    /// those below it rejected. Returns how many were newly rejected.
    pub fn reconcile(&mut self, threshold: f32) -> usize {
        self.confidence_threshold = threshold;
        let mut rejected = 0;
        for record in self.records.values_mut() {
            if record.status == PoiStatus::Active && record.confidence < threshold {
                record.status = PoiStatus::Rejected;
                record.last_updated = Utc::now();
                rejected += 1;
            }
        }
        rejected
    }

    pub fn get(&self, key: &str) -> Option<&PoiRecord> {
        self.records
            .get(key)
            .or_else(|| self.aliases.get(key).and_then(|k| self.records.get(k)))
    }

    /// All records in insertion order of their canonical key.
    pub fn export(&self) -> Vec<PoiRecord> {
        self.records.values().cloned().collect()
    }

    /// Names of the most recently created active records, oldest first.
    pub fn known_names(&self, limit: usize) -> Vec<String> {
        let active: Vec<&PoiRecord> = self
            .records
            .values()
            .filter(|r| r.status == PoiStatus::Active)
            .collect();
        let skip = active.len().saturating_sub(limit);
        active.into_iter().skip(skip).map(|r| r.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.status == PoiStatus::Active)
            .count()
    }

    /// Render active records as a markdown table.
    pub fn to_markdown_table(&self) -> String {
        let mut table = String::from(
            "| # | Name | Category | Address | Description | Sources |\n| --- | --- | --- | --- | --- | --- |\n",
        );
        let cell = |value: &str| value.replace('|', "\\|").replace('\n', " ");

        for (i, record) in self
            .records
            .values()
            .filter(|r| r.status == PoiStatus::Active)
            .enumerate()
        {
            let mut address = record.address.clone().unwrap_or_default();
            if !record.alternate_addresses.is_empty() {
                address.push_str(&format!(" (also: {})", record.alternate_addresses.join("; ")));
            }
            let sources = record.sources.iter().cloned().collect::<Vec<_>>().join(", ");

            table.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                i + 1,
                cell(&record.name),
                cell(&record.category),
                cell(&address),
                cell(record.description.as_deref().unwrap_or_default()),
                cell(&sources),
            ));
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn museum(source: &str) -> PoiCandidate {
        PoiCandidate::new("City Museum", "Museum", source)
            .with_address("12 Main Street")
            .with_confidence(0.9)
    }

    #[test]
    fn test_merge_same_candidate_twice_is_idempotent() {
        let mut ledger = PoiLedger::new(0.3);
        let candidate = museum("https://example.com/a");

        assert!(matches!(ledger.merge(&candidate), MergeOutcome::Created(_)));
        let once = ledger.export();

        assert!(matches!(ledger.merge(&candidate), MergeOutcome::Unchanged(_)));
        let twice = ledger.export();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
        assert_eq!(twice[0].sources.len(), 1);
    }

    #[test]
    fn test_same_name_and_address_from_two_pages_merge_sources() {
        let mut ledger = PoiLedger::new(0.3);
        ledger.merge(&museum("https://example.com/a"));
        let outcome = ledger.merge(
            &PoiCandidate::new("city museum", "Museum", "https://example.com/b")
                .with_address("12 main st.")
                .with_confidence(0.8),
        );

        assert!(matches!(outcome, MergeOutcome::Updated(_)));
        let records = ledger.export();
        assert_eq!(records.len(), 1);
        let sources: Vec<_> = records[0].sources.iter().cloned().collect();
        assert_eq!(sources, vec!["https://example.com/a", "https://example.com/b"]);
        assert!((records[0].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_merge_fills_empty_fields_but_never_blanks_them() {
        let mut ledger = PoiLedger::new(0.3);
        let key = ledger
            .merge(&museum("https://example.com/a"))
            .key()
            .unwrap()
            .to_string();

        ledger.merge(&museum("https://example.com/b").with_description("Local history"));
        assert_eq!(
            ledger.get(&key).unwrap().description.as_deref(),
            Some("Local history")
        );

        // A later sighting with no description keeps the populated one
        ledger.merge(&museum("https://example.com/c"));
        ledger.merge(&museum("https://example.com/d").with_description("Other text"));
        assert_eq!(
            ledger.get(&key).unwrap().description.as_deref(),
            Some("Local history")
        );
    }

    #[test]
    fn test_conflicting_address_keeps_both() {
        let mut ledger = PoiLedger::new(0.3);
        let first = PoiCandidate::new("Harbor Lighthouse", "Landmark", "https://example.com/a")
            .with_confidence(0.7);
        let key = ledger.merge(&first).key().unwrap().to_string();

        ledger.merge(&first.clone().with_address("1 Pier Road"));
        let outcome = ledger.merge(
            &PoiCandidate::new("Harbor Lighthouse", "Landmark", "https://example.com/b")
                .with_address("99 Cliff Avenue")
                .with_confidence(0.7),
        );

        assert_eq!(outcome, MergeOutcome::Updated(key.clone()));
        let record = ledger.get(&key).unwrap();
        assert_eq!(record.address.as_deref(), Some("1 Pier Road"));
        assert_eq!(record.alternate_addresses, vec!["99 Cliff Avenue".to_string()]);
        assert!(record.needs_review);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_distinct_addresses_on_first_sight_are_distinct_places() {
        let mut ledger = PoiLedger::new(0.3);
        ledger.merge(
            &PoiCandidate::new("Corner Cafe", "Cafe", "https://example.com/a").with_address("1 A St"),
        );
        ledger.merge(
            &PoiCandidate::new("Corner Cafe", "Cafe", "https://example.com/a").with_address("9 B St"),
        );
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_address_less_sighting_joins_addressed_record() {
        let mut ledger = PoiLedger::new(0.3);
        let key = ledger
            .merge(&museum("https://example.com/a"))
            .key()
            .unwrap()
            .to_string();
        let outcome = ledger.merge(
            &PoiCandidate::new("City Museum", "museum", "https://example.com/b").with_confidence(0.5),
        );

        assert_eq!(outcome, MergeOutcome::Updated(key));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_low_confidence_candidate_is_rejected() {
        let mut ledger = PoiLedger::new(0.3);
        let outcome = ledger.merge(&museum("https://example.com/a").with_confidence(0.1));
        assert!(matches!(
            outcome,
            MergeOutcome::Rejected(RejectReason::BelowThreshold { .. })
        ));
        assert!(ledger.is_empty());

        let nan = museum("https://example.com/a").with_confidence(f32::NAN);
        assert!(matches!(ledger.merge(&nan), MergeOutcome::Rejected(_)));
    }

    #[test]
    fn test_low_confidence_never_updates_existing_record() {
        let mut ledger = PoiLedger::new(0.3);
        let key = ledger
            .merge(&museum("https://example.com/a"))
            .key()
            .unwrap()
            .to_string();
        ledger.merge(
            &museum("https://example.com/b")
                .with_description("noise")
                .with_confidence(0.05),
        );

        let record = ledger.get(&key).unwrap();
        assert_eq!(record.sources.len(), 1);
        assert!(record.description.is_none());
    }

    #[test]
    fn test_export_preserves_insertion_order() {
        let mut ledger = PoiLedger::new(0.3);
        for name in ["Zoo", "Aquarium", "Museum"] {
            ledger.merge(&PoiCandidate::new(name, "Attraction", "https://example.com"));
        }
        let names: Vec<_> = ledger.export().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Zoo", "Aquarium", "Museum"]);
    }

    #[test]
    fn test_reconcile_marks_records_below_new_threshold() {
        let mut ledger = PoiLedger::new(0.3);
        ledger.merge(&museum("https://example.com/a").with_confidence(0.4));
        ledger.merge(&PoiCandidate::new("Zoo", "Park", "https://example.com/a").with_confidence(0.9));

        assert_eq!(ledger.reconcile(0.5), 1);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.active_len(), 1);
        assert_eq!(ledger.known_names(10), vec!["Zoo".to_string()]);
    }

    #[test]
    fn test_markdown_table_lists_active_records() {
        let mut ledger = PoiLedger::new(0.3);
        ledger.merge(&museum("https://example.com/a").with_description("Art | history"));
        let table = ledger.to_markdown_table();

        assert!(table.starts_with("| # | Name |"));
        assert!(table.contains("| 1 | City Museum | Museum | 12 Main Street | Art \\| history |"));
    }

    #[test]
    fn test_normalize_address_handles_abbreviations() {
        assert_eq!(normalize_address("12 Main Street"), normalize_address("12 main st."));
        assert_ne!(normalize_address("12 Main Street"), normalize_address("14 Main Street"));
    }
}
