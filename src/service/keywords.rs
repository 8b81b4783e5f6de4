use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use tracing::info;

use crate::db::Storage;
use crate::db::models::{KeywordTracker, new_id};
use crate::error::CallControlError;

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerInput {
    pub organization_id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecountResult {
    pub tracker_id: String,
    pub mention_count: i64,
}

/// Trim, lowercase, dedupe (keeping first occurrence) and drop empty keywords.
pub fn normalize_keywords(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for kw in raw {
        let kw = kw.trim().to_lowercase();
        if !kw.is_empty() && !out.contains(&kw) {
            out.push(kw);
        }
    }
    out
}

/// Non-overlapping, case-insensitive occurrences of `keyword` in `text`.
/// `keyword` must already be lowercase.
pub fn count_mentions(text: &str, keyword: &str) -> i64 {
    if keyword.is_empty() {
        return 0;
    }
    text.to_lowercase().matches(keyword).count() as i64
}

pub fn total_mentions<'a>(texts: impl IntoIterator<Item = &'a str>, keywords: &[String]) -> i64 {
    texts
        .into_iter()
        .map(|t| keywords.iter().map(|k| count_mentions(t, k)).sum::<i64>())
        .sum()
}

fn validated(input: &TrackerInput) -> Result<(String, Vec<String>), CallControlError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(CallControlError::validation("tracker name is required"));
    }
    let keywords = normalize_keywords(&input.keywords);
    if keywords.is_empty() {
        return Err(CallControlError::validation(
            "a tracker needs at least one keyword",
        ));
    }
    Ok((name.to_string(), keywords))
}

pub async fn create(
    storage: &Storage,
    input: TrackerInput,
) -> Result<KeywordTracker, CallControlError> {
    let (name, keywords) = validated(&input)?;
    let now = Utc::now();
    let tracker = KeywordTracker {
        id: new_id(),
        organization_id: input.organization_id,
        name,
        category: input.category.filter(|c| !c.trim().is_empty()),
        keywords: Json(keywords),
        mention_count: 0,
        is_active: input.is_active.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };
    storage.insert_tracker(&tracker).await?;
    info!(tracker_id = %tracker.id, organization_id = %tracker.organization_id, "keyword tracker created");
    Ok(tracker)
}

pub async fn update(
    storage: &Storage,
    id: &str,
    input: TrackerInput,
) -> Result<KeywordTracker, CallControlError> {
    let mut tracker = storage
        .get_tracker(id)
        .await?
        .ok_or(CallControlError::NotFound("keyword tracker"))?;
    if tracker.organization_id != input.organization_id {
        return Err(CallControlError::NotFound("keyword tracker"));
    }
    let (name, keywords) = validated(&input)?;
    tracker.name = name;
    tracker.category = input.category.filter(|c| !c.trim().is_empty());
    tracker.keywords = Json(keywords);
    if let Some(active) = input.is_active {
        tracker.is_active = active;
    }
    tracker.updated_at = Utc::now();
    storage.update_tracker(&tracker).await?;
    Ok(tracker)
}

/// Recount every active tracker of the organization against all stored transcriptions.
pub async fn recount(
    storage: &Storage,
    organization_id: &str,
) -> Result<Vec<RecountResult>, CallControlError> {
    let trackers = storage.list_trackers(organization_id, false).await?;
    let transcriptions = storage.transcriptions(organization_id).await?;

    let counts: Vec<(String, i64)> = trackers
        .iter()
        .map(|t| {
            let texts = transcriptions.iter().map(String::as_str);
            (t.id.clone(), total_mentions(texts, &t.keywords))
        })
        .collect();
    storage.set_mention_counts(&counts).await?;
    info!(
        organization_id,
        trackers = counts.len(),
        transcriptions = transcriptions.len(),
        "keyword mentions recounted"
    );
    Ok(counts
        .into_iter()
        .map(|(tracker_id, mention_count)| RecountResult {
            tracker_id,
            mention_count,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_normalized() {
        let raw = vec![
            " Refund ".to_string(),
            "refund".to_string(),
            "".to_string(),
            "  ".to_string(),
            "Скидка".to_string(),
        ];
        assert_eq!(normalize_keywords(&raw), vec!["refund", "скидка"]);
    }

    #[test]
    fn mentions_are_case_insensitive_and_non_overlapping() {
        assert_eq!(count_mentions("Refund, REFUND and refunded", "refund"), 3);
        assert_eq!(count_mentions("aaaa", "aa"), 2);
        assert_eq!(count_mentions("Нужна СКИДКА и скидка", "скидка"), 2);
        assert_eq!(count_mentions("anything", ""), 0);
    }

    #[test]
    fn totals_sum_over_texts_and_keywords() {
        let keywords = vec!["price".to_string(), "discount".to_string()];
        let texts = ["The price is high", "Any discount? Price again", "nothing"];
        assert_eq!(total_mentions(texts, &keywords), 3);
    }
}
