//! Keyword extraction and per-tenant keyword statistics.
//!
//! Extraction is a pure function of the transcript. Aggregation is a
//! read-modify-write per keyword; concurrent merges for the same tenant and
//! keyword can lose updates, so the counts are approximate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::store::{Database, KeywordAggregate};

/// Maximum keywords kept per transcript.
pub const MAX_KEYWORDS: usize = 20;

/// Tokens this short or shorter are dropped.
const MIN_TOKEN_LEN: usize = 3;

/// Minimum occurrences for a token to count as a keyword.
const MIN_FREQUENCY: usize = 2;

/// English function words plus call filler.
const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "alright", "always", "another",
    "anything", "actually", "basically", "because", "been", "before", "being", "below", "between",
    "both", "bye", "call", "calling", "cannot", "could", "didn't", "does", "doing", "done", "down",
    "during", "each", "else", "even", "every", "from", "further", "going", "gonna", "good", "great",
    "have", "having", "hello", "here", "hers", "herself", "himself", "hmm", "into", "itself",
    "just", "kind", "know", "like", "maybe", "mhmm", "more", "most", "much", "must", "myself",
    "need", "okay", "once", "only", "other", "ourselves", "over", "please", "pretty", "really",
    "right", "said", "same", "says", "should", "some", "something", "sort", "still", "such",
    "sure", "than", "thank", "thanks", "that", "thats", "their", "theirs", "them", "themselves",
    "then", "there", "these", "they", "thing", "things", "think", "this", "those", "through",
    "under", "until", "uhhuh", "umm", "very", "wanna", "want", "well", "were", "what", "whats",
    "when", "where", "which", "while", "whom", "will", "with", "would", "yeah", "your", "youre",
    "yours", "yourself", "yourselves",
];

/// Ordered keywords for a transcript: most frequent first, ties alphabetical.
pub fn extract_keywords(transcript: &str) -> Vec<String> {
    let cleaned: String = transcript
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in cleaned.split_whitespace() {
        if token.chars().count() <= MIN_TOKEN_LEN
            || token.chars().all(|c| c.is_ascii_digit())
            || STOP_WORDS.contains(&token)
        {
            continue;
        }
        *counts.entry(token).or_default() += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts
        .into_iter()
        .filter(|(_, n)| *n >= MIN_FREQUENCY)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(token, _)| token.to_string())
        .collect()
}

/// Score for a sentiment label: +1 positive, -1 negative, 0 otherwise.
pub fn sentiment_score(sentiment: &str) -> f64 {
    match sentiment.to_ascii_lowercase().as_str() {
        "positive" => 1.0,
        "negative" => -1.0,
        _ => 0.0,
    }
}

/// Fold one detection into an aggregate, creating it if absent.
pub fn merge_detection(
    existing: Option<KeywordAggregate>,
    user_id: &str,
    keyword: &str,
    sentiment: &str,
    detected_at: DateTime<Utc>,
) -> KeywordAggregate {
    let score = sentiment_score(sentiment);
    let mut agg = existing.unwrap_or_else(|| KeywordAggregate {
        user_id: user_id.to_string(),
        keyword: keyword.to_string(),
        total_count: 0,
        positive_count: 0,
        neutral_count: 0,
        negative_count: 0,
        avg_sentiment: 0.0,
        last_detected_at: detected_at,
    });

    let old_count = agg.total_count as f64;
    agg.total_count += 1;
    agg.avg_sentiment = (agg.avg_sentiment * old_count + score) / agg.total_count as f64;
    if score > 0.0 {
        agg.positive_count += 1;
    } else if score < 0.0 {
        agg.negative_count += 1;
    } else {
        agg.neutral_count += 1;
    }
    agg.last_detected_at = detected_at;
    agg
}

/// Merge a call's keywords into the tenant's aggregates. Failures are logged
/// per keyword and do not stop the rest. Returns the number merged.
pub async fn aggregate_keywords(
    db: &dyn Database,
    user_id: &str,
    keywords: &[String],
    sentiment: &str,
) -> usize {
    let now = Utc::now();
    let mut merged = 0;
    for keyword in keywords {
        let existing = match db.get_keyword(user_id, keyword).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(user_id, keyword = %keyword, error = %e, "Failed to read keyword aggregate");
                continue;
            }
        };
        let updated = merge_detection(existing, user_id, keyword, sentiment, now);
        match db.upsert_keyword(&updated).await {
            Ok(()) => merged += 1,
            Err(e) => {
                error!(user_id, keyword = %keyword, error = %e, "Failed to write keyword aggregate")
            }
        }
    }
    debug!(user_id, merged, sentiment, "Keywords aggregated");
    merged
}
