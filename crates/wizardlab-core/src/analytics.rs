//! Mix-event aggregation: symbol extraction, time windows, top lists and the insight page.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixEvent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub source: Option<String>,
    pub template_key: Option<String>,
    pub benchmark_symbol: Option<String>,
    pub referrer: Option<String>,
    pub anon_id: Option<String>,
    pub positions: JsonValue,
}

fn normalize_symbol(value: &JsonValue) -> Option<String> {
    let raw = match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_uppercase())
}

fn symbol_from_entry(entry: &JsonValue) -> Option<String> {
    match entry {
        JsonValue::Object(record) => ["symbol", "ticker", "asset"]
            .iter()
            .find_map(|key| record.get(*key).and_then(normalize_symbol)),
        other => normalize_symbol(other),
    }
}

/// Upper-cased symbols from a `positions` column, whatever shape the client stored.
pub fn extract_symbols_from_positions(raw: &JsonValue) -> Vec<String> {
    match raw {
        JsonValue::Array(entries) => entries.iter().filter_map(symbol_from_entry).collect(),
        JsonValue::Object(_) => symbol_from_entry(raw).into_iter().collect(),
        JsonValue::String(text) => match serde_json::from_str::<JsonValue>(text) {
            Ok(parsed) if !parsed.is_string() => extract_symbols_from_positions(&parsed),
            _ => text
                .split([',', '+'])
                .filter_map(|part| normalize_symbol(&JsonValue::String(part.to_string())))
                .collect(),
        },
        _ => Vec::new(),
    }
}

fn entry_weight_percent(entry: &JsonValue) -> Option<f64> {
    let weight = match entry.get("weight")? {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !weight.is_finite() {
        return None;
    }
    Some(if weight <= 1.0 { weight * 100.0 } else { weight })
}

/// Short human form of a mix, e.g. `VTI 60% · VXUS 40%`.
pub fn summarize_positions(raw: &JsonValue) -> String {
    if let JsonValue::Array(entries) = raw {
        let parts = entries
            .iter()
            .filter_map(|entry| {
                let symbol = symbol_from_entry(entry)?;
                Some(match entry_weight_percent(entry) {
                    Some(pct) => format!("{symbol} {}%", pct.round() as i64),
                    None => symbol,
                })
            })
            .collect::<Vec<_>>();
        if !parts.is_empty() {
            return parts.join(" · ");
        }
    }

    let symbols = extract_symbols_from_positions(raw);
    if symbols.is_empty() {
        "—".to_string()
    } else {
        symbols.join(" · ")
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now)
}

/// Window selector for the insights API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    #[default]
    Today,
    Last2d,
    Last7d,
    All,
}

impl TimeFilter {
    /// Unknown or missing values fall back to `today`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("last2d") => Self::Last2d,
            Some("last7d") => Self::Last7d,
            Some("all") => Self::All,
            _ => Self::Today,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Today => "Today",
            Self::Last2d => "Last 2 days",
            Self::Last7d => "Last 7 days",
            Self::All => "All time",
        }
    }

    pub fn from_boundary(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Today => Some(start_of_day(now)),
            Self::Last2d => Some(now - Duration::days(2)),
            Self::Last7d => Some(now - Duration::days(7)),
            Self::All => None,
        }
    }
}

/// Window selector for the mix-events table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeOption {
    #[default]
    Today,
    TwoDays,
    All,
}

impl RangeOption {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("2d") => Self::TwoDays,
            Some("all") => Self::All,
            _ => Self::Today,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::TwoDays => "2d",
            Self::All => "all",
        }
    }

    pub fn start(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Today => Some(start_of_day(now)),
            Self::TwoDays => Some(now - Duration::days(2)),
            Self::All => None,
        }
    }
}

/// Boundaries for the mix-events stat cards: today, 2d, 3d, 7d (all time has none).
pub fn summary_boundaries(now: DateTime<Utc>) -> [DateTime<Utc>; 4] {
    [
        start_of_day(now),
        now - Duration::days(2),
        now - Duration::days(3),
        now - Duration::days(7),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopItem {
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopCard {
    pub template_key: String,
    pub count: usize,
    pub percentage: f64,
}

/// Count-descending, key-ascending, truncated to `limit`.
pub fn top_items<I>(counts: I, limit: usize) -> Vec<TopItem>
where
    I: IntoIterator<Item = (String, usize)>,
{
    let mut items = counts
        .into_iter()
        .map(|(key, count)| TopItem { key, count })
        .collect::<Vec<_>>();
    items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    items.truncate(limit);
    items
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MixInsights {
    pub top_etfs: Vec<TopItem>,
    pub top_combinations: Vec<TopItem>,
    pub top_cards: Vec<TopCard>,
}

pub const TOP_LIMIT: usize = 10;

/// Aggregates symbol, combination and template counts over `events`.
/// `total_count` is the size of the whole window and drives card percentages.
pub fn compute_mix_insights(events: &[MixEvent], total_count: usize) -> MixInsights {
    let mut symbol_counts: HashMap<String, usize> = HashMap::new();
    let mut combo_counts: HashMap<String, usize> = HashMap::new();
    let mut template_counts: HashMap<String, usize> = HashMap::new();

    for event in events {
        let symbols = extract_symbols_from_positions(&event.positions)
            .into_iter()
            .collect::<BTreeSet<_>>();
        for symbol in &symbols {
            *symbol_counts.entry(symbol.clone()).or_default() += 1;
        }
        if !symbols.is_empty() {
            let combo = symbols.iter().cloned().collect::<Vec<_>>().join(" + ");
            *combo_counts.entry(combo).or_default() += 1;
        }
        if let Some(template_key) = event.template_key.as_deref().filter(|k| !k.is_empty()) {
            *template_counts.entry(template_key.to_string()).or_default() += 1;
        }
    }

    let top_cards = top_items(template_counts, TOP_LIMIT)
        .into_iter()
        .map(|item| TopCard {
            percentage: if total_count == 0 {
                0.0
            } else {
                item.count as f64 / total_count as f64 * 100.0
            },
            template_key: item.key,
            count: item.count,
        })
        .collect();

    MixInsights {
        top_etfs: top_items(symbol_counts, TOP_LIMIT),
        top_combinations: top_items(combo_counts, TOP_LIMIT),
        top_cards,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InsightSummaryMetrics {
    pub total_mixes_last7d: usize,
    pub unique_mixers_last7d: usize,
    pub repeat_mixers_last7d: usize,
    pub scratch_mixes_last7d: usize,
    pub template_mixes_last7d: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEngagementRow {
    pub source: String,
    pub total_count: usize,
    pub unique_users: usize,
    pub avg_mixes_per_user: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerUserRow {
    pub anon_id: String,
    pub total_mixes: usize,
    pub scratch_mixes: usize,
    pub template_mixes: usize,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateEngagementRow {
    pub template_key: Option<String>,
    pub total_count: usize,
    pub unique_users: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InsightData {
    pub summary: InsightSummaryMetrics,
    pub source_engagement: Vec<SourceEngagementRow>,
    pub power_users: Vec<PowerUserRow>,
    pub template_engagement: Vec<TemplateEngagementRow>,
}

const POWER_USER_LIMIT: usize = 20;

fn is_source(event: &MixEvent, wanted: &str) -> bool {
    event
        .source
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case(wanted))
}

/// Last-7-days engagement view over raw mix events.
pub fn compute_insight_data(events: &[MixEvent], now: DateTime<Utc>) -> InsightData {
    let since = now - Duration::days(7);
    let window = events
        .iter()
        .filter(|e| e.created_at >= since)
        .collect::<Vec<_>>();

    let mut per_user: BTreeMap<&str, Vec<&MixEvent>> = BTreeMap::new();
    for event in &window {
        if let Some(anon_id) = event.anon_id.as_deref().filter(|a| !a.is_empty()) {
            per_user.entry(anon_id).or_default().push(event);
        }
    }

    let summary = InsightSummaryMetrics {
        total_mixes_last7d: window.len(),
        unique_mixers_last7d: per_user.len(),
        repeat_mixers_last7d: per_user.values().filter(|v| v.len() >= 2).count(),
        scratch_mixes_last7d: window.iter().filter(|e| is_source(e, "scratch")).count(),
        template_mixes_last7d: window.iter().filter(|e| is_source(e, "template")).count(),
    };

    let mut by_source: BTreeMap<String, (usize, BTreeSet<&str>)> = BTreeMap::new();
    for event in &window {
        let source = event
            .source
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let entry = by_source.entry(source).or_default();
        entry.0 += 1;
        if let Some(anon_id) = event.anon_id.as_deref() {
            entry.1.insert(anon_id);
        }
    }
    let mut source_engagement = by_source
        .into_iter()
        .map(|(source, (total_count, users))| SourceEngagementRow {
            source,
            total_count,
            unique_users: users.len(),
            avg_mixes_per_user: if users.is_empty() {
                0.0
            } else {
                total_count as f64 / users.len() as f64
            },
        })
        .collect::<Vec<_>>();
    source_engagement.sort_by(|a, b| b.total_count.cmp(&a.total_count).then_with(|| a.source.cmp(&b.source)));

    let mut power_users = per_user
        .iter()
        .map(|(anon_id, mixes)| PowerUserRow {
            anon_id: (*anon_id).to_string(),
            total_mixes: mixes.len(),
            scratch_mixes: mixes.iter().filter(|e| is_source(e, "scratch")).count(),
            template_mixes: mixes.iter().filter(|e| is_source(e, "template")).count(),
            first_seen_at: mixes.iter().map(|e| e.created_at).min().unwrap_or(now),
            last_seen_at: mixes.iter().map(|e| e.created_at).max().unwrap_or(now),
        })
        .collect::<Vec<_>>();
    power_users.sort_by(|a, b| b.total_mixes.cmp(&a.total_mixes).then_with(|| a.anon_id.cmp(&b.anon_id)));
    power_users.truncate(POWER_USER_LIMIT);

    let mut by_template: BTreeMap<Option<String>, (usize, BTreeSet<&str>)> = BTreeMap::new();
    for event in &window {
        let entry = by_template.entry(event.template_key.clone()).or_default();
        entry.0 += 1;
        if let Some(anon_id) = event.anon_id.as_deref() {
            entry.1.insert(anon_id);
        }
    }
    let mut template_engagement = by_template
        .into_iter()
        .filter(|(key, _)| key.is_some())
        .map(|(template_key, (total_count, users))| TemplateEngagementRow {
            template_key,
            total_count,
            unique_users: users.len(),
        })
        .collect::<Vec<_>>();
    template_engagement.sort_by(|a, b| b.total_count.cmp(&a.total_count).then_with(|| a.template_key.cmp(&b.template_key)));

    InsightData {
        summary,
        source_engagement,
        power_users,
        template_engagement,
    }
}
