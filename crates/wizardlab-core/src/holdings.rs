use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtfHolding {
    pub id: Uuid,
    pub etf_symbol: String,
    pub holding_symbol: Option<String>,
    pub holding_name: Option<String>,
    pub weight_pct: Option<f64>,
    pub country: Option<String>,
    pub sector: Option<String>,
    pub asset_class: Option<String>,
    pub nav_date: Option<NaiveDate>,
    pub provider: Option<String>,
    pub fund_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtfSummaryRow {
    pub etf_symbol: String,
    pub holdings: usize,
    pub total_weight_pct: f64,
}

/// Query-string filter value: trimmed, upper-cased, `None` when blank.
pub fn normalize_symbol_filter(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
}

pub fn build_etf_summary(rows: &[EtfHolding]) -> Vec<EtfSummaryRow> {
    let mut grouped: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for row in rows {
        let symbol = row.etf_symbol.trim();
        if symbol.is_empty() {
            continue;
        }
        let weight = row.weight_pct.filter(|w| w.is_finite()).unwrap_or(0.0);
        let entry = grouped.entry(symbol.to_string()).or_default();
        entry.0 += 1;
        entry.1 += weight;
    }
    grouped
        .into_iter()
        .map(|(etf_symbol, (holdings, total_weight_pct))| EtfSummaryRow {
            etf_symbol,
            holdings,
            total_weight_pct,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(etf: &str, weight: Option<f64>) -> EtfHolding {
        EtfHolding {
            id: Uuid::new_v4(),
            etf_symbol: etf.to_string(),
            holding_symbol: Some("AAPL".into()),
            holding_name: None,
            weight_pct: weight,
            country: None,
            sector: None,
            asset_class: None,
            nav_date: None,
            provider: None,
            fund_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn summary_groups_by_trimmed_symbol() {
        let rows = vec![
            holding("VTI ", Some(6.5)),
            holding("QQQ", Some(8.0)),
            holding("VTI", Some(f64::NAN)),
            holding("VTI", Some(3.5)),
            holding("  ", Some(1.0)),
        ];
        let summary = build_etf_summary(&rows);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].etf_symbol, "QQQ");
        assert_eq!(summary[1].etf_symbol, "VTI");
        assert_eq!(summary[1].holdings, 3);
        assert!((summary[1].total_weight_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn symbol_filters_are_upper_cased() {
        assert_eq!(normalize_symbol_filter(Some(" vt ")).as_deref(), Some("VT"));
        assert_eq!(normalize_symbol_filter(Some("   ")), None);
        assert_eq!(normalize_symbol_filter(None), None);
    }
}
