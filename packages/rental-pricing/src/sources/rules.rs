//! Per-site row derivations applied after the listing/detail join.
//!
//! Sites publish prices and titles in different shapes. A rule rewrites a
//! joined row into the common column meaning, e.g. Invygo quotes the
//! monthly price net of the upfront discount, Dubizzle shows one list price.

use indexmap::IndexMap;
use serde_json::Value;

use crate::types::duration::leading_number;
use crate::types::output::OutputRow;

/// A derivation applied to every joined row of a source.
#[derive(Debug, Clone, PartialEq)]
pub enum RowRule {
    /// Title rebuilt as `"{make} {model} {year}"` in lowercase, with model
    /// names mapped through `model_aliases` (lowercase keys).
    TitleFromParts { model_aliases: IndexMap<String, String> },

    /// The listing's own title, lowercased, with the year appended.
    TitleWithYear,

    /// The site shows a single price: offered = base, savings = 0.
    ListPriceOnly,

    /// `base = savings / duration + offered`; the numeric surcharge in
    /// `surcharge_field` (mileage add-on) is added to both prices and
    /// removed from the row.
    SpreadSavings { surcharge_field: String },
}

impl RowRule {
    /// Dubizzle's title rule: "mg5" models read as "5".
    pub fn dubizzle_title() -> Self {
        Self::TitleFromParts {
            model_aliases: [("mg3", "3"), ("mg5", "5")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Apply the rule to a row in place.
    pub fn apply(&self, row: &mut OutputRow) {
        match self {
            Self::TitleFromParts { model_aliases } => {
                let model = row.model.to_lowercase();
                let model = model_aliases.get(&model).cloned().unwrap_or(model);
                row.title = format!("{} {} {}", row.make.to_lowercase(), model, row.year);
            }
            Self::TitleWithYear => {
                if let Some(title) = row.listing_attributes.get("title").and_then(Value::as_str) {
                    if !title.trim().is_empty() {
                        row.title = format!("{} {}", title.trim().to_lowercase(), row.year);
                    }
                }
            }
            Self::ListPriceOnly => {
                if row.has_contract_data() {
                    row.savings = Some(0.0);
                    row.offered_price = row.base_price;
                }
            }
            Self::SpreadSavings { surcharge_field } => {
                if !row.has_contract_data() {
                    return;
                }
                let months = row
                    .duration
                    .as_deref()
                    .and_then(leading_number)
                    .filter(|n| *n > 0);
                row.base_price = match (row.savings, months, row.offered_price) {
                    (Some(savings), Some(n), Some(offered)) => Some(savings / f64::from(n) + offered),
                    _ => None,
                };
                if let Some(surcharge) = row
                    .detail_attributes
                    .shift_remove(surcharge_field.as_str())
                    .as_ref()
                    .and_then(number)
                {
                    row.base_price = row.base_price.map(|p| p + surcharge);
                    row.offered_price = row.offered_price.map(|p| p + surcharge);
                }
            }
        }
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::listing::{ContractType, LookupKey};

    fn row() -> OutputRow {
        OutputRow {
            listing_key: LookupKey::new("https://x.test/car/1"),
            source_url: "https://x.test/car/1".into(),
            title: "mg mg5 2024".into(),
            make: "MG".into(),
            model: "MG5".into(),
            year: 2024,
            contract_type: ContractType::Monthly,
            partial: false,
            duration: Some("3 months".into()),
            base_price: Some(120.0),
            offered_price: None,
            savings: None,
            listing_attributes: IndexMap::new(),
            detail_attributes: IndexMap::new(),
        }
    }

    #[test]
    fn test_title_from_parts_maps_model() {
        let mut r = row();
        RowRule::dubizzle_title().apply(&mut r);
        assert_eq!(r.title, "mg 5 2024");

        let mut r = OutputRow {
            make: "TOYOTA".into(),
            model: "CAMRY".into(),
            ..row()
        };
        RowRule::dubizzle_title().apply(&mut r);
        assert_eq!(r.title, "toyota camry 2024");
    }

    #[test]
    fn test_title_with_year() {
        let mut r = row();
        r.listing_attributes.insert("title".into(), Value::from(" Nissan Sunny "));
        RowRule::TitleWithYear.apply(&mut r);
        assert_eq!(r.title, "nissan sunny 2024");

        let mut untitled = row();
        RowRule::TitleWithYear.apply(&mut untitled);
        assert_eq!(untitled.title, "mg mg5 2024");
    }

    #[test]
    fn test_list_price_only() {
        let mut r = row();
        RowRule::ListPriceOnly.apply(&mut r);
        assert_eq!(r.offered_price, Some(120.0));
        assert_eq!(r.savings, Some(0.0));

        let mut empty = OutputRow {
            duration: None,
            base_price: None,
            ..row()
        };
        RowRule::ListPriceOnly.apply(&mut empty);
        assert_eq!(empty.savings, None);
    }

    #[test]
    fn test_spread_savings_with_surcharge() {
        let mut r = OutputRow {
            offered_price: Some(2000.0),
            savings: Some(900.0),
            ..row()
        };
        r.detail_attributes.insert("mileage_numeric".into(), Value::from(150));
        r.detail_attributes.insert("mileage".into(), Value::from("4000 km"));

        RowRule::SpreadSavings {
            surcharge_field: "mileage_numeric".into(),
        }
        .apply(&mut r);

        assert_eq!(r.base_price, Some(900.0 / 3.0 + 2000.0 + 150.0));
        assert_eq!(r.offered_price, Some(2150.0));
        assert!(!r.detail_attributes.contains_key("mileage_numeric"));
        assert!(r.detail_attributes.contains_key("mileage"));
    }

    #[test]
    fn test_spread_savings_without_duration() {
        let mut r = OutputRow {
            duration: Some("flexible".into()),
            offered_price: Some(2000.0),
            savings: Some(900.0),
            ..row()
        };
        RowRule::SpreadSavings {
            surcharge_field: "mileage_numeric".into(),
        }
        .apply(&mut r);
        assert_eq!(r.base_price, None);
        assert_eq!(r.offered_price, Some(2000.0));
    }
}
