//! Per-site configuration: URL templates, key rules, partitions, schema.

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use indexmap::IndexMap;
use std::collections::BTreeMap;

use crate::sources::rules::RowRule;
use crate::types::catalog::ScrapeTarget;
use crate::types::duration::DurationPartition;
use crate::types::listing::ContractType;
use crate::types::output::OutputSchema;

/// A list page URL template for one contract type.
///
/// Placeholders: `{make}`, `{model}`, plus any profile variable such as
/// `{since}`. Templates without `{make}`/`{model}` cover the whole catalog
/// and are fetched once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTemplate {
    pub contract_type: ContractType,
    pub url: String,
}

impl ListTemplate {
    /// Create a template.
    pub fn new(contract_type: ContractType, url: impl Into<String>) -> Self {
        Self {
            contract_type,
            url: url.into(),
        }
    }

    /// Whether the template is rendered once per (make, model).
    pub fn is_per_target(&self) -> bool {
        self.url.contains("{make}") || self.url.contains("{model}")
    }

    /// Render the template.
    pub fn render(&self, target: Option<&ScrapeTarget>, vars: &IndexMap<String, String>) -> String {
        let mut url = self.url.clone();
        if let Some(target) = target {
            url = url
                .replace("{make}", &target.make)
                .replace("{model}", &target.model);
        }
        for (name, value) in vars {
            url = url.replace(&format!("{{{name}}}"), value);
        }
        url
    }
}

/// Everything that differs between rental sites, as data.
#[derive(Debug, Clone)]
pub struct SourceProfile {
    /// Source name used by the trigger ("yango")
    pub name: String,

    /// Catalog column holding this site's model alias
    pub alias_column: String,

    /// List pages per contract type
    pub list_pages: Vec<ListTemplate>,

    /// Template variables (dates, locale)
    pub vars: IndexMap<String, String>,

    /// Selector hint for list pages
    pub list_ready_selector: Option<String>,

    /// Selector hint for detail pages
    pub detail_ready_selector: Option<String>,

    /// Query parameter selecting the contract duration, if the site has one
    pub duration_param: Option<String>,

    /// Query parameters that never identify a listing
    pub stripped_params: Vec<String>,

    /// Duration partitions used for coverage and ordering
    pub partitions: BTreeMap<ContractType, DurationPartition>,

    /// Check monthly duration coverage and backfill gaps
    pub coverage_check: bool,

    /// Keep one row per (listing, bucket) in the output
    pub collapse_buckets: bool,

    /// Derivations applied to joined rows, in order
    pub row_rules: Vec<RowRule>,

    /// Output columns
    pub schema: OutputSchema,
}

impl SourceProfile {
    /// Create a bare profile; the alias column defaults to `<name>_model`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            alias_column: format!("{name}_model"),
            name,
            list_pages: Vec::new(),
            vars: IndexMap::new(),
            list_ready_selector: None,
            detail_ready_selector: None,
            duration_param: None,
            stripped_params: Vec::new(),
            partitions: BTreeMap::new(),
            coverage_check: false,
            collapse_buckets: false,
            row_rules: Vec::new(),
            schema: OutputSchema::new(default_columns()),
        }
    }

    /// Add a list page template.
    pub fn with_list_page(mut self, contract_type: ContractType, url: impl Into<String>) -> Self {
        self.list_pages.push(ListTemplate::new(contract_type, url));
        self
    }

    /// Set a template variable.
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Set the duration selector parameter (also stripped from lookup keys).
    pub fn with_duration_param(mut self, param: impl Into<String>) -> Self {
        let param = param.into();
        if !self.stripped_params.contains(&param) {
            self.stripped_params.push(param.clone());
        }
        self.duration_param = Some(param);
        self
    }

    /// Strip an additional non-identifying parameter from lookup keys.
    pub fn strip_param(mut self, param: impl Into<String>) -> Self {
        self.stripped_params.push(param.into());
        self
    }

    /// Set the partition for a contract type.
    pub fn with_partition(mut self, contract_type: ContractType, partition: DurationPartition) -> Self {
        self.partitions.insert(contract_type, partition);
        self
    }

    /// Enable monthly coverage checking and backfill.
    pub fn with_coverage_check(mut self) -> Self {
        self.coverage_check = true;
        self
    }

    /// Collapse rows to one per duration bucket.
    pub fn with_collapsed_buckets(mut self) -> Self {
        self.collapse_buckets = true;
        self
    }

    /// Set the ready selector hints.
    pub fn with_ready_selectors(
        mut self,
        list: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        self.list_ready_selector = Some(list.into());
        self.detail_ready_selector = Some(detail.into());
        self
    }

    /// Add a row derivation.
    pub fn with_row_rule(mut self, rule: RowRule) -> Self {
        self.row_rules.push(rule);
        self
    }

    /// Set the output columns.
    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Partition for a contract type.
    pub fn partition(&self, contract_type: ContractType) -> Option<&DurationPartition> {
        self.partitions.get(&contract_type)
    }

    /// Whether listings of this contract type need multi-bucket coverage.
    pub fn requires_coverage(&self, contract_type: ContractType) -> bool {
        self.coverage_check
            && contract_type == ContractType::Monthly
            && self.partition(contract_type).is_some_and(|p| p.len() > 1)
    }

    /// Yango Drive: per make/model search pages, monthly duration selector,
    /// rental window starting tomorrow 11:30 India time.
    pub fn yango(now: DateTime<Utc>) -> Self {
        let window = YangoWindow::starting_after(now);
        Self::new("yango")
            .with_var("since", window.since.to_string())
            .with_var("until", window.until.to_string())
            .with_var("until_weekly", window.until_weekly.to_string())
            .with_list_page(
                ContractType::Daily,
                "https://drive.yango.com/search/all/{make}/{model}?since={since}&until={until}",
            )
            .with_list_page(
                ContractType::Weekly,
                "https://drive.yango.com/search/all/{make}/{model}?since={since}&until={until_weekly}",
            )
            .with_list_page(
                ContractType::Monthly,
                "https://drive.yango.com/search/all/{make}/{model}?since={since}&until={until}&duration_months=9&is_monthly=true",
            )
            .with_ready_selectors(
                "#Card",
                ".SlotText_Title__gHEmU, .BookFormSuggestedMonths_priceDetails__DoQLL",
            )
            .with_duration_param("duration_months")
            .strip_param("location")
            .strip_param("sublocation")
            .with_partition(ContractType::Monthly, DurationPartition::monthly())
            .with_coverage_check()
            .with_collapsed_buckets()
            .with_schema(OutputSchema::new([
                "sub-url", "title", "make", "model", "year", "ratings", "header", "contract",
                "base_price", "savings", "offered_price", "duration", "mileage", "mileage_note",
                "insurance_type", "insurance_detail", "description", "page_status", "fuel_policy",
                "base_deposit", "offered_deposit", "payment_mode", "payment_options",
                "minimum_driver_age", "minimum_driving_experience",
            ]))
    }

    /// Invygo: one list page per contract type for the whole catalog.
    pub fn invygo() -> Self {
        Self::new("invygo")
            .with_list_page(
                ContractType::Weekly,
                "https://invygo.com/en-ae/dubai/rent-weekly-cars",
            )
            .with_list_page(
                ContractType::Monthly,
                "https://invygo.com/en-ae/dubai/rent-monthly-cars",
            )
            .with_ready_selectors(
                "a[href^='/en-ae/dubai/rent-'] div.p-4",
                "[data-testid=\"booking-contract-length\"] [role=\"presentation\"]",
            )
            .with_partition(ContractType::Weekly, DurationPartition::exact(&[(1, "1 week")]))
            .with_partition(
                ContractType::Monthly,
                DurationPartition::exact(&[
                    (1, "1 month"),
                    (3, "3 months"),
                    (6, "6 months"),
                    (9, "9 months"),
                ]),
            )
            .with_row_rule(RowRule::TitleWithYear)
            .with_row_rule(RowRule::SpreadSavings {
                surcharge_field: "mileage_numeric".into(),
            })
            .with_schema(OutputSchema::new([
                "sub-url", "title", "make", "model", "year", "promotion", "runnings_kms",
                "contract", "base_price", "savings", "offered_price", "duration", "mileage",
                "mileage_note", "standard_cover_insurance", "full_cover_insurance",
            ]))
    }

    /// Dubizzle: per make/model rental listings; contract cadence comes
    /// from the detail page.
    pub fn dubizzle() -> Self {
        Self::new("dubizzle")
            .with_list_page(
                ContractType::Daily,
                "https://dubai.dubizzle.com/motors/rental-cars/{make}/{model}",
            )
            .with_ready_selectors(
                "#listing-card-wrapper a[data-testid^='listing-']",
                "h6[data-testid='listing-sub-heading'], h5[data-testid^='rental-price-']",
            )
            .with_row_rule(RowRule::dubizzle_title())
            .with_row_rule(RowRule::ListPriceOnly)
            .with_schema(OutputSchema::new([
                "sub-url", "title", "make", "model", "variant", "year", "is_featured",
                "contract", "base_price", "savings", "offered_price", "mileage", "mileage_note",
                "description", "sub_description", "posted_on", "dealer_name", "dealer_type",
                "dealer_page", "minimum_driver_age", "deposit", "refund_period", "location",
            ]))
    }
}

fn default_columns() -> Vec<&'static str> {
    vec![
        "sub-url", "title", "make", "model", "year", "contract", "base_price", "savings",
        "offered_price", "duration",
    ]
}

/// UTC+05:30
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Yango search window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YangoWindow {
    pub since: i64,
    pub until: i64,
    pub until_weekly: i64,
}

impl YangoWindow {
    /// Pickup tomorrow at 11:30 IST; return after one day (seven for weekly).
    pub fn starting_after(now: DateTime<Utc>) -> Self {
        let ist = FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
        let tomorrow = now.with_timezone(&ist).date_naive() + Duration::days(1);
        let at_1130 = |days: i64| {
            let date = tomorrow + Duration::days(days);
            date.and_hms_opt(11, 30, 0)
                .and_then(|dt| ist.from_local_datetime(&dt).single())
                .map(|dt| dt.timestamp_millis())
                .unwrap_or_default()
        };

        Self {
            since: at_1130(0),
            until: at_1130(1),
            until_weekly: at_1130(7),
        }
    }
}
