//! Listing normalization - canonical lookup keys and typed listings.
//!
//! Sites put non-identifying state in the query string (the selected
//! duration, the pickup location). Two URLs that differ only in those
//! parameters point at the same car, so the lookup key is computed from a
//! canonical form with them removed.

use std::collections::HashSet;
use url::{form_urlencoded, Url};

use crate::error::{SchemaError, SchemaResult, UrlError};
use crate::sources::profile::SourceProfile;
use crate::traits::extractor::{ExtractContext, RawRecord, PAGE_STATUS};
use crate::types::catalog::{join_case, parse_year};
use crate::types::detail::SOURCE_URL;
use crate::types::listing::{ContractType, Listing, LookupKey};

fn parse(url: &str) -> Result<Url, UrlError> {
    let parsed = Url::parse(url.trim()).map_err(|e| UrlError::Parse {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.host_str().is_none() {
        return Err(UrlError::NoHost {
            url: url.to_string(),
        });
    }
    Ok(parsed)
}

fn set_pairs(url: &mut Url, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }
}

/// Whether a query parameter name matches; names compare ASCII
/// case-insensitively everywhere a URL is keyed or rewritten.
fn same_param(name: &str, param: &str) -> bool {
    name.eq_ignore_ascii_case(param)
}

/// Decoded name of one raw `name=value` query segment.
fn segment_name(segment: &str) -> Option<String> {
    form_urlencoded::parse(segment.as_bytes())
        .next()
        .map(|(name, _)| name.into_owned())
}

/// Rewrite (or add) the duration selector of a URL.
///
/// The first occurrence of `param` takes the new value, later duplicates
/// are dropped, and the parameter is appended when absent. Every other
/// parameter keeps its position and its original encoding.
pub fn with_duration(url: &str, param: &str, value: u32) -> Result<String, UrlError> {
    let mut parsed = parse(url)?;

    let mut replaced = false;
    let mut segments: Vec<String> = Vec::new();
    for segment in parsed.query().unwrap_or_default().split('&') {
        if segment.is_empty() {
            continue;
        }
        match segment_name(segment) {
            Some(name) if same_param(&name, param) => {
                if !replaced {
                    let raw_name = segment.split('=').next().unwrap_or(param);
                    segments.push(format!("{raw_name}={value}"));
                    replaced = true;
                }
            }
            _ => segments.push(segment.to_string()),
        }
    }
    if !replaced {
        let name: String = form_urlencoded::byte_serialize(param.as_bytes()).collect();
        segments.push(format!("{name}={value}"));
    }

    parsed.set_query(Some(&segments.join("&")));
    Ok(parsed.into())
}

/// Canonicalizes listing URLs and turns raw listing records into [`Listing`]s.
#[derive(Debug, Clone, Default)]
pub struct ListingNormalizer {
    stripped: HashSet<String>,
    duration_param: Option<String>,
}

impl ListingNormalizer {
    /// Create a normalizer stripping the given query parameters.
    pub fn new(stripped: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            stripped: stripped
                .into_iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .collect(),
            duration_param: None,
        }
    }

    /// Normalizer configured from a source profile.
    pub fn for_profile(profile: &SourceProfile) -> Self {
        let normalizer = Self::new(&profile.stripped_params);
        match &profile.duration_param {
            Some(param) => normalizer.with_duration_param(param),
            None => normalizer,
        }
    }

    /// Set the duration selector parameter; it is always stripped.
    pub fn with_duration_param(mut self, param: impl Into<String>) -> Self {
        let param = param.into();
        self.stripped.insert(param.to_ascii_lowercase());
        self.duration_param = Some(param);
        self
    }

    /// Canonical form of a URL: no fragment, no stripped parameters,
    /// remaining parameters sorted.
    pub fn canonical_url(&self, url: &str) -> Result<String, UrlError> {
        let mut parsed = parse(url)?;
        parsed.set_fragment(None);

        let mut pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(k, _)| !self.stripped.contains(&k.to_ascii_lowercase()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();

        set_pairs(&mut parsed, &pairs);
        Ok(parsed.into())
    }

    /// Lookup key of a listing URL.
    pub fn lookup_key(&self, url: &str) -> Result<LookupKey, UrlError> {
        self.canonical_url(url).map(LookupKey::new)
    }

    /// Value of the duration selector in a URL, if present and numeric.
    pub fn duration_of(&self, url: &str) -> Option<u32> {
        let param = self.duration_param.as_deref()?;
        let parsed = parse(url).ok()?;
        parsed
            .query_pairs()
            .find(|(k, _)| same_param(k, param))
            .and_then(|(_, v)| v.trim().parse().ok())
    }

    /// Duration selector parameter name.
    pub fn duration_param(&self) -> Option<&str> {
        self.duration_param.as_deref()
    }

    /// Validate a raw listing record and canonicalize it.
    ///
    /// Make and model fall back to the catalog target the page was
    /// requested for; year never does. A listing without a usable
    /// identity is rejected rather than carried with empty fields.
    pub fn normalize(&self, raw: &RawRecord, context: &ExtractContext) -> SchemaResult<Listing> {
        let source_url = raw
            .text(SOURCE_URL)
            .ok_or(SchemaError::MissingField { field: SOURCE_URL })?;
        let key = self.lookup_key(&source_url)?;

        let make = raw
            .text("make")
            .or_else(|| context.make.clone())
            .map(|m| join_case(&m))
            .filter(|m| !m.is_empty())
            .ok_or(SchemaError::MissingField { field: "make" })?;
        let model = raw
            .text("model")
            .or_else(|| context.model.clone())
            .map(|m| join_case(&m))
            .filter(|m| !m.is_empty())
            .ok_or(SchemaError::MissingField { field: "model" })?;

        let year_text = raw
            .text("year")
            .ok_or(SchemaError::MissingField { field: "year" })?;
        let year = parse_year(&year_text).ok_or(SchemaError::InvalidYear { value: year_text })?;

        let contract_type = match raw.text("contract") {
            Some(text) => text.parse::<ContractType>()?,
            None => context.contract_type,
        };

        let attributes = raw
            .attributes
            .iter()
            .filter(|(k, _)| {
                !matches!(
                    k.as_str(),
                    SOURCE_URL | "make" | "model" | "year" | "contract" | PAGE_STATUS
                )
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Listing {
            key,
            source_url,
            make,
            model,
            year,
            contract_type,
            partial: false,
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn normalizer() -> ListingNormalizer {
        ListingNormalizer::new(["location"]).with_duration_param("duration_months")
    }

    fn context() -> ExtractContext {
        ExtractContext::listing("yango", ContractType::Monthly).for_target("toyota", "camry")
    }

    #[test]
    fn test_canonical_url_strips_and_sorts() {
        let n = normalizer();
        let key = n
            .canonical_url("https://Drive.Example.com/car?z=1&duration_months=9&a=2&Location=x#top")
            .unwrap();
        assert_eq!(key, "https://drive.example.com/car?a=2&z=1");

        let bare = n.canonical_url("https://drive.example.com/car?duration_months=3").unwrap();
        assert_eq!(bare, "https://drive.example.com/car");
    }

    #[test]
    fn test_canonical_url_rejects_garbage() {
        let n = normalizer();
        assert!(matches!(n.canonical_url("not a url"), Err(UrlError::Parse { .. })));
        assert!(matches!(
            n.canonical_url("mailto:someone@example.com"),
            Err(UrlError::NoHost { .. })
        ));
    }

    #[test]
    fn test_with_duration_rewrites_in_place() {
        let url = "https://drive.example.com/car?since=1&duration_months=9&is_monthly=true";
        assert_eq!(
            with_duration(url, "duration_months", 2).unwrap(),
            "https://drive.example.com/car?since=1&duration_months=2&is_monthly=true"
        );
    }

    #[test]
    fn test_with_duration_appends_and_dedups() {
        assert_eq!(
            with_duration("https://drive.example.com/car", "duration_months", 4).unwrap(),
            "https://drive.example.com/car?duration_months=4"
        );
        assert_eq!(
            with_duration(
                "https://drive.example.com/car?duration_months=1&x=y&duration_months=3",
                "duration_months",
                7
            )
            .unwrap(),
            "https://drive.example.com/car?duration_months=7&x=y"
        );
    }

    #[test]
    fn test_with_duration_leaves_other_params_untouched() {
        assert_eq!(
            with_duration(
                "https://drive.example.com/car?location=Dubai%20Marina&tags=a,b&duration_months=9",
                "duration_months",
                2
            )
            .unwrap(),
            "https://drive.example.com/car?location=Dubai%20Marina&tags=a,b&duration_months=2"
        );
    }

    #[test]
    fn test_duration_param_matches_any_case() {
        let n = normalizer();
        let url = "https://drive.example.com/car?id=1&Duration_Months=9";
        assert_eq!(n.duration_of(url), Some(9));
        assert_eq!(n.lookup_key(url).unwrap().as_str(), "https://drive.example.com/car?id=1");
        assert_eq!(
            with_duration(url, "duration_months", 7).unwrap(),
            "https://drive.example.com/car?id=1&Duration_Months=7"
        );
    }

    #[test]
    fn test_duration_of() {
        let n = normalizer();
        assert_eq!(n.duration_of("https://d.example.com/c?duration_months=9"), Some(9));
        assert_eq!(n.duration_of("https://d.example.com/c"), None);
        assert_eq!(ListingNormalizer::default().duration_of("https://d.example.com/c?duration_months=9"), None);
    }

    #[test]
    fn test_normalize_uppercases_identity_and_keeps_extras() {
        let raw = RawRecord::new()
            .with("sub-url", "https://drive.example.com/car?id=1&duration_months=9")
            .with("year", "2023.0")
            .with("ratings", "4.8")
            .with("page_status", "found");

        let listing = normalizer().normalize(&raw, &context()).unwrap();
        assert_eq!(listing.make, "TOYOTA");
        assert_eq!(listing.model, "CAMRY");
        assert_eq!(listing.year, 2023);
        assert_eq!(listing.contract_type, ContractType::Monthly);
        assert_eq!(listing.key.as_str(), "https://drive.example.com/car?id=1");
        assert_eq!(listing.source_url, "https://drive.example.com/car?id=1&duration_months=9");
        assert_eq!(listing.attributes.keys().collect::<Vec<_>>(), vec!["ratings"]);
    }

    #[test]
    fn test_normalize_rejects_missing_identity() {
        let n = normalizer();
        let catalog_wide = ExtractContext::listing("invygo", ContractType::Weekly);

        let no_year = RawRecord::new().with("sub-url", "https://x.example.com/1");
        assert_eq!(
            n.normalize(&no_year, &context()),
            Err(SchemaError::MissingField { field: "year" })
        );

        let bad_year = no_year.clone().with("year", "new");
        assert!(matches!(
            n.normalize(&bad_year, &context()),
            Err(SchemaError::InvalidYear { .. })
        ));

        let no_make = no_year.with("year", 2023);
        assert_eq!(
            n.normalize(&no_make, &catalog_wide),
            Err(SchemaError::MissingField { field: "make" })
        );
    }

    #[test]
    fn test_normalize_reads_contract_attribute() {
        let raw = RawRecord::new()
            .with("sub-url", "https://x.example.com/1")
            .with("year", 2022)
            .with("contract", "Weekly");
        let listing = normalizer().normalize(&raw, &context()).unwrap();
        assert_eq!(listing.contract_type, ContractType::Weekly);
    }

    proptest! {
        #[test]
        fn prop_duration_param_never_changes_key(
            id in "[a-z0-9]{1,12}",
            extra in "[a-z]{1,6}",
            a in 0u32..100,
            b in 0u32..100,
        ) {
            let n = normalizer();
            let base = format!("https://drive.example.com/car/{id}?{extra}=1");
            let left = with_duration(&base, "duration_months", a).unwrap();
            let right = with_duration(&base, "duration_months", b).unwrap();
            prop_assert_eq!(n.lookup_key(&left).unwrap(), n.lookup_key(&right).unwrap());
            prop_assert_eq!(n.lookup_key(&left).unwrap(), n.lookup_key(&base).unwrap());
        }
    }
}
