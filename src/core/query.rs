//! Query shaping: filtering, search, ordering and pagination
//!
//! Query strings are interpreted against a declarative [`QueryConfig`] and
//! applied in a fixed order:
//!
//! 1. exact-match filters on declared fields
//! 2. free-text search over the configured search fields
//! 3. ordering (explicit `ordering=` or the configured default)
//! 4. pagination
//!
//! # Example
//! ```text
//! GET /cats?color=Black&birth_year=2019
//! GET /cats?search=Mu
//! GET /cats?ordering=-birth_year,name&page=2&limit=10
//! ```

use crate::core::error::{ApiError, ApiResult};
use crate::core::field::{FieldKind, FieldPath, FieldSource, FieldValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Reserved query-string parameters
pub const SEARCH_PARAM: &str = "search";
pub const ORDERING_PARAM: &str = "ordering";
pub const PAGE_PARAM: &str = "page";
pub const LIMIT_PARAM: &str = "limit";

// =============================================================================
// Configuration
// =============================================================================

/// Declared filter, search and ordering fields of a resource
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Exact-match filter fields and the type their values parse to
    pub filter_fields: IndexMap<String, FieldKind>,

    /// Search fields: `^name` (prefix), `=name` (exact), `name` (contains);
    /// dotted or `__` paths traverse related entities
    pub search_fields: Vec<String>,

    /// Fields accepted by `ordering=`
    pub ordering_fields: Vec<String>,

    /// Ordering used when no valid explicit ordering is requested
    pub default_ordering: Vec<String>,
}

/// Page size policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaginationConfig {
    pub page_size: usize,
    pub max_page_size: usize,

    /// Reject malformed paging/ordering/filter values instead of ignoring them
    pub strict: bool,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_page_size: 100,
            strict: false,
        }
    }
}

/// How a search field matches a term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Contains,
    Prefix,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchField {
    pub path: FieldPath,
    pub mode: SearchMode,
}

impl SearchField {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (mode, name) = if let Some(rest) = raw.strip_prefix('^') {
            (SearchMode::Prefix, rest)
        } else if let Some(rest) = raw.strip_prefix('=') {
            (SearchMode::Exact, rest)
        } else {
            (SearchMode::Contains, raw)
        };
        Self {
            path: FieldPath::parse(name),
            mode,
        }
    }
}

// =============================================================================
// Query spec
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub path: FieldPath,
    pub descending: bool,
}

impl OrderKey {
    /// `name` ascending, `-name` descending
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.strip_prefix('-') {
            Some(name) => Self {
                path: FieldPath::parse(name),
                descending: true,
            },
            None => Self {
                path: FieldPath::parse(raw),
                descending: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub limit: usize,
}

impl PageRequest {
    /// Saturates, so an absurd page number lands past every result set
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

/// A request's query parameters, interpreted
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub filters: Vec<(FieldPath, FieldValue)>,
    pub search_terms: Vec<String>,
    pub ordering: Vec<OrderKey>,
    pub page: PageRequest,
}

// =============================================================================
// Predicates
// =============================================================================

/// Filter predicate evaluated by the persistence layer against its rows
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Every child matches (empty = always true)
    All(Vec<Predicate>),

    /// At least one child matches (empty = always false)
    Any(Vec<Predicate>),

    /// Some value at `path` equals `value`
    Equals { path: FieldPath, value: FieldValue },

    /// Some value at `path` matches `term`, case-insensitively
    Matches {
        path: FieldPath,
        mode: SearchMode,
        term: String,
    },
}

impl Predicate {
    pub fn always() -> Self {
        Predicate::All(Vec::new())
    }

    pub fn matches<S: FieldSource + ?Sized>(&self, source: &S) -> bool {
        match self {
            Predicate::All(children) => children.iter().all(|p| p.matches(source)),
            Predicate::Any(children) => children.iter().any(|p| p.matches(source)),
            Predicate::Equals { path, value } => {
                source.field_values(path).iter().any(|v| v == value)
            }
            Predicate::Matches { path, mode, term } => {
                let term = term.to_lowercase();
                source
                    .field_values(path)
                    .iter()
                    .filter_map(FieldValue::to_search_text)
                    .map(|text| text.to_lowercase())
                    .any(|text| match mode {
                        SearchMode::Contains => text.contains(&term),
                        SearchMode::Prefix => text.starts_with(&term),
                        SearchMode::Exact => text == term,
                    })
            }
        }
    }
}

// =============================================================================
// Pages
// =============================================================================

/// Paginated response structure
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PaginationMeta {
    /// Current page number (starts at 1)
    pub page: usize,

    /// Number of items per page
    pub limit: usize,

    /// Total number of items after filtering and search
    pub total: usize,

    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationMeta {
    pub fn new(request: PageRequest, total: usize) -> Self {
        let limit = request.limit.max(1);
        let total_pages = total.div_ceil(limit);

        Self {
            page: request.page,
            limit,
            total,
            total_pages,
            has_next: request.offset().saturating_add(limit) < total,
            has_prev: request.page > 1,
        }
    }
}

/// One page of a shaped result set
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PaginationMeta,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }

    pub fn into_response(self) -> PaginatedResponse<T> {
        PaginatedResponse {
            data: self.items,
            pagination: self.meta,
        }
    }
}

// =============================================================================
// Shaper
// =============================================================================

/// Turns query parameters into a [`QuerySpec`] and applies it to result sets
#[derive(Debug, Clone)]
pub struct QueryShaper {
    config: QueryConfig,
    search_fields: Vec<SearchField>,
    pagination: PaginationConfig,
}

impl QueryShaper {
    pub fn new(config: QueryConfig, pagination: PaginationConfig) -> Self {
        let search_fields = config
            .search_fields
            .iter()
            .map(|raw| SearchField::parse(raw))
            .collect();
        Self {
            config,
            search_fields,
            pagination,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    fn invalid(&self, parameter: &str, message: String) -> ApiResult<()> {
        if self.pagination.strict {
            return Err(ApiError::InvalidQuery {
                parameter: parameter.to_string(),
                message,
            });
        }
        tracing::warn!(parameter, %message, "ignoring invalid query parameter");
        Ok(())
    }

    /// Interpret raw query parameters
    pub fn parse(&self, params: &HashMap<String, String>) -> ApiResult<QuerySpec> {
        Ok(QuerySpec {
            filters: self.parse_filters(params)?,
            search_terms: params
                .get(SEARCH_PARAM)
                .map(|raw| search_terms(raw))
                .unwrap_or_default(),
            ordering: self.parse_ordering(params.get(ORDERING_PARAM).map(String::as_str))?,
            page: self.parse_page(params)?,
        })
    }

    fn parse_filters(
        &self,
        params: &HashMap<String, String>,
    ) -> ApiResult<Vec<(FieldPath, FieldValue)>> {
        let mut filters = Vec::new();

        // Declared order, not query-string order
        for (name, kind) in &self.config.filter_fields {
            let Some(raw) = params.get(name) else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }
            match kind.parse(raw) {
                Some(value) => filters.push((FieldPath::parse(name), value)),
                None => self.invalid(name, format!("'{}' is not a valid {:?} value", raw, kind))?,
            }
        }

        Ok(filters)
    }

    fn parse_ordering(&self, raw: Option<&str>) -> ApiResult<Vec<OrderKey>> {
        let mut keys = Vec::new();

        for part in raw.unwrap_or_default().split(',') {
            if part.trim().is_empty() {
                continue;
            }
            let key = OrderKey::parse(part);
            let allowed = self
                .config
                .ordering_fields
                .iter()
                .any(|field| FieldPath::parse(field) == key.path);
            if allowed {
                keys.push(key);
            } else {
                self.invalid(ORDERING_PARAM, format!("cannot order by '{}'", part.trim()))?;
            }
        }

        if keys.is_empty() {
            keys = self
                .config
                .default_ordering
                .iter()
                .map(|raw| OrderKey::parse(raw))
                .collect();
        }

        Ok(keys)
    }

    fn parse_page(&self, params: &HashMap<String, String>) -> ApiResult<PageRequest> {
        let page = match params.get(PAGE_PARAM).map(|raw| raw.trim().parse::<usize>()) {
            None => 1,
            Some(Ok(page)) if page >= 1 => page,
            Some(_) => {
                self.invalid(PAGE_PARAM, "page must be a positive integer".to_string())?;
                1
            }
        };

        let limit = match params.get(LIMIT_PARAM).map(|raw| raw.trim().parse::<usize>()) {
            None => self.pagination.page_size,
            Some(Ok(limit)) if limit >= 1 => limit,
            Some(_) => {
                self.invalid(LIMIT_PARAM, "limit must be a positive integer".to_string())?;
                self.pagination.page_size
            }
        };

        Ok(PageRequest {
            page,
            limit: limit.clamp(1, self.pagination.max_page_size.max(1)),
        })
    }

    /// Filter and search predicate for a spec.
    ///
    /// Filters and search terms conjoin; each term must match at least one
    /// search field.
    pub fn predicate(&self, spec: &QuerySpec) -> Predicate {
        let mut clauses: Vec<Predicate> = spec
            .filters
            .iter()
            .map(|(path, value)| Predicate::Equals {
                path: path.clone(),
                value: value.clone(),
            })
            .collect();

        if !self.search_fields.is_empty() {
            clauses.extend(spec.search_terms.iter().map(|term| {
                Predicate::Any(
                    self.search_fields
                        .iter()
                        .map(|field| Predicate::Matches {
                            path: field.path.clone(),
                            mode: field.mode,
                            term: term.clone(),
                        })
                        .collect(),
                )
            }));
        }

        Predicate::All(clauses)
    }

    /// Run all four stages over an unfiltered result set
    pub fn apply<T: FieldSource>(&self, base: Vec<T>, spec: &QuerySpec) -> ApiResult<Page<T>> {
        let predicate = self.predicate(spec);
        let filtered = base.into_iter().filter(|row| predicate.matches(row)).collect();
        self.finish(filtered, spec)
    }

    /// Order and paginate an already filtered result set
    pub fn finish<T: FieldSource>(&self, mut rows: Vec<T>, spec: &QuerySpec) -> ApiResult<Page<T>> {
        if !spec.ordering.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &spec.ordering));
        }

        let meta = PaginationMeta::new(spec.page, rows.len());
        if self.pagination.strict && spec.page.page > meta.total_pages.max(1) {
            return Err(ApiError::InvalidQuery {
                parameter: PAGE_PARAM.to_string(),
                message: format!("page {} is out of range", spec.page.page),
            });
        }

        let items = rows
            .into_iter()
            .skip(spec.page.offset())
            .take(spec.page.limit)
            .collect();

        Ok(Page { items, meta })
    }
}

/// Split a search parameter into terms on whitespace and commas
pub fn search_terms(raw: &str) -> Vec<String> {
    raw.replace('\0', "")
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn sort_value<T: FieldSource>(row: &T, path: &FieldPath) -> FieldValue {
    row.field_values(path)
        .into_iter()
        .next()
        .unwrap_or(FieldValue::Null)
}

fn compare_rows<T: FieldSource>(a: &T, b: &T, keys: &[OrderKey]) -> Ordering {
    for key in keys {
        let ordering = sort_value(a, &key.path).total_cmp(&sort_value(b, &key.path));
        let ordering = if key.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Row {
        name: &'static str,
        color: &'static str,
        year: i64,
        tags: Vec<&'static str>,
    }

    impl FieldSource for Row {
        fn field_values(&self, path: &FieldPath) -> Vec<FieldValue> {
            match path.segments() {
                [f] if f == "name" => vec![FieldValue::String(self.name.into())],
                [f] if f == "color" => vec![FieldValue::String(self.color.into())],
                [f] if f == "birth_year" => vec![FieldValue::Integer(self.year)],
                [f, g] if f == "tags" && g == "name" => self
                    .tags
                    .iter()
                    .map(|t| FieldValue::String((*t).into()))
                    .collect(),
                _ => Vec::new(),
            }
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { name: "Murzik", color: "Black", year: 2019, tags: vec!["climber"] },
            Row { name: "Barsik", color: "Black", year: 2020, tags: vec![] },
            Row { name: "hMur", color: "White", year: 2019, tags: vec!["sleeper"] },
            Row { name: "Mur", color: "Black", year: 2018, tags: vec!["climber", "hunter"] },
        ]
    }

    fn config() -> QueryConfig {
        let mut filter_fields = IndexMap::new();
        filter_fields.insert("color".to_string(), FieldKind::Text);
        filter_fields.insert("birth_year".to_string(), FieldKind::Integer);
        QueryConfig {
            filter_fields,
            search_fields: vec!["^name".into()],
            ordering_fields: vec!["name".into(), "birth_year".into()],
            default_ordering: vec!["birth_year".into()],
        }
    }

    fn shaper() -> QueryShaper {
        QueryShaper::new(config(), PaginationConfig::default())
    }

    fn strict_shaper() -> QueryShaper {
        QueryShaper::new(
            config(),
            PaginationConfig {
                strict: true,
                ..PaginationConfig::default()
            },
        )
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn names(page: &Page<Row>) -> Vec<&'static str> {
        page.items.iter().map(|r| r.name).collect()
    }

    #[test]
    fn test_search_field_modes() {
        assert_eq!(SearchField::parse("^name").mode, SearchMode::Prefix);
        assert_eq!(SearchField::parse("=name").mode, SearchMode::Exact);
        let related = SearchField::parse("achievements__name");
        assert_eq!(related.mode, SearchMode::Contains);
        assert_eq!(related.path, FieldPath::parse("achievements.name"));
    }

    #[test]
    fn test_prefix_search_is_anchored() {
        let shaper = shaper();
        let spec = shaper.parse(&params(&[("search", "Mu")])).unwrap();
        let page = shaper.apply(rows(), &spec).unwrap();
        assert_eq!(names(&page), vec!["Mur", "Murzik"]);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let shaper = shaper();
        let spec = shaper.parse(&params(&[("search", "mUR")])).unwrap();
        assert_eq!(shaper.apply(rows(), &spec).unwrap().meta.total, 2);
    }

    #[test]
    fn test_contains_search_over_related_collection() {
        let shaper = QueryShaper::new(
            QueryConfig {
                search_fields: vec!["tags__name".into()],
                ..config()
            },
            PaginationConfig::default(),
        );
        let spec = shaper.parse(&params(&[("search", "unt")])).unwrap();
        assert_eq!(names(&shaper.apply(rows(), &spec).unwrap()), vec!["Mur"]);
    }

    #[test]
    fn test_search_fields_are_or_terms_are_and() {
        let shaper = QueryShaper::new(
            QueryConfig {
                search_fields: vec!["^name".into(), "tags__name".into()],
                ..config()
            },
            PaginationConfig::default(),
        );

        let either = shaper.parse(&params(&[("search", "sleep")])).unwrap();
        assert_eq!(names(&shaper.apply(rows(), &either).unwrap()), vec!["hMur"]);

        let both = shaper.parse(&params(&[("search", "Mur, climber")])).unwrap();
        assert_eq!(both.search_terms, vec!["Mur", "climber"]);
        assert_eq!(
            names(&shaper.apply(rows(), &both).unwrap()),
            vec!["Mur", "Murzik"]
        );
    }

    #[test]
    fn test_two_filters_conjoin() {
        let shaper = shaper();
        let spec = shaper
            .parse(&params(&[("color", "Black"), ("birth_year", "2019")]))
            .unwrap();
        assert_eq!(names(&shaper.apply(rows(), &spec).unwrap()), vec!["Murzik"]);
    }

    #[test]
    fn test_filter_and_search_conjoin() {
        let shaper = shaper();
        let spec = shaper
            .parse(&params(&[("color", "White"), ("search", "Mu")]))
            .unwrap();
        assert!(shaper.apply(rows(), &spec).unwrap().items.is_empty());
    }

    #[test]
    fn test_unknown_filter_keys_ignored() {
        let shaper = shaper();
        let spec = shaper.parse(&params(&[("owner", "x"), ("foo", "bar")])).unwrap();
        assert!(spec.filters.is_empty());
        assert_eq!(shaper.apply(rows(), &spec).unwrap().meta.total, 4);
    }

    #[test]
    fn test_malformed_filter_value() {
        let lenient = shaper().parse(&params(&[("birth_year", "old")])).unwrap();
        assert!(lenient.filters.is_empty());

        let err = strict_shaper()
            .parse(&params(&[("birth_year", "old")]))
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidQuery { parameter, .. } if parameter == "birth_year"));
    }

    #[test]
    fn test_default_ordering_applies_without_parameter() {
        let shaper = shaper();
        let spec = shaper.parse(&HashMap::new()).unwrap();
        let page = shaper.apply(rows(), &spec).unwrap();
        assert_eq!(page.items.first().map(|r| r.year), Some(2018));
        assert_eq!(page.items.last().map(|r| r.year), Some(2020));
    }

    #[test]
    fn test_explicit_ordering_overrides_default() {
        let shaper = shaper();
        let spec = shaper.parse(&params(&[("ordering", "-name")])).unwrap();
        assert_eq!(
            names(&shaper.apply(rows(), &spec).unwrap()),
            vec!["hMur", "Murzik", "Mur", "Barsik"]
        );
    }

    #[test]
    fn test_multi_key_ordering() {
        let shaper = shaper();
        let spec = shaper
            .parse(&params(&[("ordering", "birth_year,-name")]))
            .unwrap();
        assert_eq!(
            names(&shaper.apply(rows(), &spec).unwrap()),
            vec!["Mur", "hMur", "Murzik", "Barsik"]
        );
    }

    #[test]
    fn test_invalid_ordering_falls_back_to_default() {
        let spec = shaper().parse(&params(&[("ordering", "color")])).unwrap();
        assert_eq!(spec.ordering, vec![OrderKey::parse("birth_year")]);

        assert!(
            strict_shaper()
                .parse(&params(&[("ordering", "color")]))
                .is_err()
        );
    }

    #[test]
    fn test_pagination() {
        let shaper = shaper();
        let spec = shaper
            .parse(&params(&[("page", "2"), ("limit", "3")]))
            .unwrap();
        let page = shaper.apply(rows(), &spec).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(
            page.meta,
            PaginationMeta {
                page: 2,
                limit: 3,
                total: 4,
                total_pages: 2,
                has_next: false,
                has_prev: true,
            }
        );
    }

    #[test]
    fn test_pagination_limits_and_fallbacks() {
        let shaper = shaper();
        let spec = shaper
            .parse(&params(&[("page", "zero"), ("limit", "1000")]))
            .unwrap();
        assert_eq!(spec.page, PageRequest { page: 1, limit: 100 });

        let spec = shaper.parse(&params(&[("limit", "0")])).unwrap();
        assert_eq!(spec.page.limit, 20);

        assert!(strict_shaper().parse(&params(&[("page", "0")])).is_err());
    }

    #[test]
    fn test_page_out_of_range() {
        let lenient = shaper();
        let spec = lenient.parse(&params(&[("page", "9")])).unwrap();
        let page = lenient.apply(rows(), &spec).unwrap();
        assert!(page.items.is_empty());
        assert!(!page.meta.has_next);

        let strict = strict_shaper();
        let spec = strict.parse(&params(&[("page", "9")])).unwrap();
        assert!(strict.apply(rows(), &spec).is_err());
    }

    #[test]
    fn test_huge_page_numbers_do_not_wrap() {
        let lenient = shaper();
        let strict = strict_shaper();

        for query in [
            params(&[("page", "18446744073709551615")]),
            params(&[("page", "1152921504606846977"), ("limit", "16")]),
        ] {
            let spec = lenient.parse(&query).unwrap();
            assert!(spec.page.page > 1);
            let page = lenient.apply(rows(), &spec).unwrap();
            assert!(page.items.is_empty());
            assert_eq!(page.meta.total, 4);
            assert!(!page.meta.has_next);
            assert!(page.meta.has_prev);

            let spec = strict.parse(&query).unwrap();
            let err = strict.apply(rows(), &spec).unwrap_err();
            assert!(matches!(err, ApiError::InvalidQuery { .. }));
        }
    }

    #[test]
    fn test_apply_is_deterministic() {
        let shaper = shaper();
        let spec = shaper
            .parse(&params(&[("color", "Black"), ("ordering", "name")]))
            .unwrap();
        let first = names(&shaper.apply(rows(), &spec).unwrap());
        let second = names(&shaper.apply(rows(), &spec).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_predicate_matches_everything() {
        assert!(Predicate::always().matches(&rows()[0]));
        assert!(!Predicate::Any(Vec::new()).matches(&rows()[0]));
    }
}
