use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Backend-assigned report identifier. The wire value may be a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ReportId(String);

impl ReportId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ReportId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum WireId {
            Int(i64),
            Str(String),
        }

        Ok(match WireId::deserialize(deserializer)? {
            WireId::Int(value) => ReportId(value.to_string()),
            WireId::Str(value) => ReportId(value.trim().to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Container,
    IllegalDumpSite,
    /// A label the backend knows but this client does not offer for new reports.
    Unlisted(String),
}

impl Category {
    pub const SELECTABLE: [Category; 2] = [Category::Container, Category::IllegalDumpSite];

    pub fn label(&self) -> &str {
        match self {
            Category::Container => "container",
            Category::IllegalDumpSite => "illegal-dump-site",
            Category::Unlisted(label) => label.as_str(),
        }
    }

    pub fn is_selectable(&self) -> bool {
        !matches!(self, Category::Unlisted(_))
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Container
    }
}

impl From<String> for Category {
    fn from(raw: String) -> Self {
        match raw.trim() {
            "container" => Category::Container,
            "illegal-dump-site" => Category::IllegalDumpSite,
            _ => Category::Unlisted(raw),
        }
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        match category {
            Category::Unlisted(label) => label,
            other => other.label().to_string(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub photo_url: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub owner_id: Option<Uuid>,
}

impl Report {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}

/// Insert payload; `id` is assigned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewReport {
    pub name: String,
    pub category: Category,
    pub photo_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub owner_id: Uuid,
}

pub const REPORT_COLUMNS: &str = "id,name,category,photo_url,latitude,longitude,owner_id";

/// Rendered reports, at most one entry per id, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct ReportSet {
    reports: Vec<Report>,
    ids: HashSet<ReportId>,
}

impl ReportSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fetched(fetched: Vec<Report>) -> Self {
        let mut set = Self::new();
        for report in fetched {
            set.merge(report);
        }
        set
    }

    /// Appends `report` unless its id is already present. Returns whether it was added.
    pub fn merge(&mut self, report: Report) -> bool {
        if self.ids.contains(&report.id) {
            return false;
        }
        self.ids.insert(report.id.clone());
        self.reports.push(report);
        true
    }

    /// Replaces the set with a fresh fetch while keeping entries the fetch did not
    /// return yet (a live insert can land before the read sees it).
    pub fn reconcile(&mut self, fetched: Vec<Report>) {
        let previous = std::mem::take(&mut self.reports);
        self.ids.clear();
        for report in fetched {
            self.merge(report);
        }
        for report in previous {
            self.merge(report);
        }
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Report> {
        self.reports.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn report(id: &str) -> Report {
        Report {
            id: ReportId::new(id),
            name: format!("report {id}"),
            category: Category::Container,
            photo_url: None,
            latitude: 52.0,
            longitude: 21.0,
            owner_id: None,
        }
    }

    #[test]
    fn decodes_numeric_and_string_ids() {
        let numeric: Report = serde_json::from_str(
            r#"{"id":24,"name":"Bin","category":"container","latitude":1.5,"longitude":2.5}"#,
        )
        .unwrap();
        assert_eq!(numeric.id, ReportId::new("24"));
        assert_eq!(numeric.photo_url, None);

        let text: Report = serde_json::from_str(
            r#"{"id":"abc","name":"Dump","category":"illegal-dump-site","photo_url":"https://x/y.jpg","latitude":0,"longitude":0}"#,
        )
        .unwrap();
        assert_eq!(text.id, ReportId::new("abc"));
        assert_eq!(text.category, Category::IllegalDumpSite);
    }

    #[test]
    fn unknown_category_is_kept_but_not_selectable() {
        let category = Category::from("scrap-metal".to_string());
        assert_eq!(category.label(), "scrap-metal");
        assert!(!category.is_selectable());
        assert!(Category::SELECTABLE.iter().all(Category::is_selectable));
        assert_eq!(
            serde_json::to_string(&Category::IllegalDumpSite).unwrap(),
            "\"illegal-dump-site\""
        );
    }

    #[test]
    fn merge_skips_known_ids() {
        let mut set = ReportSet::new();
        assert!(set.merge(report("1")));
        assert!(!set.merge(report("1")));
        assert!(set.merge(report("2")));
        let ids: Vec<&str> = set.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn reconcile_keeps_live_entries_missing_from_fetch() {
        let mut set = ReportSet::from_fetched(vec![report("1")]);
        set.merge(report("9"));
        set.reconcile(vec![report("1"), report("2")]);
        let ids: Vec<&str> = set.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "9"]);
    }

    proptest! {
        #[test]
        fn merge_never_duplicates_ids(ids in proptest::collection::vec(0u8..16, 0..64)) {
            let mut set = ReportSet::new();
            for id in &ids {
                set.merge(report(&id.to_string()));
            }
            let unique: HashSet<&ReportId> = set.iter().map(|r| &r.id).collect();
            prop_assert_eq!(unique.len(), set.len());
            let distinct: HashSet<u8> = ids.iter().copied().collect();
            prop_assert_eq!(set.len(), distinct.len());
        }

        #[test]
        fn reconcile_and_merge_interleave_without_duplicates(
            fetched in proptest::collection::vec(0u8..8, 0..16),
            live in proptest::collection::vec(0u8..8, 0..16),
        ) {
            let mut set = ReportSet::new();
            for id in &live {
                set.merge(report(&id.to_string()));
            }
            set.reconcile(fetched.iter().map(|id| report(&id.to_string())).collect());
            for id in &live {
                set.merge(report(&id.to_string()));
            }
            let unique: HashSet<&ReportId> = set.iter().map(|r| &r.id).collect();
            prop_assert_eq!(unique.len(), set.len());
        }
    }
}
