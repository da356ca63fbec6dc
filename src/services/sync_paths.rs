/// Shard router: maps categories and ISO weeks to remote paths
///
/// Directory structure:
/// ```text
/// <root>/
/// ├── sync-manifest.json
/// ├── todo/all.json
/// ├── habits/all.json
/// ├── projects/all.json
/// ├── reviews/
/// │   ├── templates.json
/// │   └── <YYYY-Www>.json
/// ├── accounting/<YYYY-Www>.json
/// └── data_<YYYY-Www>.json        # legacy whole-database weekly files
/// ```
///
/// Paths are the join key between devices, so everything here must be
/// deterministic and independent of the local time zone.
use crate::models::{Category, Record};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Weekday};

/// Manifest file name under the root
pub const MANIFEST_FILE: &str = "sync-manifest.json";

/// Prefix of legacy weekly files
pub const LEGACY_PREFIX: &str = "data_";

/// Build manifest path for a root
pub fn manifest_path(root: &str) -> String {
    format!("{}/{}", root, MANIFEST_FILE)
}

/// ISO-8601 week label (`YYYY-W##`); the week belongs to the year of its Thursday
pub fn week_label_for_date(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Week label for `YYYY-MM-DD`; longer datetime strings use their date part
pub fn week_label_for_date_str(date: &str) -> Option<String> {
    let day = date.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .ok()
        .map(week_label_for_date)
}

/// Week label for an epoch-ms timestamp, evaluated in UTC
pub fn week_label_for_timestamp(ts_ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(ts_ms).map(|dt| week_label_for_date(dt.date_naive()))
}

/// Splits a week label into ISO year and week number
pub fn parse_week_label(label: &str) -> Option<(i32, u32)> {
    let (year, week) = label.split_once("-W")?;
    if year.len() != 4 || week.len() != 2 {
        return None;
    }
    if !year.chars().all(|c| c.is_ascii_digit()) || !week.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let week: u32 = week.parse().ok()?;
    // Rejects week 53 in years that only have 52
    NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
    Some((year, week))
}

/// Label of the week before `label`
pub fn previous_week_label(label: &str) -> Option<String> {
    let (year, week) = parse_week_label(label)?;
    let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
    Some(week_label_for_date(monday - Duration::days(7)))
}

/// Current and previous week for `now_ms`
pub fn recent_week_labels(now_ms: i64) -> Vec<String> {
    let mut labels = Vec::new();
    if let Some(current) = week_label_for_timestamp(now_ms) {
        if let Some(previous) = previous_week_label(&current) {
            labels.push(previous);
        }
        labels.push(current);
    }
    labels
}

/// Week bucket of a record in a date-scoped table: `date` first, then `createdAt`
pub fn record_week_label(record: &Record) -> Option<String> {
    record
        .get_str("date")
        .and_then(week_label_for_date_str)
        .or_else(|| record.created_at().and_then(week_label_for_timestamp))
}

/// Week of a legacy file name (`data_2024-W10.json` → `2024-W10`)
pub fn legacy_week_from_file_name(name: &str) -> Option<String> {
    let week = name.strip_prefix(LEGACY_PREFIX)?.strip_suffix(".json")?;
    parse_week_label(week).map(|_| week.to_string())
}

fn category_dir(category: Category) -> &'static str {
    match category {
        Category::Templates => "reviews",
        other => other.as_str(),
    }
}

/// A single addressable remote file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShardPath {
    /// All records of a category without a time partition
    Aggregate(Category),
    /// One ISO week of a date-scoped category
    Weekly(Category, String),
}

impl ShardPath {
    pub fn aggregate(category: Category) -> Option<Self> {
        (!category.is_date_scoped()).then_some(ShardPath::Aggregate(category))
    }

    pub fn weekly(category: Category, week: &str) -> Option<Self> {
        if !category.is_date_scoped() {
            return None;
        }
        parse_week_label(week)?;
        Some(ShardPath::Weekly(category, week.to_string()))
    }

    pub fn category(&self) -> Category {
        match self {
            ShardPath::Aggregate(category) | ShardPath::Weekly(category, _) => *category,
        }
    }

    pub fn week(&self) -> Option<&str> {
        match self {
            ShardPath::Aggregate(_) => None,
            ShardPath::Weekly(_, week) => Some(week),
        }
    }

    /// Remote path relative to the WebDAV base URL
    pub fn to_remote_path(&self, root: &str) -> String {
        match self {
            ShardPath::Aggregate(Category::Templates) => format!("{}/reviews/templates.json", root),
            ShardPath::Aggregate(category) => {
                format!("{}/{}/all.json", root, category_dir(*category))
            }
            ShardPath::Weekly(category, week) => {
                format!("{}/{}/{}.json", root, category_dir(*category), week)
            }
        }
    }

    /// Inverse of [`ShardPath::to_remote_path`]; unknown paths yield `None`
    pub fn parse(root: &str, path: &str) -> Option<Self> {
        let relative = path.strip_prefix(root)?.strip_prefix('/')?;
        let (dir, file) = relative.split_once('/')?;
        let stem = file.strip_suffix(".json")?;

        match (dir, stem) {
            ("reviews", "templates") => Some(ShardPath::Aggregate(Category::Templates)),
            (dir, "all") if dir != "templates" => ShardPath::aggregate(Category::from_str(dir)?),
            ("accounting", week) => ShardPath::weekly(Category::Accounting, week),
            ("reviews", week) => ShardPath::weekly(Category::Reviews, week),
            _ => None,
        }
    }

    /// Parent collection of the shard file
    pub fn remote_dir(&self, root: &str) -> String {
        format!("{}/{}", root, category_dir(self.category()))
    }
}

/// Shards that are part of every bounded sync: all aggregate shards plus
/// the current and previous week of each date-scoped category
pub fn critical_shards(now_ms: i64) -> Vec<ShardPath> {
    let weeks = recent_week_labels(now_ms);
    let mut shards = Vec::new();
    for category in Category::all() {
        if category.is_date_scoped() {
            shards.extend(
                weeks
                    .iter()
                    .filter_map(|week| ShardPath::weekly(*category, week)),
            );
        } else if let Some(shard) = ShardPath::aggregate(*category) {
            shards.push(shard);
        }
    }
    shards
}

/// Get current epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ROOT: &str = "life-habits-data";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_week_label_iso_rules() {
        assert_eq!(week_label_for_date(date(2025, 12, 25)), "2025-W52");
        // Jan 1st 2021 is a Friday: still the last week of 2020
        assert_eq!(week_label_for_date(date(2021, 1, 1)), "2020-W53");
        // Dec 30th 2024 is a Monday: first week of 2025
        assert_eq!(week_label_for_date(date(2024, 12, 30)), "2025-W01");
        assert_eq!(week_label_for_date(date(2024, 3, 5)), "2024-W10");
    }

    #[test]
    fn test_week_label_from_strings_and_timestamps() {
        assert_eq!(
            week_label_for_date_str("2025-12-25"),
            Some("2025-W52".to_string())
        );
        assert_eq!(
            week_label_for_date_str("2025-12-25T23:59:00Z"),
            Some("2025-W52".to_string())
        );
        assert_eq!(week_label_for_date_str("25.12.2025"), None);
        assert_eq!(week_label_for_date_str(""), None);

        // 2025-12-25T12:00:00Z
        assert_eq!(
            week_label_for_timestamp(1_766_664_000_000),
            Some("2025-W52".to_string())
        );
    }

    #[test]
    fn test_previous_week_crosses_years() {
        assert_eq!(previous_week_label("2025-W01"), Some("2024-W52".to_string()));
        assert_eq!(previous_week_label("2021-W01"), Some("2020-W53".to_string()));
        assert_eq!(previous_week_label("2025-W52"), Some("2025-W51".to_string()));
        assert_eq!(previous_week_label("garbage"), None);
    }

    #[test]
    fn test_parse_week_label_validation() {
        assert_eq!(parse_week_label("2020-W53"), Some((2020, 53)));
        assert_eq!(parse_week_label("2021-W53"), None);
        assert_eq!(parse_week_label("2021-W5"), None);
        assert_eq!(parse_week_label("21-W05"), None);
    }

    #[test]
    fn test_shard_paths() {
        assert_eq!(
            ShardPath::Aggregate(Category::Todo).to_remote_path(ROOT),
            "life-habits-data/todo/all.json"
        );
        assert_eq!(
            ShardPath::Aggregate(Category::Templates).to_remote_path(ROOT),
            "life-habits-data/reviews/templates.json"
        );
        assert_eq!(
            ShardPath::weekly(Category::Accounting, "2025-W52")
                .unwrap()
                .to_remote_path(ROOT),
            "life-habits-data/accounting/2025-W52.json"
        );
        assert!(ShardPath::weekly(Category::Todo, "2025-W52").is_none());
        assert!(ShardPath::aggregate(Category::Reviews).is_none());
        assert_eq!(manifest_path(ROOT), "life-habits-data/sync-manifest.json");
    }

    #[test]
    fn test_parse_is_inverse_of_to_remote_path() {
        let mut shards: Vec<ShardPath> = Category::all()
            .iter()
            .filter_map(|c| ShardPath::aggregate(*c))
            .collect();
        shards.push(ShardPath::weekly(Category::Reviews, "2024-W10").unwrap());
        shards.push(ShardPath::weekly(Category::Accounting, "2020-W53").unwrap());

        for shard in shards {
            let path = shard.to_remote_path(ROOT);
            assert_eq!(ShardPath::parse(ROOT, &path), Some(shard));
        }

        assert_eq!(ShardPath::parse(ROOT, "life-habits-data/sync-manifest.json"), None);
        assert_eq!(ShardPath::parse(ROOT, "other/todo/all.json"), None);
        assert_eq!(ShardPath::parse(ROOT, "life-habits-data/accounting/all.json"), None);
    }

    #[test]
    fn test_record_bucketing() {
        let by_date = Record::from_value(json!({"id": "l1", "date": "2025-12-25"})).unwrap();
        assert_eq!(record_week_label(&by_date), Some("2025-W52".to_string()));

        let by_created = Record::from_value(json!({"id": "r1", "createdAt": 1_766_664_000_000i64}))
            .unwrap();
        assert_eq!(record_week_label(&by_created), Some("2025-W52".to_string()));

        let both = Record::from_value(
            json!({"id": "l2", "date": "2024-03-05", "createdAt": 1_766_664_000_000i64}),
        )
        .unwrap();
        assert_eq!(record_week_label(&both), Some("2024-W10".to_string()));

        let undated = Record::from_value(json!({"id": "r2"})).unwrap();
        assert_eq!(record_week_label(&undated), None);
    }

    #[test]
    fn test_legacy_file_names() {
        assert_eq!(
            legacy_week_from_file_name("data_2024-W10.json"),
            Some("2024-W10".to_string())
        );
        assert_eq!(legacy_week_from_file_name("data_2024-W10.json.bak"), None);
        assert_eq!(legacy_week_from_file_name("sync-manifest.json"), None);
    }

    #[test]
    fn test_critical_shards_cover_two_weeks() {
        // 2025-12-25T12:00:00Z
        let shards = critical_shards(1_766_664_000_000);
        let paths: Vec<String> = shards.iter().map(|s| s.to_remote_path(ROOT)).collect();

        assert_eq!(shards.len(), 4 + 2 * 2);
        assert!(paths.contains(&"life-habits-data/accounting/2025-W52.json".to_string()));
        assert!(paths.contains(&"life-habits-data/accounting/2025-W51.json".to_string()));
        assert!(paths.contains(&"life-habits-data/reviews/2025-W51.json".to_string()));
        assert!(!paths.contains(&"life-habits-data/reviews/2025-W50.json".to_string()));
    }
}
