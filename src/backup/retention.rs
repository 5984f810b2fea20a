//! Retention policy
//!
//! Assigns backups to daily, weekly, monthly and yearly tiers and works out
//! which ones can be pruned. Planning is a pure function of the policy and the
//! records so it can be previewed with `prune --dry-run` and tested without a
//! filesystem.
//!
//! The tiers cascade. Each calendar day (UTC) is represented by its newest
//! backup; the newest `daily` days form the daily tier. From the days that are
//! left, the oldest backup of each ISO week is a weekly candidate and the
//! newest `weekly` weeks are kept. Monthly and yearly tiers repeat this over
//! whatever is still untiered. Anything a retained backup needs to be
//! restored is protected from pruning.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;

use crate::config::RetentionConfig;
use crate::models::{BackupRecord, BackupType, Tier};

/// A record moving into a tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Promotion {
    pub name: String,
    pub from: Option<Tier>,
    pub to: Tier,
}

/// Outcome of evaluating the policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionPlan {
    /// Tier of every retained record
    pub tiers: BTreeMap<String, Tier>,
    /// Records whose tier changes
    pub promotions: Vec<Promotion>,
    /// Untiered records kept because a retained record depends on them
    pub protected: Vec<String>,
    /// Records to delete, in store order
    pub prune: Vec<String>,
}

impl RetentionPlan {
    /// Tier assigned to a record, if it is retained by the policy
    pub fn tier_of(&self, name: &str) -> Option<Tier> {
        self.tiers.get(name).copied()
    }

    /// Number of records in a tier
    pub fn count_in(&self, tier: Tier) -> usize {
        self.tiers.values().filter(|t| **t == tier).count()
    }

    /// Whether applying the plan would change nothing
    pub fn is_noop(&self) -> bool {
        self.promotions.is_empty() && self.prune.is_empty()
    }
}

type Period = (i32, u32);

/// Evaluate the retention policy over a set of records
pub fn plan_retention(policy: &RetentionConfig, records: &[BackupRecord]) -> RetentionPlan {
    if records.is_empty() {
        return RetentionPlan::default();
    }

    // Newest backup of each day; ties prefer a full backup
    let mut by_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for index in 0..records.len() {
        by_day
            .entry(records[index].created.date_naive())
            .and_modify(|best| {
                if representative_key(records, index) > representative_key(records, *best) {
                    *best = index;
                }
            })
            .or_insert(index);
    }

    let mut candidates: Vec<usize> = by_day.into_values().collect();
    candidates.sort_by_key(|&i| Reverse((records[i].created, i)));

    let mut tiers: HashMap<usize, Tier> = HashMap::new();
    for &index in candidates.iter().take(policy.daily) {
        tiers.insert(index, Tier::Daily);
    }

    cascade(records, &candidates, &mut tiers, policy.weekly, Tier::Weekly, |created| {
        let week = created.iso_week();
        (week.year(), week.week())
    });
    cascade(records, &candidates, &mut tiers, policy.monthly, Tier::Monthly, |created| {
        (created.year(), created.month())
    });
    cascade(records, &candidates, &mut tiers, policy.yearly, Tier::Yearly, |created| {
        (created.year(), 0)
    });

    let protected = protected_ancestors(records, &tiers);

    let mut plan = RetentionPlan::default();
    for (index, record) in records.iter().enumerate() {
        match tiers.get(&index) {
            Some(&tier) => {
                plan.tiers.insert(record.name.clone(), tier);
                if record.tier != Some(tier) {
                    plan.promotions.push(Promotion {
                        name: record.name.clone(),
                        from: record.tier,
                        to: tier,
                    });
                }
            }
            None if protected.contains(&index) => plan.protected.push(record.name.clone()),
            None => plan.prune.push(record.name.clone()),
        }
    }
    plan
}

fn representative_key(records: &[BackupRecord], index: usize) -> (DateTime<Utc>, bool, usize) {
    let record = &records[index];
    (record.created, record.backup_type == BackupType::Full, index)
}

fn oldest_key(records: &[BackupRecord], index: usize) -> (DateTime<Utc>, bool, Reverse<usize>) {
    let record = &records[index];
    (
        record.created,
        record.backup_type != BackupType::Full,
        Reverse(index),
    )
}

/// Keep the oldest untiered candidate of each of the newest `keep` periods
fn cascade<F>(
    records: &[BackupRecord],
    candidates: &[usize],
    tiers: &mut HashMap<usize, Tier>,
    keep: usize,
    tier: Tier,
    period: F,
) where
    F: Fn(&DateTime<Utc>) -> Period,
{
    if keep == 0 {
        return;
    }

    let mut oldest: BTreeMap<Period, usize> = BTreeMap::new();
    for &index in candidates {
        if tiers.contains_key(&index) {
            continue;
        }
        oldest
            .entry(period(&records[index].created))
            .and_modify(|best| {
                if oldest_key(records, index) < oldest_key(records, *best) {
                    *best = index;
                }
            })
            .or_insert(index);
    }

    for &index in oldest.values().rev().take(keep) {
        tiers.insert(index, tier);
    }
}

/// Untiered records that must survive: ancestors of retained records and the
/// most recent record
fn protected_ancestors(records: &[BackupRecord], tiers: &HashMap<usize, Tier>) -> HashSet<usize> {
    let index_of: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.as_str(), i))
        .collect();

    let mut keep: Vec<usize> = tiers.keys().copied().collect();
    if let Some(latest) = (0..records.len()).max_by_key(|&i| (records[i].created, i)) {
        keep.push(latest);
    }

    let mut protected = HashSet::new();
    for start in keep {
        if !tiers.contains_key(&start) {
            protected.insert(start);
        }
        let mut visited = HashSet::from([start]);
        let mut parent = records[start].parent.as_deref();
        while let Some(&index) = parent.and_then(|p| index_of.get(p)) {
            if !visited.insert(index) {
                break;
            }
            if !tiers.contains_key(&index) {
                protected.insert(index);
            }
            parent = records[index].parent.as_deref();
        }
    }
    protected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{ChecksumAlgorithm, Compression};
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;

    fn record_at(name: &str, created: DateTime<Utc>, parent: Option<&str>) -> BackupRecord {
        BackupRecord {
            name: name.into(),
            backup_type: if parent.is_some() {
                BackupType::Incremental
            } else {
                BackupType::Full
            },
            parent: parent.map(String::from),
            created,
            path: PathBuf::from("/r/backups").join(name),
            compression: Compression::Gzip,
            checksum: ChecksumAlgorithm::Sha256,
            size_bytes: 0,
            file_count: 0,
            tier: None,
            description: None,
        }
    }

    fn policy(daily: usize, weekly: usize, monthly: usize, yearly: usize) -> RetentionConfig {
        RetentionConfig {
            daily,
            weekly,
            monthly,
            yearly,
        }
    }

    /// One full backup per day at noon, starting Monday 2024-01-01
    fn daily_fulls(days: i64) -> Vec<BackupRecord> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        (0..days)
            .map(|d| record_at(&format!("day{:02}", d + 1), start + Duration::days(d), None))
            .collect()
    }

    #[test]
    fn test_ten_daily_backups_with_three_daily_two_weekly() {
        let records = daily_fulls(10);
        let plan = plan_retention(&policy(3, 2, 0, 0), &records);

        assert_eq!(plan.count_in(Tier::Daily), 3);
        assert!(plan.count_in(Tier::Weekly) <= 2);
        assert_eq!(
            plan.prune.len(),
            10 - 3 - plan.count_in(Tier::Weekly)
        );

        // Days 8-10 are daily; days 1-7 share ISO week 1 whose oldest is day 1
        assert_eq!(plan.tier_of("day10"), Some(Tier::Daily));
        assert_eq!(plan.tier_of("day08"), Some(Tier::Daily));
        assert_eq!(plan.tier_of("day01"), Some(Tier::Weekly));
        assert_eq!(plan.prune.len(), 6);
        assert!(plan.protected.is_empty());
    }

    #[test]
    fn test_configured_counts_drive_the_plan() {
        let mut config = EngineConfig::default();
        config.set("retention.daily", "4").unwrap();
        config.set("retention.weekly", "0").unwrap();
        config.set("retention.monthly", "0").unwrap();
        config.set("retention.yearly", "0").unwrap();

        let plan = plan_retention(&config.retention, &daily_fulls(6));
        assert_eq!(plan.count_in(Tier::Daily), 4);
        assert_eq!(plan.prune, vec!["day01", "day02"]);
    }

    #[test]
    fn test_daily_tier_uses_newest_backup_of_each_day() {
        let noon = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let records = vec![
            record_at("morning", noon - Duration::hours(3), None),
            record_at("evening", noon + Duration::hours(6), None),
        ];
        let plan = plan_retention(&policy(1, 0, 0, 0), &records);

        assert_eq!(plan.tier_of("evening"), Some(Tier::Daily));
        assert_eq!(plan.prune, vec!["morning"]);
    }

    #[test]
    fn test_same_timestamp_prefers_full() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let records = vec![
            record_at("base", at - Duration::days(1), None),
            record_at("inc", at, Some("base")),
            record_at("full", at, None),
        ];
        let plan = plan_retention(&policy(1, 0, 0, 0), &records);
        assert_eq!(plan.tier_of("full"), Some(Tier::Daily));
        assert!(plan.tier_of("inc").is_none());
    }

    #[test]
    fn test_ancestors_of_retained_records_are_protected() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let records = vec![
            record_at("base", start, None),
            record_at("inc1", start + Duration::days(1), Some("base")),
            record_at("inc2", start + Duration::days(2), Some("inc1")),
        ];
        let plan = plan_retention(&policy(1, 0, 0, 0), &records);

        assert_eq!(plan.tier_of("inc2"), Some(Tier::Daily));
        assert_eq!(plan.protected, vec!["base", "inc1"]);
        assert!(plan.prune.is_empty());
    }

    #[test]
    fn test_most_recent_backup_survives_empty_policy() {
        let records = daily_fulls(3);
        let plan = plan_retention(&policy(0, 0, 0, 0), &records);

        assert!(plan.tiers.is_empty());
        assert_eq!(plan.protected, vec!["day03"]);
        assert_eq!(plan.prune, vec!["day01", "day02"]);
    }

    #[test]
    fn test_monthly_and_yearly_cascade() {
        let records = vec![
            record_at("y2022", Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap(), None),
            record_at("jan", Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(), None),
            record_at("feb", Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap(), None),
            record_at("mar", Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap(), None),
        ];
        let plan = plan_retention(&policy(1, 0, 1, 1), &records);

        assert_eq!(plan.tier_of("mar"), Some(Tier::Daily));
        assert_eq!(plan.tier_of("feb"), Some(Tier::Monthly));
        assert_eq!(plan.tier_of("jan"), Some(Tier::Yearly));
        assert_eq!(plan.prune, vec!["y2022"]);
    }

    #[test]
    fn test_existing_tier_is_not_a_promotion() {
        let mut records = daily_fulls(2);
        records[1].tier = Some(Tier::Daily);
        let plan = plan_retention(&policy(2, 0, 0, 0), &records);

        assert_eq!(plan.promotions.len(), 1);
        assert_eq!(plan.promotions[0].name, "day01");
        assert_eq!(plan.promotions[0].to, Tier::Daily);
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let records = vec![
            record_at("a", start, Some("b")),
            record_at("b", start + Duration::days(1), Some("a")),
        ];
        let plan = plan_retention(&policy(1, 0, 0, 0), &records);
        assert_eq!(plan.protected, vec!["a"]);
    }

    #[test]
    fn test_empty_records() {
        let plan = plan_retention(&policy(7, 4, 12, 2), &[]);
        assert!(plan.is_noop());
    }
}
