//! Time-bucketed tallies for the histogram view.
//!
//! Accumulation happens at daily granularity, the finest the resolution
//! policy can pick, keyed by local-midnight timestamps. Because
//! [`Tally::combine`] is associative, partial series from different workers
//! merge freely, and the final projection ("rebucketing") derives the real
//! resolution from the combined first/last times and folds the daily cells
//! into the final array. The output is dense: quiet months still get a
//! bucket so the plot has an unbroken axis.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Utc};

use crate::git::Commit;
use crate::tally::{FinalTally, Tally, TallyMode, TallyOpts};

/// Bucket size for the series, derived from its time span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Daily,
    Monthly,
    Yearly,
}

impl Resolution {
    /// Truncate a commit time to its bucket's start, in local time.
    pub fn truncate(&self, t: DateTime<Utc>) -> DateTime<Local> {
        let date = t.with_timezone(&Local).date_naive();
        let start = match self {
            Resolution::Daily => date,
            Resolution::Monthly => first_of_month(date.year(), date.month()),
            Resolution::Yearly => first_of_month(date.year(), 1),
        };
        local_midnight(start)
    }

    /// Start of the bucket after the one containing `t`.
    pub fn next(&self, t: DateTime<Local>) -> DateTime<Local> {
        let date = t.date_naive();
        let next = match self {
            Resolution::Daily => date.succ_opt().expect("date in range"),
            Resolution::Monthly => {
                if date.month() == 12 {
                    first_of_month(date.year() + 1, 1)
                } else {
                    first_of_month(date.year(), date.month() + 1)
                }
            }
            Resolution::Yearly => first_of_month(date.year() + 1, 1),
        };
        local_midnight(next)
    }

    pub fn label(&self, t: DateTime<Local>) -> String {
        match self {
            Resolution::Daily => t.format("%Y-%m-%d").to_string(),
            Resolution::Monthly => t.format("%b %Y").to_string(),
            Resolution::Yearly => t.format("%Y").to_string(),
        }
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start")
}

fn local_midnight(date: NaiveDate) -> DateTime<Local> {
    let naive = date.and_hms_opt(0, 0, 0).expect("valid midnight");
    // On DST transitions midnight can be ambiguous or missing.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&naive))
}

/// Pick the bucket size for the span `[start, end]`.
pub fn calc_resolution(start: DateTime<Utc>, end: DateTime<Utc>) -> Resolution {
    let span = end - start;
    let year = Duration::days(365);

    if span > year * 5 {
        Resolution::Yearly
    } else if span > Duration::days(60) {
        Resolution::Monthly
    } else {
        Resolution::Daily
    }
}

/// Combinable partial for the timeline operation.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    /// Per-author tallies keyed by local-midnight unix timestamp.
    days: BTreeMap<i64, HashMap<String, Tally>>,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

impl TimeSeries {
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn tally_commit(&mut self, commit: &Commit, opts: &TallyOpts) {
        if commit.is_merge && !opts.count_merges {
            return;
        }

        self.first = Some(match self.first {
            Some(prev) => prev.min(commit.date),
            None => commit.date,
        });
        self.last = Some(match self.last {
            Some(prev) => prev.max(commit.date),
            None => commit.date,
        });

        let day = Resolution::Daily.truncate(commit.date).timestamp();
        let tally = self
            .days
            .entry(day)
            .or_default()
            .entry(opts.key(commit).to_string())
            .or_insert_with(|| Tally::new(&commit.author_name, &commit.author_email));

        tally.mark_commit(commit);
        tally.num_tallied += 1;

        for diff in &commit.file_diffs {
            tally.added += diff.lines_added;
            tally.removed += diff.lines_removed;
            tally.file_set.insert(diff.path.clone());
        }
    }

    /// Merge another partial in. Associative and commutative.
    pub fn combine(mut self, other: TimeSeries) -> TimeSeries {
        for (day, tallies) in other.days {
            let cell = self.days.entry(day).or_default();
            for (key, tally) in tallies {
                match cell.remove(&key) {
                    Some(existing) => {
                        cell.insert(key, existing.combine(tally));
                    }
                    None => {
                        cell.insert(key, tally);
                    }
                }
            }
        }

        self.first = match (self.first, other.first) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last = match (self.last, other.last) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        self
    }
}

/// Drain a commit stream into a timeline partial.
pub fn tally_commits_timeline<I>(commits: I, opts: &TallyOpts) -> Result<TimeSeries>
where
    I: Iterator<Item = Result<Commit>>,
{
    let mut series = TimeSeries::default();
    for commit in commits {
        let commit = commit.context("error while tallying commits by date")?;
        series.tally_commit(&commit, opts);
    }
    Ok(series)
}

/// One interval of the histogram.
#[derive(Debug, Clone)]
pub struct TimeBucket {
    pub label: String,
    pub time: DateTime<Local>,
    pub tallies: HashMap<String, Tally>,
    pub final_tally: Option<FinalTally>,
}

impl TimeBucket {
    fn new(label: String, time: DateTime<Local>) -> Self {
        TimeBucket {
            label,
            time,
            tallies: HashMap::new(),
            final_tally: None,
        }
    }

    /// Pick the winning tally under `mode`.
    pub fn rank(&mut self, mode: TallyMode) {
        self.final_tally = self
            .tallies
            .values()
            .cloned()
            .map(Tally::finalize)
            .max_by(|a, b| {
                a.compare(b, mode)
                    .then_with(|| b.author_name.cmp(&a.author_name))
            });
    }

    /// Magnitude of the winner, for the solid part of the bar.
    pub fn value(&self, mode: TallyMode) -> u64 {
        self.final_tally.as_ref().map_or(0, |t| t.value(mode))
    }

    /// Magnitude of all authors combined, for the faded part of the bar.
    pub fn total(&self, mode: TallyMode) -> u64 {
        self.tallies
            .values()
            .cloned()
            .map(|t| t.finalize().value(mode))
            .sum()
    }
}

/// Rebucket: derive the final resolution from the combined series and
/// project the daily cells into a dense, ranked bucket array.
///
/// `end` is "now" when the revision range runs to the tip and the caller
/// gave no explicit upper bound; otherwise the last commit's date is used.
pub fn into_buckets(
    series: TimeSeries,
    end: Option<DateTime<Utc>>,
    mode: TallyMode,
) -> Vec<TimeBucket> {
    let (Some(first), Some(last)) = (series.first, series.last) else {
        return Vec::new();
    };

    let end = end.unwrap_or(last).max(last).max(first);
    let resolution = calc_resolution(first, end);

    // Dense series, empty buckets included.
    let mut buckets = Vec::new();
    let mut index = BTreeMap::new();
    let mut t = resolution.truncate(first);
    let end_t = resolution.truncate(end);
    while t <= end_t {
        index.insert(t.timestamp(), buckets.len());
        buckets.push(TimeBucket::new(resolution.label(t), t));
        t = resolution.next(t);
    }

    for (day, tallies) in series.days {
        let Some(day_utc) = Utc.timestamp_opt(day, 0).single() else {
            continue;
        };
        let bucket_time = resolution.truncate(day_utc);
        let Some(&i) = index.get(&bucket_time.timestamp()) else {
            continue;
        };

        let cell = &mut buckets[i].tallies;
        for (key, tally) in tallies {
            match cell.remove(&key) {
                Some(existing) => {
                    cell.insert(key, existing.combine(tally));
                }
                None => {
                    cell.insert(key, tally);
                }
            }
        }
    }

    for bucket in &mut buckets {
        bucket.rank(mode);
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::{commit, ok_commits};

    const DAY: i64 = 86_400;

    fn opts() -> TallyOpts {
        TallyOpts {
            mode: TallyMode::Commits,
            ..Default::default()
        }
    }

    #[test]
    fn resolution_thresholds() {
        let start = Utc.timestamp_opt(1_000_000_000, 0).unwrap();

        let sixty_days = start + Duration::days(60);
        assert_eq!(calc_resolution(start, sixty_days), Resolution::Daily);

        let just_over = sixty_days + Duration::seconds(1);
        assert_eq!(calc_resolution(start, just_over), Resolution::Monthly);

        let five_years_one_day = start + Duration::days(5 * 365 + 1);
        assert_eq!(calc_resolution(start, five_years_one_day), Resolution::Yearly);

        let five_years = start + Duration::days(5 * 365);
        assert_eq!(calc_resolution(start, five_years), Resolution::Monthly);
    }

    #[test]
    fn series_is_dense_including_empty_buckets() {
        // Two commits ~90 days apart: monthly resolution with quiet months
        // in between.
        let base = 1_000_000_000 + DAY / 2;
        let commits = vec![
            commit("aaa", "bob", "bob@x", base, &[]),
            commit("bbb", "bob", "bob@x", base + 90 * DAY, &[]),
        ];

        let series = tally_commits_timeline(ok_commits(commits), &opts()).unwrap();
        let buckets = into_buckets(series, None, TallyMode::Commits);

        assert!(buckets.len() >= 3, "expected a dense monthly series");
        assert!(buckets.first().unwrap().value(TallyMode::Commits) > 0);
        assert!(buckets.last().unwrap().value(TallyMode::Commits) > 0);

        let empty = buckets
            .iter()
            .filter(|b| b.tallies.is_empty())
            .count();
        assert!(empty >= 1, "quiet months should still appear");

        for bucket in &buckets {
            assert!(bucket.label.contains(' '), "monthly label: {}", bucket.label);
        }
    }

    #[test]
    fn winner_picked_per_bucket() {
        let base = 1_000_000_000 + DAY / 2;
        let commits = vec![
            commit("aaa", "bob", "bob@x", base, &[("a.txt", 1, 0)]),
            commit("bbb", "jim", "jim@x", base + 600, &[("b.txt", 9, 0)]),
            commit("ccc", "jim", "jim@x", base + 1200, &[("c.txt", 2, 0)]),
        ];

        let series = tally_commits_timeline(ok_commits(commits), &opts()).unwrap();
        let buckets = into_buckets(series, None, TallyMode::Commits);

        assert_eq!(buckets.len(), 1);
        let winner = buckets[0].final_tally.as_ref().unwrap();
        assert_eq!(winner.author_name, "jim");
        assert_eq!(winner.commits, 2);
        assert_eq!(buckets[0].total(TallyMode::Commits), 3);
    }

    #[test]
    fn combined_partials_match_unpartitioned_series() {
        let base = 1_000_000_000 + DAY / 2;
        let commits: Vec<_> = (0..10)
            .map(|i| {
                commit(
                    &format!("c{i}"),
                    "bob",
                    "bob@x",
                    base + i * 20 * DAY,
                    &[("a.txt", 1, 1)],
                )
            })
            .collect();

        let whole =
            tally_commits_timeline(ok_commits(commits.clone()), &opts()).unwrap();

        let mut combined = TimeSeries::default();
        for chunk in commits.chunks(3) {
            let partial =
                tally_commits_timeline(ok_commits(chunk.to_vec()), &opts()).unwrap();
            combined = combined.combine(partial);
        }

        let a = into_buckets(whole, None, TallyMode::Commits);
        let b = into_buckets(combined, None, TallyMode::Commits);

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.label, y.label);
            assert_eq!(x.value(TallyMode::Commits), y.value(TallyMode::Commits));
            assert_eq!(x.total(TallyMode::Lines), y.total(TallyMode::Lines));
        }
    }

    #[test]
    fn merges_skipped_unless_counted() {
        let mut merge = commit("mmm", "bob", "bob@x", 1_000_000_000, &[]);
        merge.is_merge = true;

        let series =
            tally_commits_timeline(ok_commits(vec![merge.clone()]), &opts()).unwrap();
        assert!(series.is_empty());

        let counting = TallyOpts {
            count_merges: true,
            ..opts()
        };
        let series = tally_commits_timeline(ok_commits(vec![merge]), &counting).unwrap();
        assert!(!series.is_empty());
    }
}
