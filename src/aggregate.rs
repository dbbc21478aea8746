//! Aggregator: groups filtered, canonicalized records into clusters
//! and orders them for the report renderer.

use indexmap::IndexMap;
use itertools::Itertools;

use crate::canonical::{canonicalize, duration_key, prettify};
use crate::config::{ReportType, SortBy};

/// One occurrence of a cluster: where and when it was seen, plus the
/// report-type-specific measurement extracted by the filter pipeline.
#[derive(Clone, Debug)]
pub struct Occurrence {
    pub pgtime: String,
    pub source_file: String,
    pub source_line_number: Option<u64>,
    pub duration_ms: Option<f64>,
    pub filesize: Option<u64>,
}

/// A group of occurrences sharing one canonical statement shape.
#[derive(Clone, Debug)]
pub struct Cluster {
    pub raw_string: String,
    pub occurrences: Vec<Occurrence>,
}

impl Cluster {
    pub fn count(&self) -> usize {
        self.occurrences.len()
    }

    pub fn first_time(&self) -> &str {
        self.occurrences.first().map(|o| o.pgtime.as_str()).unwrap_or("")
    }

    pub fn last_time(&self) -> &str {
        self.occurrences.last().map(|o| o.pgtime.as_str()).unwrap_or("")
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.occurrences.iter().filter_map(|o| o.duration_ms).sum()
    }

    pub fn max_duration_ms(&self) -> f64 {
        self.occurrences
            .iter()
            .filter_map(|o| o.duration_ms)
            .fold(0.0, f64::max)
    }

    pub fn total_filesize(&self) -> u64 {
        self.occurrences.iter().filter_map(|o| o.filesize).sum()
    }

    pub fn max_filesize(&self) -> u64 {
        self.occurrences.iter().filter_map(|o| o.filesize).max().unwrap_or(0)
    }

    pub fn min_filesize(&self) -> u64 {
        self.occurrences.iter().filter_map(|o| o.filesize).min().unwrap_or(0)
    }

    /// `total / count`, computed at render time rather than tracked
    /// incrementally.
    pub fn mean_filesize(&self) -> f64 {
        self.total_filesize() as f64 / self.count() as f64
    }
}

/// Accumulates closed, filtered records into clusters, one instance per
/// report-type run.
pub struct Aggregator {
    report_type: ReportType,
    clusters: IndexMap<String, Cluster>,
}

impl Aggregator {
    pub fn new(report_type: ReportType) -> Self {
        Aggregator { report_type, clusters: IndexMap::new() }
    }

    /// Fold one filtered record's body into its cluster, creating the
    /// cluster on first sight. `body` has already passed the filter
    /// pipeline and, for tempfile mode, had its `STATEMENT:` head stripped.
    pub fn add(
        &mut self,
        pgtime: &str,
        source_file: &str,
        source_line_number: Option<u64>,
        body: &str,
        duration_ms: Option<f64>,
        filesize: Option<u64>,
    ) {
        let duration_mode = self.report_type == ReportType::Duration;
        let key = if duration_mode { duration_key(body) } else { canonicalize(body) };
        let cluster = self.clusters.entry(key).or_insert_with(|| Cluster {
            raw_string: prettify(body, duration_mode),
            occurrences: Vec::new(),
        });
        cluster.occurrences.push(Occurrence {
            pgtime: pgtime.to_string(),
            source_file: source_file.to_string(),
            source_line_number,
            duration_ms,
            filesize,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn occurrence_count(&self) -> usize {
        self.clusters.values().map(Cluster::count).sum()
    }

    /// Consume the aggregator, returning clusters ordered for rendering.
    /// Duration and Tempfile reports always sort by their own measurement,
    /// regardless of `sort_by`; only Normal honors `SORTBY`. `Date` preserves
    /// first-seen (encounter) order; `Count` sorts by occurrence count
    /// descending. All sorts are stable, so ties fall back to encounter
    /// order, i.e. file order then line.
    pub fn into_sorted(self, sort_by: SortBy) -> Vec<Cluster> {
        let report_type = self.report_type;
        let clusters = self.clusters.into_iter().map(|(_, c)| c);
        match report_type {
            ReportType::Duration => clusters
                .sorted_by(|a, b| {
                    b.max_duration_ms()
                        .partial_cmp(&a.max_duration_ms())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .collect(),
            ReportType::Tempfile => clusters
                .sorted_by(|a, b| {
                    b.max_filesize()
                        .cmp(&a.max_filesize())
                        .then_with(|| {
                            b.mean_filesize()
                                .partial_cmp(&a.mean_filesize())
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .then_with(|| b.count().cmp(&a.count()))
                })
                .collect(),
            ReportType::Normal => match sort_by {
                SortBy::Count => clusters.sorted_by_key(|c| std::cmp::Reverse(c.count())).collect(),
                SortBy::Date => clusters.collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_literal_values_collapse_into_one_cluster() {
        let mut agg = Aggregator::new(ReportType::Normal);
        agg.add("t1", "f", None, "SELECT * FROM t WHERE id = 1", None, None);
        agg.add("t2", "f", None, "SELECT * FROM t WHERE id = 2", None, None);
        assert_eq!(agg.cluster_count(), 1);
        assert_eq!(agg.occurrence_count(), 2);
    }

    #[test]
    fn sort_by_count_orders_descending() {
        let mut agg = Aggregator::new(ReportType::Normal);
        agg.add("t1", "f", None, "SELECT a", None, None);
        agg.add("t2", "f", None, "SELECT b", None, None);
        agg.add("t3", "f", None, "SELECT b", None, None);
        let clusters = agg.into_sorted(SortBy::Count);
        assert_eq!(clusters[0].count(), 2);
        assert_eq!(clusters[1].count(), 1);
    }

    #[test]
    fn sort_by_date_preserves_encounter_order() {
        let mut agg = Aggregator::new(ReportType::Normal);
        agg.add("t1", "f", None, "SELECT a", None, None);
        agg.add("t2", "f", None, "SELECT b", None, None);
        let clusters = agg.into_sorted(SortBy::Date);
        assert!(clusters[0].raw_string.contains('a'));
        assert!(clusters[1].raw_string.contains('b'));
    }

    #[test]
    fn duration_cluster_tracks_total_and_max() {
        let mut agg = Aggregator::new(ReportType::Duration);
        agg.add("t1", "f", None, "duration: 10 ms statement: select 1", Some(10.0), None);
        agg.add("t2", "f", None, "duration: 20 ms statement: select 1", Some(20.0), None);
        let clusters = agg.into_sorted(SortBy::Date);
        assert_eq!(clusters[0].total_duration_ms(), 30.0);
        assert_eq!(clusters[0].max_duration_ms(), 20.0);
    }

    #[test]
    fn duration_mode_does_not_collapse_different_statements() {
        let mut agg = Aggregator::new(ReportType::Duration);
        agg.add("t1", "f", None, "duration: 10 ms statement: select 1", Some(10.0), None);
        agg.add("t2", "f", None, "duration: 20 ms statement: select 2", Some(20.0), None);
        assert_eq!(agg.cluster_count(), 2);
    }

    #[test]
    fn duration_mode_sorts_by_duration_regardless_of_sortby() {
        let mut agg = Aggregator::new(ReportType::Duration);
        agg.add("t1", "f", None, "duration: 10 ms statement: select a", Some(10.0), None);
        agg.add("t2", "f", None, "duration: 90 ms statement: select b", Some(90.0), None);
        let clusters = agg.into_sorted(SortBy::Date);
        assert!(clusters[0].raw_string.contains('b'));
        assert!(clusters[1].raw_string.contains('a'));
    }

    #[test]
    fn tempfile_cluster_tracks_smallest_and_mean() {
        let mut agg = Aggregator::new(ReportType::Tempfile);
        agg.add("t1", "f", None, "statement: select 1", None, Some(1000));
        agg.add("t2", "f", None, "statement: select 1", None, Some(3000));
        agg.add("t3", "f", None, "statement: select 1", None, Some(2000));
        let clusters = agg.into_sorted(SortBy::Date);
        assert_eq!(clusters[0].min_filesize(), 1000);
        assert_eq!(clusters[0].max_filesize(), 3000);
        assert_eq!(clusters[0].total_filesize(), 6000);
        assert_eq!(clusters[0].count(), 3);
        assert_eq!(clusters[0].mean_filesize(), 2000.0);
    }

    #[test]
    fn tempfile_mode_sorts_by_largest_then_mean_then_count() {
        let mut agg = Aggregator::new(ReportType::Tempfile);
        agg.add("t1", "f", None, "statement: select small", None, Some(100));
        agg.add("t2", "f", None, "statement: select big", None, Some(9000));
        let clusters = agg.into_sorted(SortBy::Date);
        assert!(clusters[0].raw_string.contains("big"));
        assert!(clusters[1].raw_string.contains("small"));
    }
}
