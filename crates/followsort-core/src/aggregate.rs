use std::{collections::HashMap, fmt::Write as _};

use serde::Serialize;

use crate::domain::{Category, ClassificationResult};

/// Results partitioned by category, largest bucket first.
pub type CategoryGroups = Vec<(Category, Vec<ClassificationResult>)>;

/// Partition results by category.
///
/// Buckets are ordered by descending size; ties keep first-seen order.
pub fn group_by_category(results: &[ClassificationResult]) -> CategoryGroups {
    let mut slots: HashMap<Category, usize> = HashMap::new();
    let mut groups: CategoryGroups = Vec::new();

    for r in results {
        let slot = *slots.entry(r.category).or_insert_with(|| {
            groups.push((r.category, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(r.clone());
    }

    // Stable sort keeps first-seen order among equal sizes.
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    for (category, members) in &groups {
        tracing::debug!(category = %category, members = members.len(), "category bucket");
    }
    groups
}

/// Drop the unknown bucket and buckets smaller than `min_members`.
pub fn filter_groups(groups: CategoryGroups, min_members: usize) -> CategoryGroups {
    groups
        .into_iter()
        .filter(|(category, members)| {
            let keep = !category.is_unknown() && members.len() >= min_members;
            if !keep {
                tracing::info!(category = %category, members = members.len(), "skipping category");
            }
            keep
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryStat {
    pub category: Category,
    pub count: usize,
    pub mean_confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassificationStatistics {
    pub total: usize,
    /// Same order as `group_by_category`.
    pub categories: Vec<CategoryStat>,
    pub unknown_count: usize,
    /// Percentage of entities with a known category; 0 when there are none.
    pub success_rate: f64,
}

pub fn statistics(results: &[ClassificationResult]) -> ClassificationStatistics {
    let total = results.len();
    let unknown_count = results.iter().filter(|r| r.category.is_unknown()).count();

    let categories = group_by_category(results)
        .into_iter()
        .map(|(category, members)| {
            let sum: f64 = members.iter().map(|m| m.confidence).sum();
            CategoryStat {
                category,
                count: members.len(),
                mean_confidence: sum / members.len() as f64,
            }
        })
        .collect();

    let success_rate = if total == 0 {
        0.0
    } else {
        (total - unknown_count) as f64 / total as f64 * 100.0
    };

    ClassificationStatistics {
        total,
        categories,
        unknown_count,
        success_rate,
    }
}

const SAMPLE_MEMBERS: usize = 3;

/// Plain-text summary of a classification, a few sample members per bucket.
pub fn render_summary(groups: &CategoryGroups) -> String {
    let mut out = String::new();
    for (category, members) in groups {
        let _ = writeln!(out, "{category}: {} members", members.len());
        for m in members.iter().take(SAMPLE_MEMBERS) {
            let _ = writeln!(out, "  - {} (confidence {:.2})", m.name, m.confidence);
        }
        if members.len() > SAMPLE_MEMBERS {
            let _ = writeln!(out, "  ... and {} more", members.len() - SAMPLE_MEMBERS);
        }
    }
    out
}
