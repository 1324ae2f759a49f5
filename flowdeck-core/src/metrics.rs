/// Board-level counts for summaries: per column, per lane and WIP totals.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::layout::normalize_lane_id;
use crate::types::{Board, UNASSIGNED_LANE_ID};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetric {
    pub column_id: String,
    pub title: String,
    pub active_count: usize,
    pub total_count: usize,
}

impl ColumnMetric {
    /// "3" when nothing is archived, "2/3" (active/total) otherwise.
    pub fn count_display(&self) -> String {
        if self.active_count == self.total_count {
            self.total_count.to_string()
        } else {
            format!("{}/{}", self.active_count, self.total_count)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneMetric {
    pub lane_id: String,
    pub title: String,
    pub active_count: usize,
    pub blocked_count: usize,
    pub overdue_count: usize,
}

impl LaneMetric {
    fn new(lane_id: &str, title: &str) -> Self {
        Self {
            lane_id: lane_id.to_string(),
            title: title.to_string(),
            active_count: 0,
            blocked_count: 0,
            overdue_count: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardMetrics {
    pub total_cards: usize,
    pub active_cards: usize,
    pub archived_cards: usize,
    pub blocked_cards: usize,
    pub overdue_cards: usize,
    /// Active cards without a lane that exists on the board.
    pub unassigned_cards: usize,
    pub wip_limited_columns: usize,
    pub wip_exceeded_columns: usize,
    pub wip_current: usize,
    pub wip_limit: i64,
    pub columns: Vec<ColumnMetric>,
}

fn valid_lane_ids(board: &Board) -> HashSet<&str> {
    board
        .lanes
        .iter()
        .map(|l| l.id.as_str())
        .filter(|id| !id.trim().is_empty())
        .collect()
}

/// Counts over every column. Archived cards count toward totals only.
pub fn board_metrics(board: &Board, now: DateTime<Utc>) -> BoardMetrics {
    let lanes = valid_lane_ids(board);
    let mut metrics = BoardMetrics::default();

    for column in &board.columns {
        let mut active = 0;
        for task in &column.tasks {
            metrics.total_cards += 1;
            if task.is_archived {
                metrics.archived_cards += 1;
                continue;
            }
            active += 1;
            metrics.active_cards += 1;
            if task.is_blocked {
                metrics.blocked_cards += 1;
            }
            if task.is_overdue(now) {
                metrics.overdue_cards += 1;
            }
            if !normalize_lane_id(task.lane_id.as_deref()).is_some_and(|id| lanes.contains(id)) {
                metrics.unassigned_cards += 1;
            }
        }

        metrics.columns.push(ColumnMetric {
            column_id: column.id.clone(),
            title: column.title.clone(),
            active_count: active,
            total_count: column.tasks.len(),
        });

        if let Some(limit) = column.wip_limit.filter(|l| *l > 0) {
            metrics.wip_limited_columns += 1;
            metrics.wip_current += active;
            metrics.wip_limit += i64::from(limit);
            if active > limit as usize {
                metrics.wip_exceeded_columns += 1;
            }
        }
    }
    metrics
}

/// Active cards per lane: the unassigned bucket first (only when it has
/// cards), then board lanes in order.
pub fn lane_metrics(board: &Board, now: DateTime<Utc>) -> Vec<LaneMetric> {
    let lanes = valid_lane_ids(board);
    let mut by_lane: HashMap<&str, LaneMetric> = board
        .lanes
        .iter()
        .filter(|l| !l.id.trim().is_empty())
        .map(|l| (l.id.as_str(), LaneMetric::new(&l.id, &l.title)))
        .collect();

    for task in board.tasks().filter(|t| !t.is_archived) {
        let lane_id = normalize_lane_id(task.lane_id.as_deref())
            .filter(|id| lanes.contains(id))
            .unwrap_or(UNASSIGNED_LANE_ID);
        let metric = by_lane
            .entry(lane_id)
            .or_insert_with(|| LaneMetric::new(UNASSIGNED_LANE_ID, "Unassigned"));
        metric.active_count += 1;
        if task.is_blocked {
            metric.blocked_count += 1;
        }
        if task.is_overdue(now) {
            metric.overdue_count += 1;
        }
    }

    let mut ordered = Vec::with_capacity(by_lane.len());
    if let Some(unassigned) = by_lane.remove(UNASSIGNED_LANE_ID) {
        ordered.push(unassigned);
    }
    for lane in &board.lanes {
        if let Some(metric) = by_lane.remove(lane.id.as_str()) {
            ordered.push(metric);
        }
    }
    ordered
}
