/// Work-item numbering: every task carries a positive, board-unique display
/// number, and `Board::next_work_item_number` stays above all of them.
///
/// The counter saturates at `i32::MAX`. Once there, new tasks keep receiving
/// `i32::MAX` and the counter stops advancing.

use std::collections::HashSet;

use crate::types::{Board, Task};

/// Assign a number to a task that is about to join `board`.
///
/// A positive number is kept when no other task on the board uses it, and
/// the counter is raised past it. A colliding number is replaced. Returns
/// true when a number was assigned.
pub fn ensure_task_number(board: &mut Board, task: &mut Task) -> bool {
    let n = task.work_item_number;
    if n > 0 {
        let taken = board
            .tasks()
            .any(|other| other.id != task.id && other.work_item_number == n);
        if !taken {
            if n >= board.next_work_item_number {
                board.next_work_item_number = n.saturating_add(1);
            }
            return false;
        }
        log::debug!("[flowdeck.numbering] Task {} reuses number {}, renumbering", task.id, n);
    }

    let next = next_work_item_number(board);
    task.work_item_number = next;
    if next < i32::MAX {
        board.next_work_item_number = next + 1;
    }
    true
}

/// Repair pass over a whole board. Tasks without a positive number, or whose
/// number was already seen earlier in scan order, are renumbered
/// sequentially. Returns how many tasks changed.
pub fn ensure_board_numbers(board: &mut Board) -> usize {
    let mut used = HashSet::new();
    let mut queued: Vec<(usize, usize)> = Vec::new();
    let mut max = 0;

    for (ci, column) in board.columns.iter().enumerate() {
        for (ti, task) in column.tasks.iter().enumerate() {
            let n = task.work_item_number;
            if n > 0 && used.insert(n) {
                max = max.max(n);
            } else {
                queued.push((ci, ti));
            }
        }
    }

    let mut next = board.next_work_item_number.max(1);
    if next <= max {
        next = max.saturating_add(1);
    }

    for &(ci, ti) in &queued {
        board.columns[ci].tasks[ti].work_item_number = next;
        if next < i32::MAX {
            next += 1;
        }
    }

    if board.next_work_item_number != next {
        log::debug!(
            "[flowdeck.numbering] Board {} counter {} -> {} ({} renumbered)",
            board.id,
            board.next_work_item_number,
            next,
            queued.len()
        );
    }
    board.next_work_item_number = next;
    queued.len()
}

/// `max(counter, highest + 1)`, never below 1.
fn next_work_item_number(board: &Board) -> i32 {
    let next = board.next_work_item_number.max(1);
    let max = board.tasks().map(|t| t.work_item_number).max().unwrap_or(0);
    if next <= max {
        max.saturating_add(1)
    } else {
        next
    }
}
