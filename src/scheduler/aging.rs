//! Priority-with-aging selection.
//!
//! Every scheduling decision scans the whole ready roster once. Each task
//! that is not selected ages by one step toward a higher scheduling priority,
//! and the selected task gets its static priority back. A task of the lowest
//! priority therefore waits a bounded number of decisions, proportional to
//! the width of the priority band, before it is selected.
use crate::roster::Roster;
use crate::task::TaskId;

/// Select the next task to run in the ready roster and apply aging to every
/// other task. Lower priority values win, and ties go to the task that comes
/// first in the roster. Returns `None` if the roster is empty.
pub fn select(ready: &Roster) -> Option<TaskId> {
    let mut tasks = ready.iter();
    let mut chosen = tasks.next()?;

    for task in tasks {
        if task.dynamic_priority() < chosen.dynamic_priority() {
            chosen.age();
            chosen = task;
        } else {
            task.age();
        }
    }

    chosen.restore_priority();
    Some(chosen.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::thread::Context;
    use crate::task::Task;
    use crate::time::Instant;

    fn roster(priorities: &[i32]) -> Roster {
        let mut roster = Roster::new();
        for (id, &priority) in priorities.iter().enumerate() {
            let task = Task::new(TaskId::from(id), Context::detached(), Instant::BOOT);
            task.set_priority(priority);
            roster.append(Box::new(task));
        }
        roster
    }

    fn dynamic(roster: &Roster) -> Vec<i32> {
        roster.iter().map(|task| task.dynamic_priority()).collect()
    }

    #[test]
    fn test_empty_roster() {
        assert_eq!(select(&Roster::new()), None);
    }

    #[test]
    fn test_lowest_value_wins_and_others_age() {
        let ready = roster(&[0, -5, 3]);
        assert_eq!(select(&ready), Some(TaskId::from(1)));
        assert_eq!(dynamic(&ready), vec![-1, -5, 2]);
    }

    #[test]
    fn test_ties_go_to_roster_order() {
        let ready = roster(&[0, 0, 0]);
        assert_eq!(select(&ready), Some(TaskId::from(0)));
        assert_eq!(dynamic(&ready), vec![0, -1, -1]);
    }

    #[test]
    fn test_equal_priorities_round_robin() {
        let ready = roster(&[0, 0]);
        let order: Vec<usize> = (0..6)
            .map(|_| select(&ready).unwrap().into())
            .collect();
        assert_eq!(order, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_priority_conservation() {
        // After every decision, the winner is back at its static priority and
        // every loser has aged by exactly one since it last won.
        let ready = roster(&[4, -2, 0, 7]);
        let mut losses = vec![0; 4];

        for _ in 0..50 {
            let winner = usize::from(select(&ready).unwrap());
            for (index, task) in ready.iter().enumerate() {
                if index == winner {
                    losses[index] = 0;
                    assert_eq!(task.dynamic_priority(), task.static_priority());
                } else {
                    losses[index] += 1;
                    assert_eq!(
                        task.dynamic_priority(),
                        task.static_priority() - losses[index]
                    );
                }
            }
        }
    }

    #[test]
    fn test_no_starvation() {
        let ready = roster(&[config::MIN_PRIORITY, config::MAX_PRIORITY]);
        let band = usize::try_from(config::MAX_PRIORITY - config::MIN_PRIORITY).unwrap();

        let waited = (0..)
            .take_while(|_| select(&ready) != Some(TaskId::from(1)))
            .count();
        assert!(waited <= band + 1, "lowest priority task waited {waited} rounds");
    }

    #[test]
    fn test_every_task_selected_within_bound() {
        let ready = roster(&[-20, -10, 0, 10, 20]);
        let bound = 5 * 42;
        let mut seen = [false; 5];
        for _ in 0..bound {
            seen[usize::from(select(&ready).unwrap())] = true;
        }
        assert!(seen.iter().all(|&selected| selected));
    }
}
