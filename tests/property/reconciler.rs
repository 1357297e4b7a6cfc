//! Property tests for the client mirror.
//!
//! A small model of the hub applies random intents and produces the events
//! the hub would broadcast. Mirrors that join at arbitrary points (snapshot
//! first, then every later event) must end up equal to the model.
//!
//! Also checks, for arbitrary histories:
//! 1. Repeated `deleted` events are no-ops after the first.
//! 2. A snapshot replaces whatever the mirror held.
//! 3. `moved` never changes anything but the column.
//! 4. An optimistic move followed by the hub's broadcast converges.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use taskboard::mirror::Mirror;
use taskboard_proto::sync::ServerEvent;
use taskboard_proto::task::{Column, NewTask, Priority, Task, TaskId, TaskPatch};

/// Ids are drawn from a small pool so intents collide often.
const POOL: usize = 4;

fn pool_id(n: usize) -> TaskId {
    TaskId::new(format!("task-{n}"))
}

fn at(second: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + second, 0).single().unwrap()
}

fn arb_column() -> impl Strategy<Value = Column> {
    prop::sample::select(Column::ALL.to_vec())
}

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

/// Intents against the model hub.
#[derive(Debug, Clone)]
enum Op {
    Create(usize, String),
    Retitle(usize, String),
    Reprioritize(usize, Priority),
    Move(usize, Column),
    Delete(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..POOL, "[a-z]{1,8}").prop_map(|(n, t)| Op::Create(n, t)),
        (0..POOL, "[a-z]{1,8}").prop_map(|(n, t)| Op::Retitle(n, t)),
        (0..POOL, arb_priority()).prop_map(|(n, p)| Op::Reprioritize(n, p)),
        (0..POOL, arb_column()).prop_map(|(n, c)| Op::Move(n, c)),
        (0..POOL).prop_map(Op::Delete),
    ]
}

/// The hub reduced to its observable behavior: apply, then broadcast.
#[derive(Default)]
struct ModelHub {
    tasks: Vec<Task>,
    clock: i64,
}

impl ModelHub {
    fn find(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }

    /// Returns the broadcast for a successful intent, `None` for a failed one.
    fn apply(&mut self, op: &Op) -> Option<ServerEvent> {
        self.clock += 1;
        let now = at(self.clock);
        match op {
            Op::Create(n, title) => {
                let id = pool_id(*n);
                if self.tasks.iter().any(|t| t.id == id) {
                    return None;
                }
                let task = Task::from_new(id, NewTask::new(title.clone()), now);
                self.tasks.push(task.clone());
                Some(ServerEvent::Created {
                    task,
                    correlation: None,
                })
            }
            Op::Retitle(n, title) => {
                let patch = TaskPatch {
                    title: Some(title.clone()),
                    ..TaskPatch::default()
                };
                let task = self.find(&pool_id(*n))?;
                patch.apply_to(task);
                task.updated_at = now;
                Some(ServerEvent::Updated(task.clone()))
            }
            Op::Reprioritize(n, priority) => {
                let task = self.find(&pool_id(*n))?;
                task.priority = *priority;
                task.updated_at = now;
                Some(ServerEvent::Updated(task.clone()))
            }
            Op::Move(n, column) => {
                let task = self.find(&pool_id(*n))?;
                task.column = *column;
                task.updated_at = now;
                Some(ServerEvent::Moved {
                    id: task.id.clone(),
                    column: *column,
                })
            }
            Op::Delete(n) => {
                let id = pool_id(*n);
                let index = self.tasks.iter().position(|t| t.id == id)?;
                self.tasks.remove(index);
                Some(ServerEvent::Deleted(id))
            }
        }
    }
}

/// Mirror contents compared without `updated_at`, which `moved` does not carry.
fn shape(tasks: &[Task]) -> Vec<(TaskId, String, Priority, Column)> {
    tasks
        .iter()
        .map(|t| (t.id.clone(), t.title.clone(), t.priority, t.column))
        .collect()
}

proptest! {
    #[test]
    fn late_joiners_converge_with_the_hub(
        ops in prop::collection::vec(arb_op(), 0..60),
        joins in prop::collection::vec(0usize..60, 1..4),
    ) {
        let mut hub = ModelHub::default();
        let mut clients: Vec<(usize, Option<Mirror>)> =
            joins.into_iter().map(|j| (j.min(ops.len()), None)).collect();

        for step in 0..=ops.len() {
            for (join_at, mirror) in &mut clients {
                if *join_at == step && mirror.is_none() {
                    let mut fresh = Mirror::new();
                    fresh.apply(&ServerEvent::Snapshot(hub.tasks.clone()));
                    *mirror = Some(fresh);
                }
            }
            let Some(op) = ops.get(step) else { break };
            if let Some(event) = hub.apply(op) {
                for (_, mirror) in &mut clients {
                    if let Some(mirror) = mirror {
                        mirror.apply(&event);
                    }
                }
            }
        }

        for (_, mirror) in clients {
            let mirror = mirror.unwrap();
            prop_assert_eq!(shape(mirror.tasks()), shape(&hub.tasks));
        }
    }

    #[test]
    fn repeated_delete_is_a_noop(
        ops in prop::collection::vec(arb_op(), 0..30),
        n in 0..POOL,
    ) {
        let mut hub = ModelHub::default();
        let mut mirror = Mirror::new();
        for op in &ops {
            if let Some(event) = hub.apply(op) {
                mirror.apply(&event);
            }
        }
        let deleted = ServerEvent::Deleted(pool_id(n));
        mirror.apply(&deleted);
        let once = mirror.clone();
        mirror.apply(&deleted);
        prop_assert_eq!(mirror, once);
    }

    #[test]
    fn snapshot_supersedes_history(
        history in prop::collection::vec(arb_op(), 0..30),
        other in prop::collection::vec(arb_op(), 0..30),
    ) {
        let mut mirror = Mirror::new();
        let mut hub = ModelHub::default();
        for op in &history {
            if let Some(event) = hub.apply(op) {
                mirror.apply(&event);
            }
        }
        let mut elsewhere = ModelHub::default();
        for op in &other {
            elsewhere.apply(op);
        }

        mirror.apply(&ServerEvent::Snapshot(elsewhere.tasks.clone()));
        prop_assert_eq!(mirror.tasks(), elsewhere.tasks.as_slice());
    }

    #[test]
    fn moved_changes_only_the_column(
        ops in prop::collection::vec(arb_op(), 1..30),
        n in 0..POOL,
        column in arb_column(),
    ) {
        let mut hub = ModelHub::default();
        let mut mirror = Mirror::new();
        for op in &ops {
            if let Some(event) = hub.apply(op) {
                mirror.apply(&event);
            }
        }
        let before = mirror.clone();
        let id = pool_id(n);
        mirror.apply(&ServerEvent::Moved { id: id.clone(), column });

        prop_assert_eq!(mirror.len(), before.len());
        for (after, old) in mirror.tasks().iter().zip(before.tasks()) {
            let mut expected = old.clone();
            if old.id == id {
                expected.column = column;
            }
            prop_assert_eq!(after, &expected);
        }
    }

    #[test]
    fn optimistic_move_converges_after_broadcast(
        ops in prop::collection::vec(arb_op(), 1..30),
        n in 0..POOL,
        column in arb_column(),
    ) {
        let mut hub = ModelHub::default();
        let mut dragger = Mirror::new();
        let mut watcher = Mirror::new();
        for op in &ops {
            if let Some(event) = hub.apply(op) {
                dragger.apply(&event);
                watcher.apply(&event);
            }
        }

        let id = pool_id(n);
        if dragger.set_column_optimistic(&id, column) {
            let event = hub.apply(&Op::Move(n, column)).unwrap();
            dragger.apply(&event);
            watcher.apply(&event);
        } else {
            // Nothing was sent, so nothing may have changed.
            prop_assert_eq!(&dragger, &watcher);
        }
        prop_assert_eq!(shape(dragger.tasks()), shape(watcher.tasks()));
        prop_assert_eq!(shape(dragger.tasks()), shape(&hub.tasks));
    }
}
