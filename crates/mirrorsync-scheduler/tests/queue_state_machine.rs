//! Stateful property testing for the update queue.
//!
//! Uses proptest-state-machine to drive the queue with random sequences of
//! enqueue, update, remove and acquire calls over a handful of repository
//! names. The reference model tracks:
//!
//! - At most one entry per name
//! - Priorities only ever rising while an entry is pending
//! - Dispatch order: pending before in-flight, high before low, then FIFO
//! - Payload refreshes never touching in-flight entries

use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};

use mirrorsync_scheduler::{ConfiguredRepo, Priority, UpdateQueue};

const NAMES: [&str; 4] = ["a", "b", "c", "d"];

/// Operations that can be performed on the queue.
#[derive(Debug, Clone)]
pub enum QueueOperation {
    Enqueue { name: usize, priority: Priority, version: u8 },
    Update { name: usize, version: u8 },
    Remove { name: usize, updating: bool },
    AcquireNext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryModel {
    pub url: String,
    pub priority: Priority,
    pub seq: u64,
    pub updating: bool,
}

/// Reference model of the queue contents.
#[derive(Debug, Clone, Default)]
pub struct QueueModel {
    pub entries: BTreeMap<String, EntryModel>,
    pub seq: u64,
    /// What the last `AcquireNext` should have returned.
    pub last_acquired: Option<ConfiguredRepo>,
}

fn repo(name: usize, version: u8) -> ConfiguredRepo {
    let name = NAMES[name];
    ConfiguredRepo::new(name, format!("https://example.com/{name}/v{version}"))
}

impl QueueModel {
    /// The entry `acquire_next` hands out: pending first, then higher
    /// priority, then lower sequence number.
    fn next(&self) -> Option<(&String, &EntryModel)> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.updating)
            .min_by_key(|(_, e)| (std::cmp::Reverse(e.priority), e.seq))
    }
}

impl ReferenceStateMachine for QueueModel {
    type State = Self;
    type Transition = QueueOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        let name = 0..NAMES.len();
        let priority = prop_oneof![Just(Priority::Low), Just(Priority::High)];
        prop_oneof![
            4 => (name.clone(), priority, any::<u8>())
                .prop_map(|(name, priority, version)| QueueOperation::Enqueue { name, priority, version }),
            1 => (name.clone(), any::<u8>())
                .prop_map(|(name, version)| QueueOperation::Update { name, version }),
            2 => (name, any::<bool>())
                .prop_map(|(name, updating)| QueueOperation::Remove { name, updating }),
            3 => Just(QueueOperation::AcquireNext),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        state.last_acquired = None;
        match transition {
            QueueOperation::Enqueue { name, priority, version } => {
                let r = repo(*name, *version);
                match state.entries.get_mut(&r.name) {
                    None => {
                        state.seq += 1;
                        state.entries.insert(
                            r.name.clone(),
                            EntryModel {
                                url: r.url,
                                priority: *priority,
                                seq: state.seq,
                                updating: false,
                            },
                        );
                    }
                    Some(e) if e.updating => {}
                    Some(e) if *priority > e.priority => {
                        state.seq += 1;
                        e.url = r.url;
                        e.priority = *priority;
                        e.seq = state.seq;
                    }
                    Some(_) => {}
                }
            }
            QueueOperation::Update { name, version } => {
                let r = repo(*name, *version);
                if let Some(e) = state.entries.get_mut(&r.name) {
                    if !e.updating {
                        e.url = r.url;
                    }
                }
            }
            QueueOperation::Remove { name, updating } => {
                let name = NAMES[*name];
                if state.entries.get(name).is_some_and(|e| e.updating == *updating) {
                    state.entries.remove(name);
                }
            }
            QueueOperation::AcquireNext => {
                let next = state
                    .next()
                    .map(|(name, e)| ConfiguredRepo::new(name.clone(), e.url.clone()));
                if let Some(r) = &next {
                    if let Some(e) = state.entries.get_mut(&r.name) {
                        e.updating = true;
                    }
                }
                state.last_acquired = next;
            }
        }
        state
    }
}

pub struct QueueTestHarness {
    queue: UpdateQueue,
    last_acquired: Option<ConfiguredRepo>,
}

impl QueueTestHarness {
    fn new() -> Self {
        Self {
            queue: UpdateQueue::new(),
            last_acquired: None,
        }
    }

    fn apply_operation(&mut self, op: &QueueOperation) {
        self.last_acquired = None;
        match op {
            QueueOperation::Enqueue { name, priority, version } => {
                self.queue.enqueue(&repo(*name, *version), *priority);
            }
            QueueOperation::Update { name, version } => {
                self.queue.update(&repo(*name, *version));
            }
            QueueOperation::Remove { name, updating } => {
                self.queue.remove(NAMES[*name], *updating);
            }
            QueueOperation::AcquireNext => {
                self.last_acquired = self.queue.acquire_next();
            }
        }
    }

    fn verify_invariants(&self, model: &QueueModel) {
        assert_eq!(
            self.queue.len(),
            model.entries.len(),
            "queue holds {} entries, model {}",
            self.queue.len(),
            model.entries.len()
        );
        assert_eq!(self.last_acquired, model.last_acquired);

        let mut slots = Vec::new();
        for name in NAMES {
            let state = self.queue.state(name);
            match model.entries.get(name) {
                None => assert!(state.is_none(), "{name} should not be queued"),
                Some(e) => {
                    let state = state.unwrap_or_else(|| panic!("{name} should be queued"));
                    assert_eq!(state.priority, e.priority, "priority of {name}");
                    assert_eq!(state.updating, e.updating, "updating flag of {name}");
                    assert_eq!(state.total, model.entries.len());
                    slots.push(state.index);
                }
            }
        }
        // One slot per entry.
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), model.entries.len());
    }
}

impl StateMachineTest for QueueTestHarness {
    type SystemUnderTest = Self;
    type Reference = QueueModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition);
        state.verify_invariants(ref_state);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        state.verify_invariants(ref_state);
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 10000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn update_queue_state_machine_test(sequential 1..60 => QueueTestHarness);
}

#[test]
fn test_priority_is_never_lowered() {
    let queue = UpdateQueue::new();
    queue.enqueue(&repo(1, 0), Priority::Low);
    queue.enqueue(&repo(0, 0), Priority::High);
    assert_eq!(queue.acquire_next().map(|r| r.name), Some("a".to_string()));

    queue.enqueue(&repo(0, 1), Priority::Low);
    assert_eq!(queue.state("a").map(|s| s.priority), Some(Priority::High));
    assert_eq!(queue.acquire_next().map(|r| r.name), Some("b".to_string()));
}
