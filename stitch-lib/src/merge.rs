// BSD 2-Clause License
//
// Copyright (c) 2019, 2020 Alasdair Armstrong
//
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
// 1. Redistributions of source code must retain the above copyright
// notice, this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright
// notice, this list of conditions and the following disclaimer in the
// documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Region based state merging. States entering a join region are
//! recorded in a merge group as open states. When one reaches a
//! join-exit point it is either merged into a state already parked
//! at that point, or parked itself until the group is released.
//!
//! The states themselves live in the scheduler. Groups only hold
//! `StateId`s and ask the scheduler, through the [Scheduler] trait,
//! to pause, continue, terminate, and merge them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::config::MergeOpts;
use crate::log;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub usize);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "state {}", self.0)
    }
}

/// Identifies a join-exit instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JoinPoint(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MergeGroupId(usize);

/// The operations on execution states that merging needs from the
/// surrounding executor.
pub trait Scheduler {
    /// Remove a state from the runnable set without destroying it.
    fn pause_state(&mut self, state: StateId);

    fn continue_state(&mut self, state: StateId);

    fn terminate_state(&mut self, state: StateId);

    /// Try to merge `from` into `into`. On success `into` now covers
    /// both states and `from` may be discarded.
    fn merge_states(&mut self, into: StateId, from: StateId) -> bool;

    fn stepped_instructions(&self, state: StateId) -> u64;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// No compatible state was waiting, so the state was paused.
    Parked,
    /// The closing state was absorbed into `into` and terminated.
    Merged { into: StateId },
}

pub struct MergeHandler {
    open_instruction: u64,
    open_states: Vec<StateId>,
    reached_close: BTreeMap<JoinPoint, Vec<StateId>>,
    closed_state_count: u64,
    close_mean: f64,
}

impl MergeHandler {
    /// Create a group for a state that has just entered a join
    /// region. The state becomes the only open state.
    pub fn new(owner: StateId, sched: &dyn Scheduler) -> Self {
        MergeHandler {
            open_instruction: sched.stepped_instructions(owner),
            open_states: vec![owner],
            reached_close: BTreeMap::new(),
            closed_state_count: 0,
            close_mean: 0.0,
        }
    }

    /// The mean instruction distance between entering the group and
    /// closing, over every state that has closed so far.
    pub fn get_mean(&self) -> f64 {
        if self.closed_state_count == 0 {
            0.0
        } else {
            self.close_mean
        }
    }

    pub fn closed_state_count(&self) -> u64 {
        self.closed_state_count
    }

    fn instr_distance(&self, state: StateId, sched: &dyn Scheduler) -> u64 {
        sched.stepped_instructions(state).saturating_sub(self.open_instruction)
    }

    /// Fold one more close distance into the running mean.
    pub fn record_distance(&mut self, distance: u64) {
        self.closed_state_count += 1;
        self.close_mean += (distance as f64 - self.close_mean) / self.closed_state_count as f64
    }

    pub fn add_open_state(&mut self, state: StateId) {
        self.open_states.push(state)
    }

    pub fn is_open(&self, state: StateId) -> bool {
        self.open_states.contains(&state)
    }

    pub fn is_parked(&self, state: StateId) -> bool {
        self.reached_close.values().any(|states| states.contains(&state))
    }

    pub fn open_states(&self) -> &[StateId] {
        &self.open_states
    }

    fn remove_open_state(&mut self, state: StateId) {
        match self.open_states.iter().position(|s| *s == state) {
            Some(i) => {
                self.open_states.swap_remove(i);
            }
            None => panic!("{} closed a merge group it never opened", state),
        }
    }

    /// Handle a state reaching the join-exit point `exit`. The state
    /// is tried against every state already parked at `exit`, oldest
    /// first. The first successful merge terminates the closing
    /// state, otherwise it is parked.
    pub fn add_closed_state(&mut self, state: StateId, exit: JoinPoint, sched: &mut dyn Scheduler) -> CloseOutcome {
        let distance = self.instr_distance(state, sched);
        self.record_distance(distance);

        self.remove_open_state(state);

        let parked = self.reached_close.entry(exit).or_default();
        for &occupant in parked.iter() {
            if sched.merge_states(occupant, state) {
                log_from!(state.0, log::MERGE, &format!("Merged into state {} at join point {}", occupant.0, exit.0));
                sched.terminate_state(state);
                return CloseOutcome::Merged { into: occupant };
            }
        }

        log_from!(state.0, log::MERGE, &format!("Parked at join point {} after {} instructions", exit.0, distance));
        parked.push(state);
        sched.pause_state(state);
        CloseOutcome::Parked
    }

    /// An open state that is expected to close soon: its distance
    /// since the group was opened is below `factor` times the mean
    /// close distance, and it is not already in the middle of
    /// closing.
    pub fn get_prioritize_state(&self, in_close_merge: &BTreeSet<StateId>, sched: &dyn Scheduler, factor: f64) -> Option<StateId> {
        let threshold = factor * self.get_mean();
        self.open_states
            .iter()
            .copied()
            .find(|state| !in_close_merge.contains(state) && (self.instr_distance(*state, sched) as f64) < threshold)
    }

    /// Continue every parked state, and forget them.
    pub fn release_states(&mut self, sched: &mut dyn Scheduler) -> Vec<StateId> {
        let released: Vec<StateId> = std::mem::take(&mut self.reached_close).into_values().flatten().collect();
        for &state in &released {
            sched.continue_state(state)
        }
        released
    }

    pub fn has_merged_states(&self) -> bool {
        !self.reached_close.is_empty()
    }

    /// Drop a state the scheduler has terminated, wherever it is in
    /// this group.
    fn forget_state(&mut self, state: StateId) {
        self.open_states.retain(|s| *s != state);
        for parked in self.reached_close.values_mut() {
            parked.retain(|s| *s != state)
        }
        self.reached_close.retain(|_, parked| !parked.is_empty())
    }
}

impl Drop for MergeHandler {
    fn drop(&mut self) {
        if self.has_merged_states() {
            warn!("Merge group dropped with parked states that were never released")
        }
    }
}

/// All live merge groups, and which group each state belongs to.
pub struct MergeRegistry {
    opts: MergeOpts,
    next_group: usize,
    groups: BTreeMap<MergeGroupId, MergeHandler>,
    membership: HashMap<StateId, MergeGroupId>,
    in_close_merge: BTreeSet<StateId>,
}

impl MergeRegistry {
    pub fn new(opts: MergeOpts) -> Self {
        MergeRegistry {
            opts,
            next_group: 0,
            groups: BTreeMap::new(),
            membership: HashMap::new(),
            in_close_merge: BTreeSet::new(),
        }
    }

    pub fn group_of(&self, state: StateId) -> Option<MergeGroupId> {
        self.membership.get(&state).copied()
    }

    pub fn group(&self, group: MergeGroupId) -> Option<&MergeHandler> {
        self.groups.get(&group)
    }

    pub fn groups(&self) -> impl Iterator<Item = (MergeGroupId, &MergeHandler)> {
        self.groups.iter().map(|(id, handler)| (*id, handler))
    }

    fn register(&mut self, state: StateId, group: MergeGroupId) {
        if let Some(other) = self.membership.insert(state, group) {
            panic!("{} registered with merge group {} while already in group {}", state, group.0, other.0)
        }
    }

    /// A state reached a join-entry marker. Returns the new group, or
    /// `None` if merging is disabled.
    pub fn open_merge(&mut self, state: StateId, sched: &dyn Scheduler) -> Option<MergeGroupId> {
        if !self.opts.enabled {
            warn!(format!("{} reached a join-entry point, but merging is disabled", state));
            return None;
        }
        let group = MergeGroupId(self.next_group);
        self.next_group += 1;
        self.register(state, group);
        self.groups.insert(group, MergeHandler::new(state, sched));
        log_from!(state.0, log::MERGE, &format!("Opened merge group {}", group.0));
        Some(group)
    }

    /// The scheduler saw `state` execute a join-exit marker, but has
    /// not yet handed it to [close_merge](Self::close_merge).
    pub fn reach_close(&mut self, state: StateId) {
        if self.membership.contains_key(&state) {
            self.in_close_merge.insert(state);
        }
    }

    /// A state reached the join-exit marker `exit`. States outside any
    /// group are ignored with a warning.
    pub fn close_merge(&mut self, state: StateId, exit: JoinPoint, sched: &mut dyn Scheduler) -> Option<CloseOutcome> {
        self.in_close_merge.remove(&state);
        if !self.opts.enabled {
            warn!(format!("{} reached a join-exit point, but merging is disabled", state));
            return None;
        }
        let group = match self.membership.remove(&state) {
            Some(group) => group,
            None => {
                warn!(format!("{} reached a join-exit point without opening a merge group", state));
                return None;
            }
        };
        let handler = self.groups.get_mut(&group).unwrap_or_else(|| panic!("merge group {} is missing", group.0));
        let outcome = handler.add_closed_state(state, exit, sched);
        self.destroy_if_drained(group, sched);
        Some(outcome)
    }

    /// A state forked while inside a join region. The child joins the
    /// parent's group as a new open state.
    pub fn state_forked(&mut self, parent: StateId, child: StateId) {
        if let Some(group) = self.group_of(parent) {
            self.register(child, group);
            if let Some(handler) = self.groups.get_mut(&group) {
                handler.add_open_state(child)
            }
        }
    }

    /// The scheduler terminated a state, for example because of a
    /// timeout. It is removed from every bookkeeping structure.
    pub fn state_terminated(&mut self, state: StateId, sched: &mut dyn Scheduler) {
        self.in_close_merge.remove(&state);
        let group = self.membership.remove(&state);
        for handler in self.groups.values_mut() {
            handler.forget_state(state)
        }
        if let Some(group) = group {
            self.destroy_if_drained(group, sched)
        }
    }

    fn destroy_if_drained(&mut self, group: MergeGroupId, sched: &mut dyn Scheduler) {
        if self.groups.get(&group).map_or(false, |handler| handler.open_states.is_empty()) {
            self.destroy_group(group, sched);
        }
    }

    /// Remove a group, continuing every state parked in it.
    pub fn destroy_group(&mut self, group: MergeGroupId, sched: &mut dyn Scheduler) -> Vec<StateId> {
        match self.groups.remove(&group) {
            Some(mut handler) => {
                for state in &handler.open_states {
                    self.membership.remove(state);
                }
                let released = handler.release_states(sched);
                log!(log::MERGE, &format!("Destroyed merge group {}, released {} states", group.0, released.len()));
                released
            }
            None => Vec::new(),
        }
    }

    /// Destroy every remaining group at the end of exploration,
    /// continuing all parked states.
    pub fn release_all(&mut self, sched: &mut dyn Scheduler) -> Vec<StateId> {
        let groups: Vec<MergeGroupId> = self.groups.keys().copied().collect();
        let released = groups.into_iter().flat_map(|group| self.destroy_group(group, sched)).collect();
        self.in_close_merge.clear();
        released
    }

    /// Incomplete merging. For the first group with parked states,
    /// return an open state likely to reach the join-exit soon, so
    /// the scheduler can run it next. If that group has no such state,
    /// stop waiting and release its parked states.
    pub fn select_state(&mut self, sched: &mut dyn Scheduler) -> Option<StateId> {
        if !self.opts.enabled || !self.opts.incomplete {
            return None;
        }
        let waiting: Vec<MergeGroupId> =
            self.groups.iter().filter(|(_, handler)| handler.has_merged_states()).map(|(id, _)| *id).collect();
        for group in waiting {
            let handler = match self.groups.get_mut(&group) {
                Some(handler) => handler,
                None => continue,
            };
            if let Some(state) = handler.get_prioritize_state(&self.in_close_merge, sched, self.opts.prioritize_factor) {
                log_from!(
                    state.0,
                    log::INCOMPLETE_MERGE,
                    &format!("Prioritized in group {} (mean close distance {:.1})", group.0, handler.get_mean())
                );
                return Some(state);
            }
            let released = handler.release_states(sched);
            log!(log::INCOMPLETE_MERGE, &format!("Released {} states of group {} early", released.len(), group.0));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    /// A scheduler where states merge when their compatibility class
    /// matches.
    #[derive(Default)]
    struct TestScheduler {
        steps: HashMap<StateId, u64>,
        class: HashMap<StateId, u32>,
        paused: HashSet<StateId>,
        terminated: HashSet<StateId>,
        continued: Vec<StateId>,
        merges: Vec<(StateId, StateId)>,
    }

    impl TestScheduler {
        fn state(&mut self, id: usize, steps: u64, class: u32) -> StateId {
            let state = StateId(id);
            self.steps.insert(state, steps);
            self.class.insert(state, class);
            state
        }
    }

    impl Scheduler for TestScheduler {
        fn pause_state(&mut self, state: StateId) {
            self.paused.insert(state);
        }

        fn continue_state(&mut self, state: StateId) {
            self.paused.remove(&state);
            self.continued.push(state)
        }

        fn terminate_state(&mut self, state: StateId) {
            self.terminated.insert(state);
        }

        fn merge_states(&mut self, into: StateId, from: StateId) -> bool {
            if self.class[&into] == self.class[&from] {
                self.merges.push((into, from));
                true
            } else {
                false
            }
        }

        fn stepped_instructions(&self, state: StateId) -> u64 {
            self.steps[&state]
        }
    }

    fn opts() -> MergeOpts {
        MergeOpts { enabled: true, incomplete: true, ..MergeOpts::default() }
    }

    #[test]
    fn simple_merge() {
        let mut sched = TestScheduler::default();
        let s1 = sched.state(1, 100, 0);
        let s2 = sched.state(2, 100, 0);

        let mut handler = MergeHandler::new(s1, &sched);
        handler.add_open_state(s2);

        sched.steps.insert(s1, 110);
        assert_eq!(handler.add_closed_state(s1, JoinPoint(7), &mut sched), CloseOutcome::Parked);
        assert!(sched.paused.contains(&s1));
        assert_eq!(handler.get_mean(), 10.0);

        sched.steps.insert(s2, 112);
        assert_eq!(handler.add_closed_state(s2, JoinPoint(7), &mut sched), CloseOutcome::Merged { into: s1 });
        assert!(sched.terminated.contains(&s2));
        assert_eq!(handler.reached_close[&JoinPoint(7)], vec![s1]);
        assert_eq!(handler.closed_state_count(), 2);
        assert!((handler.get_mean() - 11.0).abs() < 1e-9);

        assert_eq!(handler.release_states(&mut sched), vec![s1]);
        assert!(sched.paused.is_empty());
        assert!(!handler.has_merged_states());
    }

    #[test]
    fn incompatible_states_are_all_parked() {
        let mut sched = TestScheduler::default();
        let states: Vec<StateId> = (0..8).map(|i| sched.state(i, 0, i as u32)).collect();
        let mut handler = MergeHandler::new(states[0], &sched);
        for &state in &states[1..] {
            handler.add_open_state(state)
        }
        for &state in &states {
            assert_eq!(handler.add_closed_state(state, JoinPoint(1), &mut sched), CloseOutcome::Parked)
        }
        assert_eq!(handler.reached_close[&JoinPoint(1)], states);
        assert_eq!(sched.paused.len(), states.len());
        assert!(sched.terminated.is_empty());
        assert!(handler.open_states().is_empty());
        handler.release_states(&mut sched);
    }

    #[test]
    fn join_points_are_separate() {
        let mut sched = TestScheduler::default();
        let s1 = sched.state(1, 0, 0);
        let s2 = sched.state(2, 0, 0);
        let mut handler = MergeHandler::new(s1, &sched);
        handler.add_open_state(s2);
        handler.add_closed_state(s1, JoinPoint(1), &mut sched);
        assert_eq!(handler.add_closed_state(s2, JoinPoint(2), &mut sched), CloseOutcome::Parked);
        assert!(sched.merges.is_empty());
        assert_eq!(handler.release_states(&mut sched).len(), 2);
    }

    #[test]
    fn first_compatible_occupant_wins() {
        let mut sched = TestScheduler::default();
        let a = sched.state(1, 0, 1);
        let b = sched.state(2, 0, 2);
        let c = sched.state(3, 0, 2);
        let d = sched.state(4, 0, 2);
        let mut handler = MergeHandler::new(a, &sched);
        for state in [b, c, d] {
            handler.add_open_state(state)
        }
        handler.add_closed_state(a, JoinPoint(0), &mut sched);
        handler.add_closed_state(b, JoinPoint(0), &mut sched);
        assert_eq!(handler.add_closed_state(c, JoinPoint(0), &mut sched), CloseOutcome::Merged { into: b });
        assert_eq!(handler.add_closed_state(d, JoinPoint(0), &mut sched), CloseOutcome::Merged { into: b });
        assert_eq!(handler.reached_close[&JoinPoint(0)], vec![a, b]);
        handler.release_states(&mut sched);
    }

    #[test]
    #[should_panic(expected = "never opened")]
    fn closing_without_opening_panics() {
        let mut sched = TestScheduler::default();
        let s1 = sched.state(1, 0, 0);
        let s2 = sched.state(2, 0, 0);
        let mut handler = MergeHandler::new(s1, &sched);
        handler.add_closed_state(s2, JoinPoint(0), &mut sched);
    }

    #[test]
    fn running_mean_is_stable() {
        let mut rng = StdRng::seed_from_u64(0x5717c4);
        let mut sched = TestScheduler::default();
        let owner = sched.state(0, 0, 0);
        let mut handler = MergeHandler::new(owner, &sched);
        let mut sum = 0u64;
        for _ in 0..10_000 {
            let distance = rng.gen_range(0, 1_000_000);
            sum += distance;
            handler.record_distance(distance)
        }
        let mean = sum as f64 / 10_000.0;
        assert!((handler.get_mean() - mean).abs() < 1e-6 * mean);
        assert_eq!(handler.closed_state_count(), 10_000);
    }

    #[test]
    fn prioritize_below_threshold() {
        let mut sched = TestScheduler::default();
        let s1 = sched.state(1, 0, 1);
        let s2 = sched.state(2, 0, 2);
        let s3 = sched.state(3, 0, 3);
        let mut handler = MergeHandler::new(s1, &sched);
        handler.add_open_state(s2);
        handler.add_open_state(s3);

        let none = BTreeSet::new();
        assert_eq!(handler.get_prioritize_state(&none, &sched, 2.0), None);

        sched.steps.insert(s1, 10);
        handler.add_closed_state(s1, JoinPoint(0), &mut sched);
        sched.steps.insert(s2, 25);
        sched.steps.insert(s3, 15);
        assert_eq!(handler.get_prioritize_state(&none, &sched, 2.0), Some(s3));

        let closing: BTreeSet<StateId> = [s3].iter().copied().collect();
        assert_eq!(handler.get_prioritize_state(&closing, &sched, 2.0), None);
        assert_eq!(handler.get_prioritize_state(&closing, &sched, 3.0), Some(s2));
        handler.release_states(&mut sched);
    }

    #[test]
    fn registry_destroys_drained_groups() {
        let mut sched = TestScheduler::default();
        let s1 = sched.state(1, 0, 0);
        let s2 = sched.state(2, 0, 1);
        let mut registry = MergeRegistry::new(opts());

        let group = registry.open_merge(s1, &sched).unwrap();
        registry.state_forked(s1, s2);
        assert_eq!(registry.group_of(s2), Some(group));

        assert_eq!(registry.close_merge(s1, JoinPoint(0), &mut sched), Some(CloseOutcome::Parked));
        assert!(registry.group(group).is_some());
        assert!(sched.paused.contains(&s1));

        assert_eq!(registry.close_merge(s2, JoinPoint(0), &mut sched), Some(CloseOutcome::Parked));
        assert!(registry.group(group).is_none());
        assert!(sched.paused.is_empty());
        assert_eq!(sched.continued.len(), 2);
        assert_eq!(registry.group_of(s1), None);
    }

    #[test]
    fn release_all_continues_parked_states() {
        let mut sched = TestScheduler::default();
        let s1 = sched.state(1, 0, 0);
        let s2 = sched.state(2, 0, 0);
        let s3 = sched.state(3, 0, 0);
        let s4 = sched.state(4, 0, 0);
        let mut registry = MergeRegistry::new(opts());

        registry.open_merge(s1, &sched).unwrap();
        registry.state_forked(s1, s2);
        registry.open_merge(s3, &sched).unwrap();
        registry.state_forked(s3, s4);
        registry.close_merge(s1, JoinPoint(0), &mut sched);
        registry.close_merge(s3, JoinPoint(1), &mut sched);
        assert_eq!(registry.groups().count(), 2);
        assert!(sched.paused.contains(&s1) && sched.paused.contains(&s3));

        let mut released = registry.release_all(&mut sched);
        released.sort();
        assert_eq!(released, vec![s1, s3]);
        assert!(sched.paused.is_empty());
        assert_eq!(registry.groups().count(), 0);
        assert_eq!(registry.group_of(s2), None);
        assert_eq!(registry.group_of(s4), None);
        assert!(registry.release_all(&mut sched).is_empty());
    }

    #[test]
    fn registry_ignores_when_disabled() {
        let mut sched = TestScheduler::default();
        let s1 = sched.state(1, 0, 0);
        let mut registry = MergeRegistry::new(MergeOpts::default());
        assert_eq!(registry.open_merge(s1, &sched), None);
        assert_eq!(registry.close_merge(s1, JoinPoint(0), &mut sched), None);

        let mut registry = MergeRegistry::new(opts());
        assert_eq!(registry.close_merge(s1, JoinPoint(0), &mut sched), None);
    }

    #[test]
    #[should_panic(expected = "already in group")]
    fn double_registration_panics() {
        let mut sched = TestScheduler::default();
        let s1 = sched.state(1, 0, 0);
        let mut registry = MergeRegistry::new(opts());
        registry.open_merge(s1, &sched);
        registry.open_merge(s1, &sched);
    }

    #[test]
    fn terminated_states_are_forgotten() {
        let mut sched = TestScheduler::default();
        let s1 = sched.state(1, 0, 0);
        let s2 = sched.state(2, 0, 1);
        let s3 = sched.state(3, 0, 2);
        let mut registry = MergeRegistry::new(opts());
        let group = registry.open_merge(s1, &sched).unwrap();
        registry.state_forked(s1, s2);
        registry.state_forked(s1, s3);

        registry.close_merge(s1, JoinPoint(0), &mut sched);
        registry.state_terminated(s1, &mut sched);
        assert!(!registry.group(group).unwrap().is_parked(s1));

        registry.state_terminated(s2, &mut sched);
        assert!(registry.group(group).is_some());
        registry.state_terminated(s3, &mut sched);
        assert!(registry.group(group).is_none());
        assert_eq!(registry.group_of(s3), None);
    }

    #[test]
    fn select_state_prioritizes_then_releases() {
        let mut sched = TestScheduler::default();
        let s1 = sched.state(1, 0, 1);
        let s2 = sched.state(2, 0, 2);
        let mut registry = MergeRegistry::new(opts());
        let group = registry.open_merge(s1, &sched).unwrap();
        registry.state_forked(s1, s2);

        sched.steps.insert(s1, 10);
        registry.close_merge(s1, JoinPoint(0), &mut sched);

        sched.steps.insert(s2, 5);
        assert_eq!(registry.select_state(&mut sched), Some(s2));

        registry.reach_close(s2);
        assert_eq!(registry.select_state(&mut sched), None);
        assert!(!registry.group(group).unwrap().has_merged_states());
        assert!(sched.paused.is_empty());

        sched.steps.insert(s2, 40);
        assert_eq!(registry.close_merge(s2, JoinPoint(0), &mut sched), Some(CloseOutcome::Parked));
        assert!(registry.group(group).is_none());
    }

    /// Random interleavings of open, fork, close, and terminate never
    /// put a state in two groups, and never leave a state both open
    /// and parked.
    #[test]
    fn membership_is_disjoint() {
        let mut rng = StdRng::seed_from_u64(1234);
        for _ in 0..50 {
            let mut sched = TestScheduler::default();
            let mut registry = MergeRegistry::new(opts());
            let mut live: Vec<StateId> = Vec::new();
            let mut next = 0;

            for _ in 0..200 {
                match rng.gen_range(0, 5) {
                    0 => {
                        let state = sched.state(next, rng.gen_range(0, 100), rng.gen_range(0, 3));
                        next += 1;
                        live.push(state);
                        registry.open_merge(state, &sched);
                    }
                    1 if !live.is_empty() => {
                        let parent = live[rng.gen_range(0, live.len())];
                        let steps = sched.steps[&parent];
                        let child = sched.state(next, steps, rng.gen_range(0, 3));
                        next += 1;
                        live.push(child);
                        registry.state_forked(parent, child);
                    }
                    2 | 3 if !live.is_empty() => {
                        let state = live[rng.gen_range(0, live.len())];
                        *sched.steps.get_mut(&state).unwrap() += rng.gen_range(0, 50);
                        if registry.group_of(state).is_some() {
                            registry.close_merge(state, JoinPoint(rng.gen_range(0, 2)), &mut sched);
                        }
                    }
                    4 if !live.is_empty() => {
                        let state = live.swap_remove(rng.gen_range(0, live.len()));
                        registry.state_terminated(state, &mut sched);
                        sched.terminate_state(state);
                    }
                    _ => (),
                }
                live.retain(|s| !sched.terminated.contains(s));

                let mut seen = HashSet::new();
                for (id, handler) in registry.groups() {
                    for &state in handler.open_states() {
                        assert!(seen.insert(state), "{} appears twice", state);
                        assert_eq!(registry.group_of(state), Some(id));
                        assert!(!handler.is_parked(state));
                    }
                    for parked in handler.reached_close.values() {
                        for &state in parked {
                            assert!(seen.insert(state), "{} appears twice", state);
                            assert_eq!(registry.group_of(state), None);
                        }
                    }
                }
            }
            let groups: Vec<MergeGroupId> = registry.groups().map(|(id, _)| id).collect();
            for group in groups {
                registry.destroy_group(group, &mut sched);
            }
        }
    }
}
