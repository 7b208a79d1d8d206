//! Stateright model of the leader-gated upload protocol
//!
//! Nodes bootstrap from the highest manifest, bump the version, upload a
//! snapshot, pass a leadership check, persist the manifest, pass a second
//! check and reap. Elections and late notifications interleave with every
//! step, so a write that passed its check can still land after the writer
//! was deposed.
//!
//! Properties:
//! - `leader_versions_increase`: manifests written by the current leader
//!   carry strictly increasing versions
//! - `leader_never_reaps_live`: the current leader never deletes the latest
//!   leader-written manifest or its snapshot
//! - `offsets_monotonic_without_race` / `latest_snapshot_present_without_race`:
//!   hold whenever no stale write has landed
//! - `stale_write_reachable` (sometimes): the known race is real

use stateright::{Model, Property};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug)]
pub struct UploadProtocolConfig {
    pub nodes: usize,
    pub max_term: u8,
    pub max_version: u8,
    pub max_offset: u8,
}

impl Default for UploadProtocolConfig {
    fn default() -> Self {
        UploadProtocolConfig {
            nodes: 2,
            max_term: 3,
            max_version: 3,
            max_offset: 2,
        }
    }
}

/// Where a session is inside its current cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Ready,
    SnapshotUploaded,
    CheckedBeforePut,
    ManifestPut,
    CheckedBeforeReap,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Session {
    pub term: u8,
    pub phase: Phase,
    /// `None` until the first bump of a fresh manifest
    pub version: Option<u8>,
    pub offset: u8,
    pub reference: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeState {
    pub view_leader: bool,
    pub view_term: u8,
    pub local_snapshot: u8,
    pub session: Option<Session>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoredManifest {
    pub offset: u8,
    pub reference: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProtocolState {
    pub leader: Option<usize>,
    pub term: u8,
    pub nodes: Vec<NodeState>,
    pub manifests: BTreeMap<u8, StoredManifest>,
    pub snapshots: BTreeSet<u8>,
    /// Latest manifest written by the then-current leader
    pub last_legit: Option<(u8, Option<u8>)>,
    pub legit_max_offset: u8,
    pub stale_event: bool,
    pub version_regressed: bool,
    pub offset_regressed: bool,
    pub live_deleted: bool,
}

impl ProtocolState {
    pub fn new(nodes: usize) -> Self {
        ProtocolState {
            leader: None,
            term: 0,
            nodes: vec![
                NodeState {
                    view_leader: false,
                    view_term: 0,
                    local_snapshot: 0,
                    session: None,
                };
                nodes
            ],
            manifests: BTreeMap::new(),
            snapshots: BTreeSet::new(),
            last_legit: None,
            legit_max_offset: 0,
            stale_event: false,
            version_regressed: false,
            offset_regressed: false,
            live_deleted: false,
        }
    }

    fn sync_view(&mut self, node: usize) {
        let leads = self.leader == Some(node);
        let term = self.term;
        let n = &mut self.nodes[node];
        n.view_leader = leads;
        n.view_term = term;
    }

    fn holds_authority(&self, node: usize, term: u8) -> bool {
        self.leader == Some(node) && self.term == term
    }

    /// Local check, barrier, re-check; a failed check ends the session
    fn check(&mut self, node: usize, term: u8) -> bool {
        if !self.nodes[node].view_leader || self.nodes[node].view_term != term {
            return false;
        }
        self.sync_view(node);
        self.holds_authority(node, term)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolAction {
    Elect(usize),
    Notify(usize),
    TakeSnapshot(usize),
    Start(usize),
    Step(usize),
}

pub struct UploadProtocolModel {
    pub config: UploadProtocolConfig,
}

impl UploadProtocolModel {
    pub fn new() -> Self {
        UploadProtocolModel {
            config: UploadProtocolConfig::default(),
        }
    }

    pub fn with_config(config: UploadProtocolConfig) -> Self {
        UploadProtocolModel { config }
    }

    fn step(&self, state: &mut ProtocolState, node: usize) -> Option<()> {
        let mut session = state.nodes[node].session.clone()?;
        match session.phase {
            Phase::Ready => {
                let next = session.version.map_or(0, |v| v + 1);
                if next > self.config.max_version {
                    return None;
                }
                session.version = Some(next);
                let local = state.nodes[node].local_snapshot;
                if local > session.offset {
                    if !state.holds_authority(node, session.term) {
                        state.stale_event = true;
                    }
                    state.snapshots.insert(local);
                    session.offset = local;
                    session.reference = Some(local);
                }
                session.phase = Phase::SnapshotUploaded;
            }
            Phase::SnapshotUploaded => {
                if !state.check(node, session.term) {
                    state.nodes[node].session = None;
                    return Some(());
                }
                session.phase = Phase::CheckedBeforePut;
            }
            Phase::CheckedBeforePut => {
                let version = session.version?;
                if state.holds_authority(node, session.term) {
                    if let Some((last, _)) = state.last_legit {
                        if version <= last {
                            state.version_regressed = true;
                        }
                    }
                    if session.offset < state.legit_max_offset {
                        state.offset_regressed = true;
                    }
                    state.legit_max_offset = state.legit_max_offset.max(session.offset);
                    state.last_legit = Some((version, session.reference));
                } else {
                    state.stale_event = true;
                }
                state.manifests.insert(
                    version,
                    StoredManifest {
                        offset: session.offset,
                        reference: session.reference,
                    },
                );
                session.phase = Phase::ManifestPut;
            }
            Phase::ManifestPut => {
                if !state.check(node, session.term) {
                    state.nodes[node].session = None;
                    return Some(());
                }
                session.phase = Phase::CheckedBeforeReap;
            }
            Phase::CheckedBeforeReap => {
                let version = session.version?;
                let legit = state.holds_authority(node, session.term);
                let doomed_manifests: Vec<u8> =
                    state.manifests.range(..version).map(|(v, _)| *v).collect();
                let doomed_snapshots: Vec<u8> = state
                    .snapshots
                    .iter()
                    .copied()
                    .filter(|s| *s < session.offset && Some(*s) != session.reference)
                    .collect();
                if !legit && !(doomed_manifests.is_empty() && doomed_snapshots.is_empty()) {
                    state.stale_event = true;
                }
                if legit {
                    if let Some((live, live_ref)) = state.last_legit {
                        if doomed_manifests.contains(&live)
                            || live_ref.is_some_and(|r| doomed_snapshots.contains(&r))
                        {
                            state.live_deleted = true;
                        }
                    }
                }
                for v in doomed_manifests {
                    state.manifests.remove(&v);
                }
                for s in doomed_snapshots {
                    state.snapshots.remove(&s);
                }
                session.phase = Phase::Ready;
            }
        }
        state.nodes[node].session = Some(session);
        Some(())
    }
}

impl Default for UploadProtocolModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for UploadProtocolModel {
    type State = ProtocolState;
    type Action = ProtocolAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![ProtocolState::new(self.config.nodes)]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for node in 0..state.nodes.len() {
            let n = &state.nodes[node];
            if state.term < self.config.max_term {
                actions.push(ProtocolAction::Elect(node));
            }
            if n.view_term != state.term || n.view_leader != (state.leader == Some(node)) {
                actions.push(ProtocolAction::Notify(node));
            }
            if n.local_snapshot < self.config.max_offset {
                actions.push(ProtocolAction::TakeSnapshot(node));
            }
            if n.session.is_none() && n.view_leader {
                actions.push(ProtocolAction::Start(node));
            }
            if n.session.is_some() {
                actions.push(ProtocolAction::Step(node));
            }
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();
        match action {
            ProtocolAction::Elect(node) => {
                next.term += 1;
                next.leader = Some(node);
                // The new leader's own session is always joined first
                next.nodes[node].session = None;
                next.sync_view(node);
            }
            ProtocolAction::Notify(node) => {
                next.sync_view(node);
                if !next.nodes[node].view_leader {
                    next.nodes[node].session = None;
                }
            }
            ProtocolAction::TakeSnapshot(node) => {
                next.nodes[node].local_snapshot += 1;
            }
            ProtocolAction::Start(node) => {
                let (version, stored) = match next.manifests.iter().next_back() {
                    Some((v, m)) => (Some(*v), m.clone()),
                    None => (
                        None,
                        StoredManifest {
                            offset: 0,
                            reference: None,
                        },
                    ),
                };
                next.nodes[node].session = Some(Session {
                    term: next.nodes[node].view_term,
                    phase: Phase::Ready,
                    version,
                    offset: stored.offset,
                    reference: stored.reference,
                });
            }
            ProtocolAction::Step(node) => {
                self.step(&mut next, node)?;
            }
        }
        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("leader_versions_increase", |_, state: &ProtocolState| {
                !state.version_regressed
            }),
            Property::always("leader_never_reaps_live", |_, state: &ProtocolState| {
                !state.live_deleted
            }),
            Property::always("offsets_monotonic_without_race", |_, state: &ProtocolState| {
                state.stale_event || !state.offset_regressed
            }),
            Property::always(
                "latest_snapshot_present_without_race",
                |_, state: &ProtocolState| {
                    if state.stale_event {
                        return true;
                    }
                    match state.manifests.iter().next_back() {
                        Some((_, m)) => m.reference.map_or(true, |r| state.snapshots.contains(&r)),
                        None => true,
                    }
                },
            ),
            Property::sometimes("manifest_persisted", |_, state: &ProtocolState| {
                !state.manifests.is_empty()
            }),
            Property::sometimes("stale_write_reachable", |_, state: &ProtocolState| {
                state.stale_event
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(model: &UploadProtocolModel, state: ProtocolState, actions: &[ProtocolAction]) -> ProtocolState {
        actions.iter().fold(state, |s, a| {
            model
                .next_state(&s, a.clone())
                .unwrap_or_else(|| panic!("action {:?} not enabled", a))
        })
    }

    #[test]
    fn test_single_leader_cycle() {
        use ProtocolAction::*;
        let model = UploadProtocolModel::new();
        let state = apply(
            &model,
            ProtocolState::new(2),
            &[Elect(0), TakeSnapshot(0), Start(0), Step(0), Step(0), Step(0), Step(0), Step(0)],
        );

        assert_eq!(state.manifests.len(), 1);
        assert_eq!(state.manifests.get(&0).map(|m| m.reference), Some(Some(1)));
        assert!(state.snapshots.contains(&1));
        assert_eq!(state.last_legit, Some((0, Some(1))));
        assert!(!state.stale_event);
        assert_eq!(state.nodes[0].session.as_ref().map(|s| s.phase), Some(Phase::Ready));
    }

    #[test]
    fn test_deposed_writer_lands_stale_manifest() {
        use ProtocolAction::*;
        let model = UploadProtocolModel::new();
        // Node 0 passes its check, then node 1 is elected before the put lands
        let state = apply(
            &model,
            ProtocolState::new(2),
            &[Elect(0), Start(0), Step(0), Step(0), Elect(1), Step(0)],
        );

        assert!(state.stale_event);
        assert!(state.manifests.contains_key(&0));
        assert_eq!(state.last_legit, None);

        // The follow-up check stops the deposed session
        let state = apply(&model, state, &[Step(0)]);
        assert!(state.nodes[0].session.is_none());
    }

    #[test]
    fn test_failed_check_ends_session_before_put() {
        use ProtocolAction::*;
        let model = UploadProtocolModel::new();
        let state = apply(
            &model,
            ProtocolState::new(2),
            &[Elect(0), Start(0), Step(0), Elect(1), Step(0)],
        );

        assert!(state.nodes[0].session.is_none());
        assert!(state.manifests.is_empty());
        assert!(!state.stale_event);
    }

    #[test]
    #[ignore] // Run with: cargo test stateright_upload_protocol -- --ignored --nocapture
    fn stateright_upload_protocol_model_check() {
        use stateright::Checker;

        let model = UploadProtocolModel::new();
        let checker = model.checker().spawn_bfs().join();

        println!("States explored: {}", checker.unique_state_count());

        checker.assert_properties();

        println!("Model check passed! Upload protocol invariants hold.");
    }
}
