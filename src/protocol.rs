// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Session Protocol

//! Per-agent message handling: neighbor discovery, unanimous session start,
//! negotiated session finish, variable exchange and convergence gossip.
//!
//! Each engine owns a mailbox shared with the peers it is physically
//! connected to. Asynchronous messages are queued and drained by
//! [`ProtocolEngine::execute`]; variable updates are answered in-line.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::cache::NeighborCache;
use crate::types::{AgentId, AgentSnapshot, Message, MessageKind, ProtocolState};

pub type Mailbox = Arc<Mutex<VecDeque<Message>>>;

fn lock(mailbox: &Mailbox) -> MutexGuard<'_, VecDeque<Message>> {
    // A poisoned queue still holds whole messages.
    mailbox.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the protocol needs from the agent it runs for.
pub trait ProtocolHost {
    fn snapshot(&self) -> AgentSnapshot;
    fn completion_criteria_met(&self) -> bool;
    fn cache(&self) -> &NeighborCache;
    fn cache_mut(&mut self) -> &mut NeighborCache;
    fn add_convergence_correction(&mut self, correction: f64);
    /// Forget the previous session: drop cached neighbors and start the
    /// convergence estimate over.
    fn begin_session(&mut self);
}

/// Who asked for a session transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Neighbor(AgentId),
}

#[derive(Debug, Clone)]
struct Peer {
    id: AgentId,
    mailbox: Mailbox,
}

#[derive(Debug)]
pub struct ProtocolEngine {
    owner: AgentId,
    name: String,
    state: ProtocolState,
    prior_state: Option<ProtocolState>,
    mailbox: Mailbox,
    peers: Vec<Peer>,
    discovered: BTreeSet<AgentId>,
    finished: BTreeSet<AgentId>,
    /// Session requests that arrived while this agent was still finishing.
    deferred: Vec<Message>,
    started: bool,
    iteration: u64,
}

impl ProtocolEngine {
    pub fn new(owner: AgentId, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
            state: ProtocolState::Idle,
            prior_state: None,
            mailbox: Arc::new(Mutex::new(VecDeque::new())),
            peers: Vec::new(),
            discovered: BTreeSet::new(),
            finished: BTreeSet::new(),
            deferred: Vec::new(),
            started: false,
            iteration: 0,
        }
    }

    // ---- Accessors ----

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn discovered(&self) -> &BTreeSet<AgentId> {
        &self.discovered
    }

    pub fn finished(&self) -> &BTreeSet<AgentId> {
        &self.finished
    }

    pub fn mailbox(&self) -> Mailbox {
        Arc::clone(&self.mailbox)
    }

    pub fn pending_messages(&self) -> usize {
        lock(&self.mailbox).len()
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    // ---- Wiring and administration ----

    /// Register a physical link. Discovery only ever reaches connected peers.
    pub fn connect(&mut self, peer: AgentId, mailbox: Mailbox) {
        if self.peers.iter().all(|p| p.id != peer) {
            self.peers.push(Peer { id: peer, mailbox });
        }
    }

    /// Announce this agent to every connected peer.
    pub fn init(&mut self) {
        if self.state != ProtocolState::Idle {
            debug!(agent = %self.name, state = %self.state, "discovery skipped outside idle");
            return;
        }
        self.broadcast(Message::new(self.owner, MessageKind::DiscoverNeighbours), None);
    }

    pub fn disable(&mut self) {
        if self.state != ProtocolState::Off {
            self.prior_state = Some(self.state);
            self.transition(ProtocolState::Off);
        }
    }

    pub fn enable(&mut self) {
        if self.state == ProtocolState::Off {
            let resumed = self.prior_state.take().unwrap_or(ProtocolState::Idle);
            self.transition(resumed);
        }
    }

    /// Re-arm the self-initiated session start, e.g. after a load change.
    pub fn request_session(&mut self) {
        self.started = false;
    }

    // ---- Message entry points ----

    /// Hand a message to this engine. Variable updates are answered
    /// immediately; everything else waits for the next `execute`.
    pub fn deliver<H: ProtocolHost>(&mut self, message: Message, host: &mut H) -> Option<Message> {
        if !message.kind.is_synchronous() {
            lock(&self.mailbox).push_back(message);
            return None;
        }
        if message.kind == MessageKind::VariableUpdate {
            self.answer_variable_update(&message, host)
        } else {
            self.accept_variable_update(&message, host);
            None
        }
    }

    pub fn accept_variable_update<H: ProtocolHost>(&mut self, response: &Message, host: &mut H) {
        match response.snapshot() {
            Some(snapshot) => host.cache_mut().insert(response.source, *snapshot),
            None => warn!(agent = %self.name, from = %response.source, "variable update response without snapshot"),
        }
    }

    fn answer_variable_update<H: ProtocolHost>(&mut self, request: &Message, host: &mut H) -> Option<Message> {
        if self.state == ProtocolState::Off {
            trace!(agent = %self.name, from = %request.source, "variable update unanswered while off");
            return None;
        }
        match request.snapshot() {
            Some(snapshot) => host.cache_mut().insert(request.source, *snapshot),
            None => warn!(agent = %self.name, from = %request.source, "variable update without snapshot"),
        }
        Some(Message::with_snapshot(
            self.owner,
            MessageKind::VariableUpdateResponse,
            host.snapshot(),
        ))
    }

    /// Push a convergence correction to a neighbor's mailbox.
    pub fn send_correction(&self, to: AgentId, correction: f64) {
        self.send(
            to,
            Message::with_scalar(self.owner, MessageKind::ConvergenceCorrection, correction),
        );
    }

    // ---- Execution ----

    /// Drain the mailbox, interleaving self-initiated session starts and
    /// finishes. A no-op while Off.
    pub fn execute<H: ProtocolHost>(&mut self, iteration: u64, host: &mut H) {
        self.iteration = iteration;
        if self.state == ProtocolState::Off {
            return;
        }

        let mut finish_rejected = false;
        loop {
            match self.state {
                ProtocolState::Idle if !self.started => {
                    self.started = true;
                    self.start_session(Origin::Local, None, host);
                }
                ProtocolState::SessionExecution
                    if !finish_rejected && host.completion_criteria_met() =>
                {
                    self.finish_session(Origin::Local, host);
                }
                _ => {}
            }

            let next = lock(&self.mailbox).pop_front();
            if let Some(message) = next {
                if message.kind == MessageKind::FinishSessionReject
                    && self.state == ProtocolState::SessionComplete
                {
                    finish_rejected = true;
                }
                self.dispatch(message, host);
            }

            if lock(&self.mailbox).is_empty() {
                break;
            }
        }
    }

    fn dispatch<H: ProtocolHost>(&mut self, message: Message, host: &mut H) {
        trace!(
            iteration = self.iteration,
            agent = %self.name,
            from = %message.source,
            kind = ?message.kind,
            "dispatch"
        );
        let source = message.source;
        match message.kind {
            MessageKind::DiscoverNeighbours => {
                self.discovered.insert(source);
                self.send(source, Message::new(self.owner, MessageKind::IdentifyNeighbour));
            }
            MessageKind::IdentifyNeighbour => {
                self.discovered.insert(source);
            }
            MessageKind::StartSession => {
                if self.state == ProtocolState::SessionComplete {
                    debug!(agent = %self.name, from = %source, "session request deferred until idle");
                    self.deferred.push(message);
                } else {
                    self.start_session(Origin::Neighbor(source), message.snapshot().copied(), host);
                }
            }
            MessageKind::StartSessionAccepted => {
                match message.snapshot() {
                    Some(snapshot) => host.cache_mut().insert(source, *snapshot),
                    None => warn!(agent = %self.name, from = %source, "session acceptance without snapshot"),
                }
                self.check_session_accepted(host);
            }
            MessageKind::CancelSession => {
                debug!(agent = %self.name, from = %source, "cancel session ignored");
            }
            MessageKind::FinishSession => self.finish_session(Origin::Neighbor(source), host),
            MessageKind::FinishSessionAccepted => self.add_finished(source),
            MessageKind::FinishSessionReject => self.resume_session(source),
            MessageKind::ConvergenceCorrection => match message.scalar() {
                Some(correction) => host.add_convergence_correction(correction),
                None => warn!(agent = %self.name, from = %source, "convergence correction without value"),
            },
            MessageKind::VariableUpdate | MessageKind::VariableUpdateResponse => {
                debug!(agent = %self.name, from = %source, "synchronous message found in mailbox, dropped");
            }
        }
    }

    // ---- Session state machine ----

    fn start_session<H: ProtocolHost>(
        &mut self,
        origin: Origin,
        payload: Option<AgentSnapshot>,
        host: &mut H,
    ) {
        match self.state {
            ProtocolState::Idle => {
                self.transition(ProtocolState::SessionInitialisation);
                host.begin_session();
                self.finished.clear();

                let exclude = match origin {
                    Origin::Local => None,
                    Origin::Neighbor(source) => {
                        // A neighbor flooding a start has joined already.
                        if let Some(snapshot) = payload {
                            host.cache_mut().insert(source, snapshot);
                        }
                        self.send(
                            source,
                            Message::with_snapshot(
                                self.owner,
                                MessageKind::StartSessionAccepted,
                                host.snapshot(),
                            ),
                        );
                        Some(source)
                    }
                };
                self.broadcast(
                    Message::with_snapshot(self.owner, MessageKind::StartSession, host.snapshot()),
                    exclude,
                );
                if exclude.is_some() {
                    self.check_session_accepted(host);
                }
            }
            ProtocolState::SessionInitialisation | ProtocolState::SessionExecution => {
                if let Origin::Neighbor(source) = origin {
                    if let Some(snapshot) = payload {
                        host.cache_mut().insert(source, snapshot);
                    }
                    self.send(
                        source,
                        Message::with_snapshot(
                            self.owner,
                            MessageKind::StartSessionAccepted,
                            host.snapshot(),
                        ),
                    );
                    self.check_session_accepted(host);
                }
            }
            ProtocolState::SessionComplete | ProtocolState::Off => {
                debug!(agent = %self.name, state = %self.state, ?origin, "start session ignored");
            }
        }
    }

    fn check_session_accepted<H: ProtocolHost>(&mut self, host: &H) {
        if self.state == ProtocolState::SessionInitialisation && host.cache().covers(&self.discovered) {
            self.transition(ProtocolState::SessionExecution);
        }
    }

    fn finish_session<H: ProtocolHost>(&mut self, origin: Origin, host: &mut H) {
        match self.state {
            ProtocolState::SessionExecution => {
                if host.completion_criteria_met() {
                    self.transition(ProtocolState::SessionComplete);
                    match origin {
                        Origin::Local => {
                            self.broadcast(Message::new(self.owner, MessageKind::FinishSession), None);
                        }
                        Origin::Neighbor(source) => {
                            self.send(source, Message::new(self.owner, MessageKind::FinishSessionAccepted));
                            self.broadcast(
                                Message::new(self.owner, MessageKind::FinishSession),
                                Some(source),
                            );
                            self.add_finished(source);
                        }
                    }
                } else if let Origin::Neighbor(source) = origin {
                    self.send(source, Message::new(self.owner, MessageKind::FinishSessionReject));
                }
            }
            ProtocolState::SessionComplete => {
                if let Origin::Neighbor(source) = origin {
                    self.add_finished(source);
                }
            }
            _ => {
                debug!(agent = %self.name, state = %self.state, ?origin, "finish session ignored");
            }
        }
    }

    fn add_finished(&mut self, id: AgentId) {
        self.finished.insert(id);
        if self.discovered.is_subset(&self.finished) {
            self.finished.clear();
            self.transition(ProtocolState::Idle);
            if !self.deferred.is_empty() {
                let mut mailbox = lock(&self.mailbox);
                for message in self.deferred.drain(..).rev() {
                    mailbox.push_front(message);
                }
            }
        }
    }

    fn resume_session(&mut self, from: AgentId) {
        if self.state == ProtocolState::SessionComplete {
            debug!(iteration = self.iteration, agent = %self.name, %from, "finish rejected, resuming");
            self.finished.clear();
            self.transition(ProtocolState::SessionExecution);
        }
    }

    // ---- Transport ----

    fn transition(&mut self, next: ProtocolState) {
        debug!(
            iteration = self.iteration,
            agent = %self.name,
            from = %self.state,
            to = %next,
            "protocol transition"
        );
        self.state = next;
    }

    fn send(&self, to: AgentId, message: Message) {
        match self.peers.iter().find(|p| p.id == to) {
            Some(peer) => {
                trace!(agent = %self.name, %to, kind = ?message.kind, "send");
                lock(&peer.mailbox).push_back(message);
            }
            None => debug!(agent = %self.name, %to, kind = ?message.kind, "no link to recipient, dropped"),
        }
    }

    fn broadcast(&self, message: Message, exclude: Option<AgentId>) {
        for peer in self.peers.iter().filter(|p| Some(p.id) != exclude) {
            trace!(agent = %self.name, to = %peer.id, kind = ?message.kind, "broadcast");
            lock(&peer.mailbox).push_back(message.clone());
        }
    }
}

// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentKind;

    struct TestHost {
        cache: NeighborCache,
        done: bool,
        corrections: f64,
    }

    impl TestHost {
        fn new() -> Self {
            Self { cache: NeighborCache::new(), done: false, corrections: 0.0 }
        }
    }

    impl ProtocolHost for TestHost {
        fn snapshot(&self) -> AgentSnapshot {
            AgentSnapshot {
                kind: AgentKind::ConstantPower,
                v: 12.0,
                v_minus: 0.0,
                flow: -1.0,
                lambda_plus: 0.0,
                lambda_minus: 0.0,
                alpha: 0.1,
                g_plus: 0.0,
                g_minus: 0.0,
                convergence: if self.done { 0.0 } else { 1.0 },
            }
        }
        fn completion_criteria_met(&self) -> bool { self.done }
        fn cache(&self) -> &NeighborCache { &self.cache }
        fn cache_mut(&mut self) -> &mut NeighborCache { &mut self.cache }
        fn add_convergence_correction(&mut self, correction: f64) { self.corrections += correction; }
        fn begin_session(&mut self) { self.cache.clear(); }
    }

    fn pair() -> (ProtocolEngine, ProtocolEngine) {
        let mut a = ProtocolEngine::new(AgentId(0), "a");
        let mut b = ProtocolEngine::new(AgentId(1), "b");
        a.connect(AgentId(1), b.mailbox());
        b.connect(AgentId(0), a.mailbox());
        (a, b)
    }

    fn round(a: &mut ProtocolEngine, ha: &mut TestHost, b: &mut ProtocolEngine, hb: &mut TestHost, k: u64) {
        a.execute(k, ha);
        b.execute(k, hb);
        a.execute(k, ha);
        b.execute(k, hb);
    }

    #[test]
    fn test_discovery_is_mutual() {
        let (mut a, mut b) = pair();
        let (mut ha, mut hb) = (TestHost::new(), TestHost::new());
        a.init();
        b.init();
        round(&mut a, &mut ha, &mut b, &mut hb, 0);
        assert!(a.discovered().contains(&AgentId(1)));
        assert!(b.discovered().contains(&AgentId(0)));
    }

    #[test]
    fn test_session_start_and_finish() {
        let (mut a, mut b) = pair();
        let (mut ha, mut hb) = (TestHost::new(), TestHost::new());
        a.init();
        b.init();
        for k in 0..3 {
            round(&mut a, &mut ha, &mut b, &mut hb, k);
        }
        assert_eq!(a.state(), ProtocolState::SessionExecution);
        assert_eq!(b.state(), ProtocolState::SessionExecution);
        assert!(ha.cache().contains(&AgentId(1)));

        ha.done = true;
        hb.done = true;
        for k in 3..6 {
            round(&mut a, &mut ha, &mut b, &mut hb, k);
        }
        assert_eq!(a.state(), ProtocolState::Idle);
        assert_eq!(b.state(), ProtocolState::Idle);
    }

    #[test]
    fn test_unconverged_neighbor_rejects_finish() {
        let (mut a, mut b) = pair();
        let (mut ha, mut hb) = (TestHost::new(), TestHost::new());
        a.init();
        b.init();
        for k in 0..3 {
            round(&mut a, &mut ha, &mut b, &mut hb, k);
        }
        ha.done = true;
        a.execute(3, &mut ha);
        assert_eq!(a.state(), ProtocolState::SessionComplete);
        b.execute(3, &mut hb);
        assert_eq!(b.state(), ProtocolState::SessionExecution);
        a.execute(3, &mut ha);
        assert_eq!(a.state(), ProtocolState::SessionExecution);
        assert!(a.finished().is_empty());
    }

    #[test]
    fn test_off_agent_keeps_queue_and_skips_updates() {
        let (mut a, mut b) = pair();
        let (mut ha, mut hb) = (TestHost::new(), TestHost::new());
        b.disable();
        a.init();
        b.execute(0, &mut hb);
        assert_eq!(b.pending_messages(), 1);
        let request = Message::with_snapshot(AgentId(0), MessageKind::VariableUpdate, ha.snapshot());
        assert!(b.deliver(request, &mut hb).is_none());
        b.enable();
        assert_eq!(b.state(), ProtocolState::Idle);
        b.execute(1, &mut hb);
        a.execute(1, &mut ha);
        assert!(a.discovered().contains(&AgentId(1)));
    }

    #[test]
    fn test_variable_update_caches_both_sides() {
        let (mut a, mut b) = pair();
        let (mut ha, mut hb) = (TestHost::new(), TestHost::new());
        let request = Message::with_snapshot(AgentId(0), MessageKind::VariableUpdate, ha.snapshot());
        let response = b.deliver(request, &mut hb).expect("test: answered");
        assert_eq!(response.kind, MessageKind::VariableUpdateResponse);
        a.accept_variable_update(&response, &mut ha);
        assert!(ha.cache().contains(&AgentId(1)));
        assert!(hb.cache().contains(&AgentId(0)));
    }

    #[test]
    fn test_corrections_accumulate() {
        let (a, mut b) = pair();
        let mut hb = TestHost::new();
        b.started = true;
        a.send_correction(AgentId(1), 0.25);
        a.send_correction(AgentId(1), -0.05);
        b.execute(0, &mut hb);
        assert!((hb.corrections - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_cancel_session_is_inert() {
        let (mut a, mut b) = pair();
        let mut hb = TestHost::new();
        b.started = true;
        b.deliver(Message::new(AgentId(0), MessageKind::CancelSession), &mut hb);
        b.execute(0, &mut hb);
        assert_eq!(b.state(), ProtocolState::Idle);
        a.request_session();
        assert!(!a.has_started());
    }
}
