//! The voting terminal: a [`LockGate`] driving a [`Session`] over the
//! election catalog and ballot ledger.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{Duration, Utc};
use log::{debug, error, info, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::{
        self,
        sync::{mpsc, watch},
    },
    Build, Rocket,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::TransitionLogger;
use crate::model::{
    audit::AuditRecord,
    ballot::{Ballot, NewBallot, SessionMetadata, VoterId},
    election::OfficeId,
};
use crate::scheduled_task::ScheduledTask;
use crate::store::Stores;

mod gate;
mod session;

pub use gate::{GateEvent, GateObserver, GateState, LockGate};
pub use session::{
    InputRejected, PendingBallot, Resolution, Session, SessionFault, SessionState,
};

/// Audit action recorded for every cast ballot.
const VOTE_ACTION: &str = "VOTE";

/// Settings for one terminal.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Recorded on every ballot.
    pub terminal_id: String,
    /// How long the end-of-session screen stays up before the gate relocks.
    pub dwell: Duration,
}

/// The office on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeScreen {
    pub id: OfficeId,
    pub name: String,
    pub digits: u8,
    /// 1-based position in the voting order.
    pub position: usize,
    pub total: usize,
}

/// Everything the voter and poll worker can see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalStatus {
    pub terminal_id: String,
    pub locked: bool,
    pub voter_id: Option<VoterId>,
    pub session_id: Option<String>,
    pub state: SessionState,
    pub office: Option<OfficeScreen>,
    pub digits: String,
    pub message: String,
    /// Why the last session ended early, until the next unlock.
    pub last_error: Option<SessionFault>,
}

/// Mutable terminal state, guarded as one.
struct Machine {
    session: Session,
    /// Bumped on every unlock and lock, so work started for one session can
    /// tell it has been overtaken.
    generation: u64,
    session_id: Option<String>,
    last_error: Option<SessionFault>,
    relock: Option<ScheduledTask<()>>,
}

struct Inner {
    gate: LockGate,
    stores: Stores,
    config: TerminalConfig,
    machine: Mutex<Machine>,
    status: watch::Sender<TerminalStatus>,
    /// Generations waiting for their election to be loaded.
    loads: mpsc::UnboundedSender<u64>,
}

/// A voting terminal. Clones share the same terminal.
#[derive(Clone)]
pub struct Terminal {
    inner: Arc<Inner>,
}

impl Terminal {
    /// Create a locked terminal. Must be called from within a Tokio runtime.
    pub fn new(stores: Stores, config: TerminalConfig) -> Self {
        let machine = Machine {
            session: Session::new(),
            generation: 0,
            session_id: None,
            last_error: None,
            relock: None,
        };
        let (status, _) = watch::channel(render(&config, &machine, None));
        let (loads, mut pending) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            gate: LockGate::new(),
            stores,
            config,
            machine: Mutex::new(machine),
            status,
            loads,
        });

        inner.gate.subscribe(Arc::new(SessionObserver {
            inner: Arc::downgrade(&inner),
        }));

        let driver = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(generation) = pending.recv().await {
                let Some(inner) = driver.upgrade() else {
                    break;
                };
                inner.load_election(generation).await;
            }
            debug!("Terminal driver stopped");
        });

        Self { inner }
    }

    pub fn gate(&self) -> &LockGate {
        &self.inner.gate
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.inner.config
    }

    /// Release the terminal for a voter. The election loads in the
    /// background; ignored if already unlocked or the voter ID is blank.
    pub fn unlock(&self, voter_id: &str) -> bool {
        self.inner.gate.unlock(voter_id)
    }

    /// Lock the terminal, abandoning any session in progress.
    pub fn lock(&self) -> bool {
        self.inner.gate.lock()
    }

    pub fn status(&self) -> TerminalStatus {
        self.inner.status.borrow().clone()
    }

    /// Wait until the status satisfies `predicate`, and return it.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&TerminalStatus) -> bool) -> TerminalStatus {
        let mut updates = self.inner.status.subscribe();
        loop {
            {
                let status = updates.borrow_and_update();
                if predicate(&status) {
                    return status.clone();
                }
            }
            if updates.changed().await.is_err() {
                return self.status();
            }
        }
    }

    pub fn press_digit(&self, digit: char) -> Result<TerminalStatus> {
        self.inner.update(|session| session.press_digit(digit))
    }

    pub fn press_blank(&self) -> Result<TerminalStatus> {
        self.inner.update(Session::press_blank)
    }

    pub fn correct(&self) -> Result<TerminalStatus> {
        self.inner.update(Session::correct)
    }

    /// Cast the resolved choice for the current office.
    ///
    /// Session-fatal errors do not fail this call: they end the session,
    /// lock the gate and show up in the returned status. If the session is
    /// ended from outside while its ballot is being cast, this fails with
    /// [`InputRejected::NotAccepting`].
    pub async fn confirm(&self) -> Result<TerminalStatus> {
        let (pending, generation, voter_id, metadata) = {
            let mut machine = self.inner.machine();
            let pending = machine.session.confirm()?;
            // A gate transition cannot complete while the machine is held,
            // so this is the voter of this session or nobody.
            let voter_id = self.inner.gate.current_voter();
            let metadata = SessionMetadata {
                session_id: machine.session_id.clone(),
                terminal_id: Some(self.inner.config.terminal_id.clone()),
            };
            self.inner.publish(&machine);
            (pending, machine.generation, voter_id, metadata)
        };

        let status = match voter_id {
            None => self
                .inner
                .abort_session(generation, SessionFault::NoAuthorizedVoter),
            Some(voter_id) => match self.inner.cast(voter_id, &pending, generation, metadata).await {
                Ok(Some(ballot)) => self.inner.committed(generation, ballot),
                Ok(None) => None,
                Err(fault) => self.inner.abort_session(generation, fault),
            },
        };
        // Without a status the session was ended from outside, and whatever
        // is on screen now belongs to someone else.
        status.ok_or_else(|| InputRejected::NotAccepting.into())
    }
}

impl Inner {
    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the current status. Called with the machine locked, so
    /// updates go out in order.
    fn publish(&self, machine: &Machine) -> TerminalStatus {
        let status = render(&self.config, machine, self.gate.current_voter());
        self.status.send_replace(status.clone());
        status
    }

    fn update(
        &self,
        input: impl FnOnce(&mut Session) -> std::result::Result<(), InputRejected>,
    ) -> Result<TerminalStatus> {
        let mut machine = self.machine();
        input(&mut machine.session)?;
        Ok(self.publish(&machine))
    }

    fn on_unlocked(&self, voter_id: &VoterId) {
        let mut machine = self.machine();
        if !machine.session.begin() {
            warn!("Terminal unlocked for {voter_id} during a session, ignoring");
            return;
        }
        machine.generation += 1;
        machine.session_id = Some(format!("{:016x}", rand::random::<u64>()));
        machine.last_error = None;
        info!(
            "Session {} started",
            machine.session_id.as_deref().unwrap_or_default()
        );
        self.publish(&machine);
        if self.loads.send(machine.generation).is_err() {
            // Only once the driver is gone, i.e. at shutdown.
            error!("Terminal driver is not running");
        }
    }

    fn on_locked(&self) {
        let mut machine = self.machine();
        if let Some(relock) = machine.relock.take() {
            relock.abort();
        }
        if !machine.session.is_idle() {
            info!("Session ended in state {:?}", machine.session.state());
        }
        machine.session.reset();
        machine.generation += 1;
        machine.session_id = None;
        self.publish(&machine);
    }

    async fn load_election(&self, generation: u64) {
        let loaded = self.stores.catalog.active_election().await;
        let fault = {
            let mut machine = self.machine();
            if machine.generation != generation
                || machine.session.state() != &SessionState::LoadingElection
            {
                return;
            }
            let result = match loaded {
                Ok(election) => machine.session.load(election),
                Err(e) => Err(SessionFault::Catalog(e.to_string())),
            };
            match result {
                Ok(()) => {
                    if let Some(election) = machine.session.election() {
                        debug!("Loaded election {} ({})", election.id, election.title);
                    }
                    self.publish(&machine);
                    return;
                }
                Err(fault) => fault,
            }
        };
        self.abort_session(generation, fault);
    }

    /// Write the ballot, mapping every failure to a session fault. `None`
    /// if the session was ended from outside before the write.
    async fn cast(
        &self,
        voter_id: VoterId,
        pending: &PendingBallot,
        generation: u64,
        metadata: SessionMetadata,
    ) -> std::result::Result<Option<Ballot>, SessionFault> {
        let election_id = pending.election_id;
        match self.stores.catalog.election(election_id).await {
            Ok(Some(election)) if election.is_open_at(Utc::now()) => {}
            Ok(_) => {
                return Err(SessionFault::ElectionClosed {
                    election: election_id,
                })
            }
            Err(e) => return Err(SessionFault::Catalog(e.to_string())),
        }

        let ledger = &self.stores.ledger;
        let duplicate = SessionFault::DuplicateVote {
            voter: voter_id.clone(),
            election: pending.election_id,
            office: pending.office_id,
        };
        match ledger
            .has_voted(&voter_id, pending.election_id, pending.office_id)
            .await
        {
            Ok(true) => return Err(duplicate),
            Ok(false) => {}
            Err(e) => return Err(SessionFault::Ledger(e.to_string())),
        }

        // Past this check the ballot is written, and stands.
        if !self.is_casting(generation, pending.office_index) {
            info!(
                "Session ended before its ballot for office {} was cast",
                pending.office_id
            );
            return Ok(None);
        }

        let ballot = NewBallot::new(
            voter_id,
            pending.election_id,
            pending.office_id,
            pending.choice,
            Utc::now(),
            metadata,
        );
        match ledger.cast(ballot).await {
            Ok(ballot) => Ok(Some(ballot)),
            Err(Error::DuplicateVote { .. }) => Err(duplicate),
            Err(e) => Err(SessionFault::Ledger(e.to_string())),
        }
    }

    /// Is this session still current and casting for this office?
    fn is_casting(&self, generation: u64, office: usize) -> bool {
        let machine = self.machine();
        machine.generation == generation && *machine.session.state() == SessionState::Casting { office }
    }

    /// A ballot is in the ledger: audit it and move the session on. `None`
    /// if the session has ended meanwhile.
    fn committed(self: &Arc<Self>, generation: u64, ballot: Ballot) -> Option<TerminalStatus> {
        info!(
            "Ballot {} cast for office {} of election {}",
            ballot.id, ballot.office_id, ballot.election_id
        );
        self.audit(&ballot);

        let mut machine = self.machine();
        if machine.generation != generation {
            // Locked while casting. The ballot stands.
            warn!("Session ended while ballot {} was being cast", ballot.id);
            return None;
        }
        if machine.session.cast_committed() == &SessionState::SessionComplete {
            let inner = Arc::downgrade(self);
            let run_at = Utc::now() + self.config.dwell;
            machine.relock = Some(ScheduledTask::new(
                async move {
                    if let Some(inner) = inner.upgrade() {
                        inner.finish_session(generation);
                    }
                },
                run_at,
            ));
        }
        Some(self.publish(&machine))
    }

    /// Record the ballot in the audit log, in the background.
    fn audit(&self, ballot: &Ballot) {
        let record = AuditRecord::new(
            VOTE_ACTION,
            "Ballot",
            Some(ballot.id.to_string()),
            format!(
                "{} ballot by voter {} for office {} in election {}",
                ballot.kind(),
                ballot.voter_id,
                ballot.office_id,
                ballot.election_id
            ),
        )
        .in_election(ballot.election_id);
        let audit = self.stores.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = audit.record(record).await {
                warn!("Failed to write audit record: {e}");
            }
        });
    }

    /// The end screen has been shown: relock for the next voter, unless
    /// the session has already ended some other way.
    fn finish_session(&self, generation: u64) {
        let locked = self.gate.lock_if(|| {
            let machine = self.machine();
            machine.generation == generation
                && *machine.session.state() == SessionState::SessionComplete
        });
        if locked {
            info!("Session complete, terminal locked");
        }
    }

    /// End the session with an error and lock the gate. Returns the status
    /// the session ended with, or `None` if it had already ended.
    fn abort_session(&self, generation: u64, fault: SessionFault) -> Option<TerminalStatus> {
        {
            let mut machine = self.machine();
            if machine.generation != generation {
                return None;
            }
            error!("Session aborted: {fault}");
            machine.session.fail(fault.clone());
            machine.last_error = Some(fault);
            self.publish(&machine);
        }
        let locked = self.gate.lock();
        let mut machine = self.machine();
        if !locked && machine.generation == generation {
            // Nobody else will reset the session.
            machine.session.reset();
            machine.generation += 1;
            self.publish(&machine);
        }
        // Locking moves one generation on; any further and the next voter
        // is already at the terminal.
        (machine.generation == generation + 1)
            .then(|| render(&self.config, &machine, self.gate.current_voter()))
    }
}

/// Connects the gate to the session.
struct SessionObserver {
    inner: Weak<Inner>,
}

impl GateObserver for SessionObserver {
    fn on_gate_event(&self, event: &GateEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match event {
            GateEvent::Unlocked(voter_id) => inner.on_unlocked(voter_id),
            GateEvent::Locked => inner.on_locked(),
        }
    }
}

fn render(config: &TerminalConfig, machine: &Machine, voter_id: Option<VoterId>) -> TerminalStatus {
    let session = &machine.session;
    let office = session.current_office().map(|office| OfficeScreen {
        id: office.id,
        name: office.name.clone(),
        digits: office.digits,
        position: session.state().office_index().unwrap_or_default() + 1,
        total: session.election().map_or(0, |e| e.offices.len()),
    });
    let message = match session.state() {
        SessionState::AwaitingUnlock => match &machine.last_error {
            Some(fault) => format!("{fault}. Please contact the poll worker."),
            None => "Terminal locked. Waiting for the poll worker.".to_string(),
        },
        SessionState::LoadingElection => "Loading election...".to_string(),
        SessionState::AwaitingDigits { .. } => match &office {
            Some(office) => format!("Enter the {}-digit number for {}", office.digits, office.name),
            None => String::new(),
        },
        SessionState::CandidateResolved { resolution, .. } => {
            let choice = match resolution {
                Resolution::Valid(c) => format!("{} {} ({})", c.number, c.name, c.party),
                Resolution::Null => "Number not found: NULL vote".to_string(),
                Resolution::Blank => "BLANK vote".to_string(),
            };
            format!("{choice}. Press CONFIRM or CORRECT.")
        }
        SessionState::Casting { .. } => "Recording your vote...".to_string(),
        SessionState::SessionComplete => "END. Thank you for voting.".to_string(),
        SessionState::Failed { fault } => format!("{fault}. Please contact the poll worker."),
    };

    TerminalStatus {
        terminal_id: config.terminal_id.clone(),
        locked: voter_id.is_none(),
        voter_id,
        session_id: machine.session_id.clone(),
        state: session.state().clone(),
        office,
        digits: session.digits().to_string(),
        message,
        last_error: machine.last_error.clone(),
    }
}

/// A fairing that builds the terminal from the managed config and stores,
/// and places it into managed state.
pub struct TerminalFairing;

#[rocket::async_trait]
impl Fairing for TerminalFairing {
    fn info(&self) -> Info {
        Info {
            name: "Voting terminal",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = rocket.state::<Config>().map(Config::terminal);
        let stores = rocket.state::<Stores>().cloned();
        let (Some(config), Some(stores)) = (config, stores) else {
            error!("Terminal needs the config and store fairings attached first");
            return Err(rocket);
        };
        let terminal = Terminal::new(stores, config);
        terminal.gate().subscribe(Arc::new(TransitionLogger));
        info!(
            "Terminal {} ready, relocking {}s after each session",
            terminal.config().terminal_id,
            terminal.config().dwell.num_seconds()
        );
        Ok(rocket.manage(terminal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use rocket::tokio::{
        sync::Notify,
        time::{sleep, timeout},
    };

    use crate::model::{
        api::results::ElectionResults,
        ballot::BallotChoice,
        election::{Election, ElectionId},
        mongodb::Id,
    };
    use crate::store::{BallotLedger, MemoryStore};

    const DWELL_MS: i64 = 100;

    fn terminal_over(stores: Stores) -> Terminal {
        log4rs_test_utils::test_logging::init_logging_once_for(["urna_backend"], None, None);
        Terminal::new(
            stores,
            TerminalConfig {
                terminal_id: "test-urna".to_string(),
                dwell: Duration::milliseconds(DWELL_MS),
            },
        )
    }

    async fn settle(
        terminal: &Terminal,
        predicate: impl FnMut(&TerminalStatus) -> bool,
    ) -> TerminalStatus {
        timeout(StdDuration::from_secs(5), terminal.wait_for(predicate))
            .await
            .expect("terminal did not settle")
    }

    /// Unlock for `voter` and wait for the first office.
    async fn start(terminal: &Terminal, voter: &str) -> TerminalStatus {
        assert!(terminal.unlock(voter));
        settle(terminal, |s| s.state == SessionState::AwaitingDigits { office: 0 }).await
    }

    fn enter(terminal: &Terminal, number: &str) -> TerminalStatus {
        let mut status = terminal.status();
        for digit in number.chars() {
            status = terminal.press_digit(digit).unwrap();
        }
        status
    }

    async fn relocked(terminal: &Terminal) -> TerminalStatus {
        settle(terminal, |s| s.locked && s.state == SessionState::AwaitingUnlock).await
    }

    #[derive(Default)]
    struct LockCounter(AtomicUsize);

    impl GateObserver for LockCounter {
        fn on_gate_event(&self, event: &GateEvent) {
            if *event == GateEvent::Locked {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// A ledger whose writes always fail.
    struct BrokenLedger;

    #[rocket::async_trait]
    impl BallotLedger for BrokenLedger {
        async fn has_voted(&self, _: &VoterId, _: ElectionId, _: OfficeId) -> Result<bool> {
            Ok(false)
        }

        async fn cast(&self, _: NewBallot) -> Result<Ballot> {
            Err(Error::BadRequest("ledger offline".to_string()))
        }

        async fn ballot(&self, _: Id) -> Result<Option<Ballot>> {
            Ok(None)
        }

        async fn ballots(&self, _: ElectionId) -> Result<Vec<Ballot>> {
            Ok(Vec::new())
        }

        async fn tally(&self, id: ElectionId) -> Result<ElectionResults> {
            Err(Error::not_found(format!("Election {id}")))
        }
    }

    /// A ledger that holds every `has_voted` lookup until released.
    struct SlowLedger {
        store: MemoryStore,
        entered: Notify,
        release: Notify,
    }

    impl SlowLedger {
        fn over(store: MemoryStore) -> Self {
            Self {
                store,
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[rocket::async_trait]
    impl BallotLedger for SlowLedger {
        async fn has_voted(
            &self,
            voter_id: &VoterId,
            election_id: ElectionId,
            office_id: OfficeId,
        ) -> Result<bool> {
            self.entered.notify_one();
            self.release.notified().await;
            self.store.has_voted(voter_id, election_id, office_id).await
        }

        async fn cast(&self, ballot: NewBallot) -> Result<Ballot> {
            self.store.cast(ballot).await
        }

        async fn ballot(&self, id: Id) -> Result<Option<Ballot>> {
            self.store.ballot(id).await
        }

        async fn ballots(&self, id: ElectionId) -> Result<Vec<Ballot>> {
            self.store.ballots(id).await
        }

        async fn tally(&self, id: ElectionId) -> Result<ElectionResults> {
            self.store.tally(id).await
        }
    }

    #[rocket::async_test]
    async fn single_office_end_to_end() {
        let store = MemoryStore::with_election(Election::single_office_example());
        let terminal = terminal_over(Stores::new(store.clone()));
        assert!(terminal.status().locked);

        let status = start(&terminal, "V1").await;
        assert_eq!(status.voter_id, VoterId::parse("V1"));
        assert_eq!(status.office.as_ref().unwrap().name, "Mayor");
        let session_id = status.session_id.clone();
        assert!(session_id.is_some());

        let status = enter(&terminal, "10");
        match &status.state {
            SessionState::CandidateResolved {
                resolution: Resolution::Valid(candidate),
                ..
            } => assert_eq!(candidate.name, "Alice"),
            other => panic!("unexpected state {other:?}"),
        }

        let status = terminal.confirm().await.unwrap();
        assert_eq!(status.state, SessionState::SessionComplete);

        let ballots = store.all_ballots();
        assert_eq!(ballots.len(), 1);
        let ballot = &ballots[0];
        assert_eq!(ballot.voter_id.as_str(), "V1");
        assert_eq!(ballot.office_id, 70);
        assert_eq!(ballot.candidate_id, Some(701));
        assert!(!ballot.is_null && !ballot.is_blank);
        assert!(ballot.verify());
        assert_eq!(ballot.metadata.terminal_id.as_deref(), Some("test-urna"));
        assert_eq!(ballot.metadata.session_id, session_id);

        let status = relocked(&terminal).await;
        assert!(terminal.gate().is_locked());
        assert_eq!(status.voter_id, None);
        assert_eq!(status.last_error, None);

        // The audit record is written in the background.
        let mut audited = store.audit_log();
        for _ in 0..100 {
            if !audited.is_empty() {
                break;
            }
            sleep(StdDuration::from_millis(10)).await;
            audited = store.audit_log();
        }
        assert_eq!(audited.len(), 1);
        assert_eq!(audited[0].action, "VOTE");
        assert_eq!(audited[0].entity_id, Some(ballot.id.to_string()));
        assert!(audited[0].description.starts_with("VALID"));
    }

    #[rocket::async_test]
    async fn advances_offices_and_locks_once() {
        let store = MemoryStore::demo();
        let terminal = terminal_over(Stores::new(store.clone()));
        let locks = Arc::new(LockCounter::default());
        terminal.gate().subscribe(locks.clone());

        start(&terminal, "V1").await;
        enter(&terminal, "10");
        let status = terminal.confirm().await.unwrap();
        assert_eq!(status.state, SessionState::AwaitingDigits { office: 1 });
        assert!(!status.locked);
        assert_eq!(status.digits, "");
        let office = status.office.unwrap();
        assert_eq!((office.name.as_str(), office.position, office.total), ("Governor", 2, 2));
        assert_eq!(store.all_ballots().len(), 1);

        enter(&terminal, "40");
        let status = terminal.confirm().await.unwrap();
        assert_eq!(status.state, SessionState::SessionComplete);
        assert!(!status.locked);

        relocked(&terminal).await;
        sleep(StdDuration::from_millis(3 * DWELL_MS as u64)).await;
        assert_eq!(locks.0.load(Ordering::SeqCst), 1);

        let ballots = store.ballots(1).await.unwrap();
        let offices: Vec<_> = ballots.iter().map(|b| b.office_id).collect();
        assert_eq!(offices, [1, 2]);
        assert_eq!(ballots[1].candidate_id, Some(4));
    }

    #[rocket::async_test]
    async fn unknown_number_casts_null() {
        let store = MemoryStore::with_election(Election::single_office_example());
        let terminal = terminal_over(Stores::new(store.clone()));

        start(&terminal, "V1").await;
        let status = enter(&terminal, "99");
        assert!(matches!(
            status.state,
            SessionState::CandidateResolved {
                resolution: Resolution::Null,
                ..
            }
        ));
        terminal.confirm().await.unwrap();

        let ballot = &store.all_ballots()[0];
        assert!(ballot.is_null && !ballot.is_blank);
        assert_eq!(ballot.candidate_id, None);
        assert!(ballot.verify());
    }

    #[rocket::async_test]
    async fn blank_vote() {
        let store = MemoryStore::with_election(Election::single_office_example());
        let terminal = terminal_over(Stores::new(store.clone()));

        start(&terminal, "V1").await;
        let status = terminal.press_blank().unwrap();
        assert_eq!(
            status.state,
            SessionState::CandidateResolved {
                office: 0,
                resolution: Resolution::Blank
            }
        );
        terminal.confirm().await.unwrap();

        let ballot = &store.all_ballots()[0];
        assert!(ballot.is_blank && !ballot.is_null);
        assert_eq!(ballot.candidate_id, None);
    }

    #[rocket::async_test]
    async fn forced_lock_discards_progress() {
        let store = MemoryStore::with_election(Election::single_office_example());
        let terminal = terminal_over(Stores::new(store.clone()));

        start(&terminal, "V1").await;
        terminal.press_digit('1').unwrap();
        assert!(terminal.lock());
        let status = terminal.status();
        assert_eq!(status.state, SessionState::AwaitingUnlock);
        assert_eq!(status.digits, "");
        assert_eq!(status.session_id, None);

        start(&terminal, "V1").await;
        enter(&terminal, "10");
        assert!(terminal.lock());
        assert!(matches!(
            terminal.confirm().await,
            Err(Error::Rejected(InputRejected::NotAccepting))
        ));

        assert!(store.all_ballots().is_empty());
        assert_eq!(terminal.status().last_error, None);
    }

    #[rocket::async_test]
    async fn forced_lock_preempts_dwell() {
        let store = MemoryStore::with_election(Election::single_office_example());
        let terminal = terminal_over(Stores::new(store));

        start(&terminal, "V1").await;
        enter(&terminal, "20");
        terminal.confirm().await.unwrap();
        assert!(terminal.lock());

        // The scheduled relock must not end the next voter's session.
        start(&terminal, "V2").await;
        sleep(StdDuration::from_millis(3 * DWELL_MS as u64)).await;
        let status = terminal.status();
        assert!(!status.locked);
        assert_eq!(status.voter_id, VoterId::parse("V2"));
    }

    #[rocket::async_test]
    async fn lock_while_casting_writes_nothing() {
        let store = MemoryStore::with_election(Election::single_office_example());
        let ledger = Arc::new(SlowLedger::over(store.clone()));
        let terminal = terminal_over(Stores {
            catalog: Arc::new(store.clone()),
            ledger: ledger.clone(),
            audit: Arc::new(store.clone()),
        });

        start(&terminal, "V1").await;
        enter(&terminal, "10");
        let confirming = tokio::spawn({
            let terminal = terminal.clone();
            async move { terminal.confirm().await }
        });
        ledger.entered.notified().await;

        // The poll worker overrides, and the next voter starts.
        assert!(terminal.lock());
        start(&terminal, "V2").await;
        ledger.release.notify_one();

        assert!(matches!(
            confirming.await.unwrap(),
            Err(Error::Rejected(InputRejected::NotAccepting))
        ));
        assert!(store.all_ballots().is_empty());
        let status = terminal.status();
        assert_eq!(status.voter_id, VoterId::parse("V2"));
        assert_eq!(status.state, SessionState::AwaitingDigits { office: 0 });
        assert_eq!(status.last_error, None);
    }

    #[rocket::async_test]
    async fn closed_election_ends_session() {
        let election = Election::single_office_example();
        let deactivated = Election {
            active: false,
            ..election.clone()
        };
        let expired = Election {
            closes_at: Utc::now() - Duration::seconds(1),
            ..election.clone()
        };

        for closed in [deactivated, expired] {
            let store = MemoryStore::with_election(election.clone());
            let terminal = terminal_over(Stores::new(store.clone()));

            start(&terminal, "V1").await;
            store.add_election(closed);
            enter(&terminal, "10");
            let status = terminal.confirm().await.unwrap();

            assert!(status.locked);
            assert_eq!(status.state, SessionState::AwaitingUnlock);
            assert_eq!(
                status.last_error,
                Some(SessionFault::ElectionClosed { election: 7 })
            );
            assert!(store.all_ballots().is_empty());
        }
    }

    #[rocket::async_test]
    async fn stale_relock_spares_next_session() {
        let store = MemoryStore::with_election(Election::single_office_example());
        let terminal = terminal_over(Stores::new(store));

        start(&terminal, "V1").await;
        terminal.press_blank().unwrap();
        let status = terminal.confirm().await.unwrap();
        assert_eq!(status.state, SessionState::SessionComplete);
        let finished = terminal.inner.machine().generation;

        assert!(terminal.lock());
        start(&terminal, "V2").await;
        terminal.inner.finish_session(finished);

        let status = terminal.status();
        assert!(!status.locked);
        assert_eq!(status.voter_id, VoterId::parse("V2"));
    }

    #[rocket::async_test]
    async fn duplicate_vote_ends_session() {
        let election = Election::single_office_example();
        let store = MemoryStore::with_election(election.clone());
        store
            .cast(NewBallot::new(
                VoterId::example(),
                election.id,
                70,
                BallotChoice::Blank,
                Utc::now(),
                SessionMetadata::default(),
            ))
            .await
            .unwrap();
        let terminal = terminal_over(Stores::new(store.clone()));

        start(&terminal, "V1").await;
        enter(&terminal, "10");
        let status = terminal.confirm().await.unwrap();

        assert!(status.locked);
        assert_eq!(status.state, SessionState::AwaitingUnlock);
        assert_eq!(
            status.last_error,
            Some(SessionFault::DuplicateVote {
                voter: VoterId::example(),
                election: 7,
                office: 70,
            })
        );
        assert!(status.message.contains("poll worker"));
        assert_eq!(store.all_ballots().len(), 1);

        // The next unlock clears the error.
        let status = start(&terminal, "V2").await;
        assert_eq!(status.last_error, None);
    }

    #[rocket::async_test]
    async fn ledger_failure_ends_session() {
        let store = MemoryStore::with_election(Election::single_office_example());
        let terminal = terminal_over(Stores {
            catalog: Arc::new(store.clone()),
            ledger: Arc::new(BrokenLedger),
            audit: Arc::new(store.clone()),
        });

        start(&terminal, "V1").await;
        terminal.press_blank().unwrap();
        let status = terminal.confirm().await.unwrap();
        assert!(status.locked);
        assert!(matches!(status.last_error, Some(SessionFault::Ledger(_))));
        assert!(store.audit_log().is_empty());
    }

    #[rocket::async_test]
    async fn no_active_election() {
        let terminal = terminal_over(Stores::new(MemoryStore::new()));
        assert!(terminal.unlock("V1"));
        let status = settle(&terminal, |s| s.last_error.is_some()).await;
        assert_eq!(status.last_error, Some(SessionFault::NoActiveElection));
        let status = relocked(&terminal).await;
        assert!(terminal.gate().is_locked());
        assert_eq!(status.last_error, Some(SessionFault::NoActiveElection));
    }

    #[rocket::async_test]
    async fn no_active_offices() {
        let store = MemoryStore::with_election(Election::empty_example());
        let terminal = terminal_over(Stores::new(store));
        assert!(terminal.unlock("V1"));
        let status = settle(&terminal, |s| s.last_error.is_some() && s.locked).await;
        assert_eq!(status.last_error, Some(SessionFault::NoOffices));
    }

    #[rocket::async_test]
    async fn second_unlock_is_ignored() {
        let store = MemoryStore::with_election(Election::single_office_example());
        let terminal = terminal_over(Stores::new(store));

        let before = start(&terminal, "V1").await;
        terminal.press_digit('1').unwrap();
        assert!(!terminal.unlock("V2"));
        let after = terminal.status();
        assert_eq!(after.voter_id, VoterId::parse("V1"));
        assert_eq!(after.session_id, before.session_id);
        assert_eq!(after.digits, "1");
    }

    #[rocket::async_test]
    async fn rejected_input_changes_nothing() {
        let store = MemoryStore::with_election(Election::single_office_example());
        let terminal = terminal_over(Stores::new(store));

        assert!(matches!(
            terminal.press_digit('1'),
            Err(Error::Rejected(InputRejected::NotAccepting))
        ));

        let before = start(&terminal, "V1").await;
        assert!(matches!(
            terminal.confirm().await,
            Err(Error::Rejected(InputRejected::NothingToConfirm))
        ));
        assert!(matches!(
            terminal.press_digit('#'),
            Err(Error::Rejected(InputRejected::NotADigit))
        ));
        assert_eq!(terminal.status(), before);
    }
}
