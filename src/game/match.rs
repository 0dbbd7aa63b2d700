//! Match tasks and the registry that owns them.
//!
//! Every match runs as its own tokio task holding a [`SimulationEngine`].
//! Transports talk to it through a command channel and receive state on a
//! broadcast channel. The registry maps match ids to handles and guarantees
//! that one id never gets two tasks.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::{snapshot_interval_ticks, tick_duration};
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::bot::BotController;
use super::engine::{ScoreEvent, SimulationEngine};
use super::physics::GameParams;
use super::snapshot::SnapshotBuilder;
use super::{Difficulty, Direction, EngineError, GameMode, MatchStatus, PlayerSlot, BOT_ID};

/// Lifecycle timing shared by every match
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    pub params: GameParams,
    /// How long a finished match lingers while transports are still attached
    pub finished_grace: Duration,
    /// How long an unfinished match survives with nobody attached
    pub abandoned_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            params: GameParams::default(),
            finished_grace: Duration::from_secs(30),
            abandoned_timeout: Duration::from_secs(60),
        }
    }
}

/// Requests handled by a match task
#[derive(Debug)]
pub enum MatchCommand {
    /// Seat a transport's identity and start fanning out to it
    Attach {
        user_id: Uuid,
        reply: oneshot::Sender<Result<PlayerSlot, EngineError>>,
    },
    /// A transport for this identity went away
    Detach { user_id: Uuid },
    /// Inbound client message
    Input { user_id: Uuid, msg: ClientMsg },
    /// Stop the engine and end the task
    Shutdown,
}

/// Final result of a match decided on score
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub match_id: Uuid,
    pub winner_id: Uuid,
    pub loser_id: Uuid,
    pub winner_score: u32,
    pub loser_score: u32,
}

/// What a match task tells the outside world when it ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchReport {
    Finished(MatchOutcome),
    /// Torn down unfinished after nobody came back
    Abandoned { match_id: Uuid },
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub mode: GameMode,
    pub difficulty: Difficulty,
    pub command_tx: mpsc::Sender<MatchCommand>,
    pub snapshot_tx: broadcast::Sender<ServerMsg>,
    attached: Arc<AtomicUsize>,
}

impl MatchHandle {
    /// Transports currently attached
    pub fn attached_clients(&self) -> usize {
        self.attached.load(Ordering::Relaxed)
    }
}

/// One transport's seat in a match. Dropping it detaches the transport.
pub struct ClientSession {
    pub match_id: Uuid,
    pub user_id: Uuid,
    pub slot: PlayerSlot,
    handle: MatchHandle,
}

impl ClientSession {
    /// Forward a client message. Returns false once the match task is gone.
    pub async fn send(&self, msg: ClientMsg) -> bool {
        self.handle
            .command_tx
            .send(MatchCommand::Input {
                user_id: self.user_id,
                msg,
            })
            .await
            .is_ok()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        let detach = MatchCommand::Detach {
            user_id: self.user_id,
        };
        if let Err(TrySendError::Full(detach)) = self.handle.command_tx.try_send(detach) {
            // Channel is momentarily full; finish the detach asynchronously
            let tx = self.handle.command_tx.clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = tx.send(detach).await;
                });
            }
        }
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: Arc<DashMap<Uuid, MatchHandle>>,
    tasks: Arc<DashMap<Uuid, JoinHandle<()>>>,
    settings: RegistrySettings,
    report_tx: Option<mpsc::UnboundedSender<MatchReport>>,
}

impl MatchRegistry {
    pub fn new(settings: RegistrySettings, report_tx: Option<mpsc::UnboundedSender<MatchReport>>) -> Self {
        Self {
            matches: Arc::new(DashMap::new()),
            tasks: Arc::new(DashMap::new()),
            settings,
            report_tx,
        }
    }

    #[cfg(test)]
    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    /// Return the running match for `id`, starting it if absent.
    ///
    /// The first caller for an id creates the task; everyone else gets the
    /// existing handle, whatever mode they asked for.
    pub fn ensure_match(&self, id: Uuid, mode: GameMode, difficulty: Difficulty) -> MatchHandle {
        match self.matches.entry(id) {
            Entry::Occupied(existing) => {
                let handle = existing.get().clone();
                if handle.mode != mode || handle.difficulty != difficulty {
                    debug!(
                        match_id = %id,
                        requested_mode = ?mode,
                        requested_difficulty = ?difficulty,
                        "Match exists with different settings, keeping original"
                    );
                }
                handle
            }
            Entry::Vacant(slot) => {
                let guard = RegistryGuard {
                    id,
                    matches: self.matches.clone(),
                    tasks: self.tasks.clone(),
                };
                let (game_match, handle) = GameMatch::new(
                    id,
                    mode,
                    difficulty,
                    self.settings,
                    rand::random::<u64>(),
                    self.report_tx.clone(),
                    guard,
                );
                slot.insert(handle.clone());
                self.tasks.insert(id, tokio::spawn(game_match.run()));

                info!(match_id = %id, mode = ?mode, difficulty = ?difficulty, "Created new match");
                handle
            }
        }
    }

    /// Resolve or create the match and seat `user_id` in it.
    ///
    /// The returned receiver is subscribed before the seat is taken, so the
    /// first snapshot it yields already includes this player.
    pub async fn attach_client(
        &self,
        id: Uuid,
        mode: GameMode,
        difficulty: Difficulty,
        user_id: Uuid,
    ) -> Result<(ClientSession, broadcast::Receiver<ServerMsg>), EngineError> {
        let handle = self.ensure_match(id, mode, difficulty);
        let snapshot_rx = handle.snapshot_tx.subscribe();

        let closed = EngineError::InvalidState {
            action: "attach",
            status: MatchStatus::Finished,
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .command_tx
            .send(MatchCommand::Attach {
                user_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| closed.clone())?;
        let slot = reply_rx.await.map_err(|_| closed)??;

        let session = ClientSession {
            match_id: id,
            user_id,
            slot,
            handle,
        };
        Ok((session, snapshot_rx))
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_clients(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().attached_clients())
            .sum()
    }

    /// Stop every match and wait for their tasks to exit
    pub async fn shutdown(&self) {
        let handles: Vec<MatchHandle> = self.matches.iter().map(|m| m.value().clone()).collect();
        for handle in &handles {
            debug!(match_id = %handle.id, attached = handle.attached_clients(), "Stopping match");
            let _ = handle.command_tx.send(MatchCommand::Shutdown).await;
        }

        let ids: Vec<Uuid> = self.tasks.iter().map(|t| *t.key()).collect();
        for id in ids {
            if let Some((_, task)) = self.tasks.remove(&id) {
                if let Err(e) = task.await {
                    warn!(match_id = %id, error = %e, "Match task ended abnormally");
                }
            }
        }

        info!(matches = handles.len(), "Match registry drained");
    }
}

/// Removes a match from the registry when its task exits, on every path
struct RegistryGuard {
    id: Uuid,
    matches: Arc<DashMap<Uuid, MatchHandle>>,
    tasks: Arc<DashMap<Uuid, JoinHandle<()>>>,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.matches.remove(&self.id);
        self.tasks.remove(&self.id);
        info!(match_id = %self.id, "Match removed from registry");
    }
}

/// The authoritative game match
pub struct GameMatch {
    id: Uuid,
    engine: SimulationEngine,
    bot: Option<BotController>,
    command_rx: mpsc::Receiver<MatchCommand>,
    snapshot_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    settings: RegistrySettings,
    report_tx: Option<mpsc::UnboundedSender<MatchReport>>,

    /// Open transports per identity
    connections: HashMap<Uuid, usize>,
    attached: Arc<AtomicUsize>,
    /// Last direction received per slot, applied every tick
    latest_input: [Option<Direction>; 2],
    paused_for_disconnect: bool,
    unattended_since: Option<Instant>,
    finished_at: Option<Instant>,

    _guard: RegistryGuard,
}

impl GameMatch {
    fn new(
        id: Uuid,
        mode: GameMode,
        difficulty: Difficulty,
        settings: RegistrySettings,
        seed: u64,
        report_tx: Option<mpsc::UnboundedSender<MatchReport>>,
        guard: RegistryGuard,
    ) -> (Self, MatchHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (snapshot_tx, _) = broadcast::channel(64);
        let attached = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            id,
            mode,
            difficulty,
            command_tx,
            snapshot_tx: snapshot_tx.clone(),
            attached: attached.clone(),
        };

        let bot = (mode == GameMode::SinglePlayer).then(|| BotController::new(difficulty));
        let game_match = Self {
            id,
            engine: SimulationEngine::new(mode, difficulty, settings.params, seed),
            bot,
            command_rx,
            snapshot_tx,
            snapshot_builder: SnapshotBuilder::new(snapshot_interval_ticks()),
            settings,
            report_tx,
            connections: HashMap::new(),
            attached,
            latest_input: [None; 2],
            paused_for_disconnect: false,
            unattended_since: Some(Instant::now()),
            finished_at: None,
            _guard: guard,
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop
    pub async fn run(mut self) {
        info!(match_id = %self.id, "Match task started");

        let mut tick_interval = interval(tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => self.run_tick(),
                command = self.command_rx.recv() => match command {
                    Some(MatchCommand::Shutdown) | None => {
                        self.engine.stop();
                        self.broadcast();
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
            }

            if self.should_tear_down(Instant::now()) {
                break;
            }
        }

        info!(match_id = %self.id, status = ?self.engine.status(), "Match task stopped");
    }

    fn handle_command(&mut self, command: MatchCommand) {
        match command {
            MatchCommand::Attach { user_id, reply } => {
                let result = self.handle_attach(user_id);
                let _ = reply.send(result);
            }
            MatchCommand::Detach { user_id } => self.handle_detach(user_id),
            MatchCommand::Input { user_id, msg } => self.handle_input(user_id, msg),
            MatchCommand::Shutdown => {}
        }
    }

    fn handle_attach(&mut self, user_id: Uuid) -> Result<PlayerSlot, EngineError> {
        let status = self.engine.status();
        if status == MatchStatus::Finished && self.engine.slot_of(user_id).is_none() {
            return Err(EngineError::InvalidState {
                action: "attach",
                status,
            });
        }

        let slot = match self.engine.add_player(user_id) {
            Ok(slot) => slot,
            Err(e) => {
                warn!(match_id = %self.id, user_id = %user_id, error = %e, "Attach rejected");
                return Err(e);
            }
        };

        *self.connections.entry(user_id).or_insert(0) += 1;
        self.sync_attached();
        self.unattended_since = None;

        info!(
            match_id = %self.id,
            user_id = %user_id,
            slot = %slot,
            attached = self.attached_count(),
            "Client attached"
        );

        self.resume_if_reconnected();
        self.broadcast();
        Ok(slot)
    }

    fn handle_detach(&mut self, user_id: Uuid) {
        let Some(count) = self.connections.get_mut(&user_id) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.connections.remove(&user_id);
        }
        self.sync_attached();

        info!(match_id = %self.id, user_id = %user_id, attached = self.attached_count(), "Client detached");

        let player_gone = !self.connections.contains_key(&user_id) && self.engine.slot_of(user_id).is_some();
        if player_gone && self.engine.pause() {
            self.paused_for_disconnect = true;
            info!(match_id = %self.id, user_id = %user_id, "Paused until player reconnects");
        } else if player_gone && self.engine.status() == MatchStatus::Countdown {
            info!(match_id = %self.id, user_id = %user_id, "Countdown held until player reconnects");
        }
        if self.attached_count() == 0 {
            self.unattended_since = Some(Instant::now());
        }
        self.broadcast();
    }

    fn handle_input(&mut self, user_id: Uuid, msg: ClientMsg) {
        match msg {
            ClientMsg::Move { slot, direction } => {
                if !self.may_control(user_id, slot) {
                    warn!(match_id = %self.id, user_id = %user_id, slot = %slot, "Move for foreign slot dropped");
                    return;
                }
                self.latest_input[slot.index()] = direction;
            }
            ClientMsg::Ready { slot, ready } => {
                if !self.may_control(user_id, slot) {
                    warn!(match_id = %self.id, user_id = %user_id, slot = %slot, "Ready for foreign slot dropped");
                    return;
                }
                let Some(identity) = self.engine.slot_identity(slot) else {
                    return;
                };
                if self.engine.set_ready_state(identity, ready) {
                    self.latest_input = [None; 2];
                    info!(match_id = %self.id, "Countdown started");
                }
                self.broadcast();
            }
            ClientMsg::Pause => {
                if self.engine.slot_of(user_id).is_some() && self.engine.pause() {
                    self.paused_for_disconnect = false;
                    self.broadcast();
                }
            }
            ClientMsg::Resume => {
                if self.engine.slot_of(user_id).is_some() && self.engine.resume() {
                    self.paused_for_disconnect = false;
                    self.broadcast();
                }
            }
            // Keepalives are answered by the transport
            ClientMsg::Ping => {}
        }
    }

    /// Online players drive their own paddle; a local host drives both
    fn may_control(&self, user_id: Uuid, slot: PlayerSlot) -> bool {
        let Some(own) = self.engine.slot_of(user_id) else {
            return false;
        };
        let local_host = self.engine.mode() == GameMode::OneVsOne
            && self.engine.difficulty() == Difficulty::Local
            && own == PlayerSlot::One;
        own == slot || local_host
    }

    fn resume_if_reconnected(&mut self) {
        if !self.paused_for_disconnect {
            return;
        }
        if self.humans_attached() && self.engine.resume() {
            self.paused_for_disconnect = false;
            info!(match_id = %self.id, "Players reconnected, resuming");
        }
    }

    /// Every seated human has at least one open transport
    fn humans_attached(&self) -> bool {
        PlayerSlot::ALL.into_iter().all(|slot| match self.engine.slot_identity(slot) {
            Some(id) if id != BOT_ID => self.connections.contains_key(&id),
            _ => true,
        })
    }

    /// Run a single simulation tick
    fn run_tick(&mut self) {
        // The countdown only runs while every human is connected
        let held = self.engine.status() == MatchStatus::Countdown && !self.humans_attached();
        if !held && self.engine.advance(tick_duration()) {
            info!(match_id = %self.id, "Ball served");
        }

        if self.engine.status() == MatchStatus::Playing {
            if let Some(bot) = self.bot.as_mut() {
                self.latest_input[bot.slot().index()] = bot.decide(&self.engine);
            }
            for slot in PlayerSlot::ALL {
                self.engine.apply_move(slot, self.latest_input[slot.index()]);
            }
            if let Some(event) = self.engine.tick() {
                self.handle_score(event);
            }
        }

        if self.snapshot_builder.should_send(self.engine.status()) {
            self.broadcast();
        }
    }

    fn handle_score(&mut self, event: ScoreEvent) {
        info!(
            match_id = %self.id,
            scorer = %event.scorer,
            score = event.score,
            finished = event.finished,
            "Point scored"
        );
        self.latest_input = [None; 2];
        self.snapshot_builder.force_next();

        if event.finished {
            self.finished_at = Some(Instant::now());
            self.report_outcome();
        }
    }

    fn report_outcome(&self) {
        let Some(winner) = self.engine.winner() else {
            return;
        };
        let loser = winner.opponent();
        let (Some(winner_id), Some(loser_id)) = (self.engine.slot_identity(winner), self.engine.slot_identity(loser))
        else {
            return;
        };

        let outcome = MatchOutcome {
            match_id: self.id,
            winner_id,
            loser_id,
            winner_score: self.engine.player(winner).score,
            loser_score: self.engine.player(loser).score,
        };
        info!(
            match_id = %self.id,
            winner_id = %winner_id,
            winner_score = outcome.winner_score,
            loser_score = outcome.loser_score,
            "Match finished"
        );

        if let Some(tx) = &self.report_tx {
            if tx.send(MatchReport::Finished(outcome)).is_err() {
                warn!(match_id = %self.id, "Report receiver dropped, result not recorded");
            }
        }
    }

    fn should_tear_down(&mut self, now: Instant) -> bool {
        if let Some(finished_at) = self.finished_at {
            return self.attached_count() == 0 || now.duration_since(finished_at) >= self.settings.finished_grace;
        }

        match self.unattended_since {
            Some(since) if now.duration_since(since) >= self.settings.abandoned_timeout => {
                warn!(match_id = %self.id, status = ?self.engine.status(), "Match abandoned, stopping");
                self.engine.stop();
                if let Some(tx) = &self.report_tx {
                    let _ = tx.send(MatchReport::Abandoned { match_id: self.id });
                }
                true
            }
            _ => false,
        }
    }

    fn broadcast(&self) {
        // No receivers is fine: nobody is watching yet
        let _ = self.snapshot_tx.send(SnapshotBuilder::build(&self.engine));
    }

    fn attached_count(&self) -> usize {
        self.connections.values().sum()
    }

    fn sync_attached(&self) {
        self.attached.store(self.attached_count(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::GameSnapshot;

    fn registry(settings: RegistrySettings) -> (Arc<MatchRegistry>, mpsc::UnboundedReceiver<MatchReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(MatchRegistry::new(settings, Some(tx))), rx)
    }

    /// Next game state, skipping anything the receiver fell behind on
    async fn next_state(rx: &mut broadcast::Receiver<ServerMsg>) -> GameSnapshot {
        loop {
            match rx.recv().await {
                Ok(ServerMsg::GameState(state)) => return state,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("match closed"),
            }
        }
    }

    /// Most recent buffered game state
    fn latest_state(rx: &mut broadcast::Receiver<ServerMsg>) -> Option<GameSnapshot> {
        let mut latest = None;
        loop {
            match rx.try_recv() {
                Ok(ServerMsg::GameState(state)) => latest = Some(state),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return latest,
            }
        }
    }

    async fn wait_for_status(rx: &mut broadcast::Receiver<ServerMsg>, status: MatchStatus) -> GameSnapshot {
        loop {
            let state = next_state(rx).await;
            if state.status == status {
                return state;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_match_is_idempotent_under_contention() {
        let (registry, _) = registry(RegistrySettings::default());
        let id = Uuid::new_v4();

        let calls: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.ensure_match(id, GameMode::OneVsOne, Difficulty::Online).id })
            })
            .collect();
        for call in calls {
            assert_eq!(call.await.unwrap(), id);
        }

        assert_eq!(registry.active_matches(), 1);
        assert_eq!(registry.tasks.len(), 1);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn third_client_is_turned_away() {
        let (registry, _) = registry(RegistrySettings::default());
        let id = Uuid::new_v4();

        let (a, _rx_a) = registry
            .attach_client(id, GameMode::OneVsOne, Difficulty::Online, Uuid::new_v4())
            .await
            .unwrap();
        let (b, _rx_b) = registry
            .attach_client(id, GameMode::OneVsOne, Difficulty::Online, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(a.slot, PlayerSlot::One);
        assert_eq!(b.slot, PlayerSlot::Two);

        let third = registry
            .attach_client(id, GameMode::OneVsOne, Difficulty::Online, Uuid::new_v4())
            .await;
        assert!(matches!(third, Err(EngineError::Capacity)));
        assert_eq!(registry.total_clients(), 2);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ready_starts_play_after_countdown() {
        let (registry, _) = registry(RegistrySettings::default());
        let id = Uuid::new_v4();
        let user = Uuid::new_v4();

        let (session, mut rx) = registry
            .attach_client(id, GameMode::SinglePlayer, Difficulty::Normal, user)
            .await
            .unwrap();
        let first = next_state(&mut rx).await;
        assert_eq!(first.status, MatchStatus::Waiting);
        assert_eq!(first.players.player1.id, Some(user));
        assert_eq!(first.players.player2.id, Some(BOT_ID));

        assert!(session.send(ClientMsg::Ready { slot: PlayerSlot::One, ready: true }).await);
        wait_for_status(&mut rx, MatchStatus::Countdown).await;
        let started = Instant::now();
        wait_for_status(&mut rx, MatchStatus::Playing).await;
        assert!(started.elapsed() >= Duration::from_millis(2900));
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_slot_moves_are_dropped() {
        let (registry, _) = registry(RegistrySettings::default());
        let id = Uuid::new_v4();

        let (a, mut rx) = registry
            .attach_client(id, GameMode::OneVsOne, Difficulty::Online, Uuid::new_v4())
            .await
            .unwrap();
        let (b, _rx_b) = registry
            .attach_client(id, GameMode::OneVsOne, Difficulty::Online, Uuid::new_v4())
            .await
            .unwrap();
        a.send(ClientMsg::Ready { slot: PlayerSlot::One, ready: true }).await;
        b.send(ClientMsg::Ready { slot: PlayerSlot::Two, ready: true }).await;
        wait_for_status(&mut rx, MatchStatus::Playing).await;

        a.send(ClientMsg::Move { slot: PlayerSlot::Two, direction: Some(Direction::Up) }).await;
        a.send(ClientMsg::Move { slot: PlayerSlot::One, direction: Some(Direction::Down) }).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = latest_state(&mut rx).unwrap();
        assert_eq!(state.status, MatchStatus::Playing);
        assert_eq!(state.players.player2.y, 160.0);
        assert!(state.players.player1.y > 160.0);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_pauses_and_reconnect_resumes() {
        let (registry, _) = registry(RegistrySettings::default());
        let id = Uuid::new_v4();
        let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());

        let (a, mut rx) = registry
            .attach_client(id, GameMode::OneVsOne, Difficulty::Online, user_a)
            .await
            .unwrap();
        let (b, _rx_b) = registry
            .attach_client(id, GameMode::OneVsOne, Difficulty::Online, user_b)
            .await
            .unwrap();
        a.send(ClientMsg::Ready { slot: PlayerSlot::One, ready: true }).await;
        b.send(ClientMsg::Ready { slot: PlayerSlot::Two, ready: true }).await;
        wait_for_status(&mut rx, MatchStatus::Playing).await;

        drop(b);
        wait_for_status(&mut rx, MatchStatus::Paused).await;

        let (b, _rx_b) = registry
            .attach_client(id, GameMode::OneVsOne, Difficulty::Online, user_b)
            .await
            .unwrap();
        assert_eq!(b.slot, PlayerSlot::Two);
        wait_for_status(&mut rx, MatchStatus::Playing).await;
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_waits_for_a_departed_player() {
        let (registry, _) = registry(RegistrySettings::default());
        let id = Uuid::new_v4();
        let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());

        let (a, mut rx) = registry
            .attach_client(id, GameMode::OneVsOne, Difficulty::Online, user_a)
            .await
            .unwrap();
        let (b, _rx_b) = registry
            .attach_client(id, GameMode::OneVsOne, Difficulty::Online, user_b)
            .await
            .unwrap();
        a.send(ClientMsg::Ready { slot: PlayerSlot::One, ready: true }).await;
        b.send(ClientMsg::Ready { slot: PlayerSlot::Two, ready: true }).await;
        wait_for_status(&mut rx, MatchStatus::Countdown).await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(b);

        // Well past the countdown: no serve while slot2 is away
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            loop {
                match rx.try_recv() {
                    Ok(ServerMsg::GameState(state)) => {
                        assert_eq!(state.status, MatchStatus::Countdown);
                        assert_eq!((state.players.player1.score, state.players.player2.score), (0, 0));
                    }
                    Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        }

        let (_b, _rx_b) = registry
            .attach_client(id, GameMode::OneVsOne, Difficulty::Online, user_b)
            .await
            .unwrap();
        let resumed = Instant::now();
        wait_for_status(&mut rx, MatchStatus::Playing).await;
        assert!(resumed.elapsed() >= Duration::from_millis(2400));
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn finished_match_reports_outcome_and_tears_down() {
        let params = GameParams {
            max_score: 1,
            paddle_height: 1.0,
            ..GameParams::default()
        };
        let settings = RegistrySettings {
            params,
            ..RegistrySettings::default()
        };
        let (registry, mut outcomes) = registry(settings);
        let id = Uuid::new_v4();
        let user = Uuid::new_v4();

        let (session, mut rx) = registry
            .attach_client(id, GameMode::SinglePlayer, Difficulty::Easy, user)
            .await
            .unwrap();
        session.send(ClientMsg::Ready { slot: PlayerSlot::One, ready: true }).await;

        let report = tokio::time::timeout(Duration::from_secs(600), outcomes.recv())
            .await
            .unwrap()
            .unwrap();
        let MatchReport::Finished(outcome) = report else {
            panic!("expected a finished report, got {report:?}");
        };
        assert_eq!(outcome.match_id, id);
        assert_eq!((outcome.winner_score, outcome.loser_score), (1, 0));
        let mut ids = [outcome.winner_id, outcome.loser_id];
        ids.sort();
        let mut expected = [user, BOT_ID];
        expected.sort();
        assert_eq!(ids, expected);

        wait_for_status(&mut rx, MatchStatus::Finished).await;
        drop(session);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.get(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_match_is_discarded() {
        let settings = RegistrySettings {
            abandoned_timeout: Duration::from_secs(5),
            ..RegistrySettings::default()
        };
        let (registry, mut reports) = registry(settings);
        let id = Uuid::new_v4();
        registry.ensure_match(id, GameMode::OneVsOne, Difficulty::Online);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(registry.get(&id).is_some());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.get(&id).is_none());
        assert_eq!(registry.active_matches(), 0);
        assert_eq!(reports.recv().await, Some(MatchReport::Abandoned { match_id: id }));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_every_match() {
        let (registry, _) = registry(RegistrySettings::default());
        for _ in 0..3 {
            registry.ensure_match(Uuid::new_v4(), GameMode::SinglePlayer, Difficulty::Brutal);
        }
        assert_eq!(registry.active_matches(), 3);
        registry.shutdown().await;
        assert_eq!(registry.active_matches(), 0);
    }
}
