//! Gradient-descent race state: teams, balls, per-tick stepping,
//! termination and final ranking.
//!
//! Every ball rolls down the shared loss surface with standard
//! momentum gradient descent, independently in x and z. Stepping is
//! pure with respect to the room: the scheduler calls [`tick`] under
//! the room lock and broadcasts whatever it returns.

use crate::scheduler::RaceTicker;
use log::info;
use rand::Rng;
use shared::surface;
use shared::{
    BallSnapshot, BallStatus, RacePhase, RaceResult, ServerEvent, TeamInfo, TrailPoint,
    CONVERGENCE_SPEED, ESCAPE_BOUND, HEIGHT_CEILING, MIN_TRAIL_FOR_CONVERGENCE, START_JITTER,
    START_RADIUS_MAX, START_RADIUS_MIN, TRAIL_CAP,
};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct RaceBall {
    pub team_id: String,
    pub team_name: String,
    pub color: String,
    pub x: f64,
    pub z: f64,
    /// Height on the surface at (x, z).
    pub y: f64,
    pub vx: f64,
    pub vz: f64,
    pub loss: f64,
    pub status: BallStatus,
    /// Hyperparameters frozen at race start.
    pub learning_rate: f64,
    pub momentum: f64,
    trail: VecDeque<TrailPoint>,
}

impl RaceBall {
    pub fn new(team: &TeamInfo, x: f64, z: f64) -> Self {
        let loss = surface::loss(x, z);
        let mut trail = VecDeque::with_capacity(TRAIL_CAP);
        trail.push_back(TrailPoint { x, z });

        Self {
            team_id: team.team_id.clone(),
            team_name: team.team_name.clone(),
            color: team.color.clone(),
            x,
            z,
            y: loss,
            vx: 0.0,
            vz: 0.0,
            loss,
            status: BallStatus::Racing,
            learning_rate: team.learning_rate,
            momentum: team.momentum,
            trail,
        }
    }

    pub fn speed(&self) -> f64 {
        (self.vx * self.vx + self.vz * self.vz).sqrt()
    }

    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }

    /// Advances the ball one tick. Returns the terminal status if the
    /// ball finished on this tick; a finished ball is left untouched.
    pub fn step(&mut self) -> Option<BallStatus> {
        if self.status != BallStatus::Racing {
            return None;
        }

        let (gx, gz) = surface::gradient(self.x, self.z);
        self.vx = self.momentum * self.vx - self.learning_rate * gx;
        self.vz = self.momentum * self.vz - self.learning_rate * gz;
        self.x += self.vx;
        self.z += self.vz;

        self.loss = surface::loss(self.x, self.z);
        self.y = self.loss;

        self.trail.push_back(TrailPoint {
            x: self.x,
            z: self.z,
        });
        if self.trail.len() > TRAIL_CAP {
            self.trail.pop_front();
        }

        // Escape is checked before convergence.
        if self.x.abs() > ESCAPE_BOUND || self.z.abs() > ESCAPE_BOUND || self.y > HEIGHT_CEILING {
            self.status = BallStatus::Escaped;
            return Some(BallStatus::Escaped);
        }

        if self.speed() < CONVERGENCE_SPEED && self.trail.len() >= MIN_TRAIL_FOR_CONVERGENCE {
            self.status = BallStatus::Converged;
            return Some(BallStatus::Converged);
        }

        None
    }

    pub fn snapshot(&self) -> BallSnapshot {
        BallSnapshot {
            team_id: self.team_id.clone(),
            team_name: self.team_name.clone(),
            color: self.color.clone(),
            x: self.x,
            y: self.y,
            z: self.z,
            vx: self.vx,
            vz: self.vz,
            loss: self.loss,
            status: self.status,
            learning_rate: self.learning_rate,
            momentum: self.momentum,
            trail: self.trail.iter().copied().collect(),
        }
    }
}

/// Per-room race sub-state.
pub struct RaceState {
    pub phase: RacePhase,
    pub teams: HashMap<String, TeamInfo>,
    pub balls: HashMap<String, RaceBall>,
    pub results: HashMap<String, RaceResult>,
    pub started_at: Option<u64>,
    pub ticker: RaceTicker,
}

impl RaceState {
    pub fn new() -> Self {
        Self {
            phase: RacePhase::Setup,
            teams: HashMap::new(),
            balls: HashMap::new(),
            results: HashMap::new(),
            started_at: None,
            ticker: RaceTicker::new(),
        }
    }

    /// Registers or replaces a team. Hyperparameters are clamped here
    /// so an out-of-range value is never stored.
    pub fn register_team(&mut self, mut team: TeamInfo) {
        team.learning_rate = shared::clamp_learning_rate(team.learning_rate);
        team.momentum = shared::clamp_momentum(team.momentum);
        self.teams.insert(team.team_id.clone(), team);
    }

    /// Places one ball per team in a shared random neighborhood: a
    /// random point on a ring around the surface center, with each
    /// ball jittered so starts are comparable but not identical.
    pub fn spawn_balls<R: Rng>(&mut self, rng: &mut R) {
        let angle = rng.gen::<f64>() * std::f64::consts::TAU;
        let radius = rng.gen_range(START_RADIUS_MIN..START_RADIUS_MAX);
        let base_x = angle.cos() * radius;
        let base_z = angle.sin() * radius;

        self.balls.clear();
        for team in self.teams.values() {
            let x = base_x + rng.gen_range(-START_JITTER..START_JITTER);
            let z = base_z + rng.gen_range(-START_JITTER..START_JITTER);
            self.balls
                .insert(team.team_id.clone(), RaceBall::new(team, x, z));
        }
    }

    /// Ball snapshots in a stable order for broadcasting.
    pub fn ball_snapshots(&self) -> Vec<BallSnapshot> {
        let mut snapshots: Vec<BallSnapshot> = self.balls.values().map(RaceBall::snapshot).collect();
        snapshots.sort_by(|a, b| a.team_id.cmp(&b.team_id));
        snapshots
    }

    /// Registered teams in a stable order for broadcasting.
    pub fn team_list(&self) -> Vec<TeamInfo> {
        let mut teams: Vec<TeamInfo> = self.teams.values().cloned().collect();
        teams.sort_by(|a, b| a.team_id.cmp(&b.team_id));
        teams
    }

    /// Returns the race to its pre-start shape. Registered teams are
    /// kept; balls, results and the start timestamp are dropped.
    pub fn clear_run(&mut self) {
        self.balls.clear();
        self.results.clear();
        self.started_at = None;
        self.phase = RacePhase::Setup;
    }

    /// Final standings: escaped results rank strictly below all
    /// converged results; within the same status, lower final loss
    /// ranks better. Ranks are 1-based.
    pub fn rankings(&self) -> Vec<RaceResult> {
        let mut results: Vec<RaceResult> = self.results.values().cloned().collect();
        results.sort_by(|a, b| {
            let status_order = |s: BallStatus| match s {
                BallStatus::Converged => 0,
                _ => 1,
            };
            status_order(a.status)
                .cmp(&status_order(b.status))
                .then(a.final_loss.total_cmp(&b.final_loss))
        });
        for (index, result) in results.iter_mut().enumerate() {
            result.rank = index + 1;
        }
        results
    }
}

impl Default for RaceState {
    fn default() -> Self {
        Self::new()
    }
}

/// What one tick produced beyond the ball snapshots.
pub struct TickOutcome {
    /// One-off alerts for balls that escaped on this tick.
    pub alerts: Vec<ServerEvent>,
    /// True once every team has a result or no ball is still racing.
    pub finished: bool,
}

/// Advances every still-racing ball by one tick, records results for
/// balls that finished, and decides whether the race is over. Sets
/// the phase to finished when it is.
pub fn tick(race: &mut RaceState, now_ms: u64) -> TickOutcome {
    let started_at = race.started_at.unwrap_or(now_ms);
    let mut alerts = Vec::new();

    let mut team_ids: Vec<String> = race.balls.keys().cloned().collect();
    team_ids.sort();

    for team_id in team_ids {
        let Some(ball) = race.balls.get_mut(&team_id) else {
            continue;
        };
        let Some(terminal) = ball.step() else {
            continue;
        };

        race.results.insert(
            team_id.clone(),
            RaceResult {
                team_id: ball.team_id.clone(),
                team_name: ball.team_name.clone(),
                final_loss: ball.loss,
                status: terminal,
                elapsed_ms: now_ms.saturating_sub(started_at),
                rank: 0,
            },
        );

        if terminal == BallStatus::Escaped {
            info!("team {} escaped the surface", ball.team_name);
            alerts.push(ServerEvent::RaceAlert {
                team_id: ball.team_id.clone(),
                team_name: ball.team_name.clone(),
                message: format!(
                    "{} flew off the surface! The learning rate is likely too large.",
                    ball.team_name
                ),
            });
        }
    }

    let all_reported = !race.teams.is_empty() && race.results.len() >= race.teams.len();
    let none_racing = race
        .balls
        .values()
        .all(|ball| ball.status != BallStatus::Racing);
    let finished = all_reported || none_racing;

    if finished {
        race.phase = RacePhase::Finished;
    }

    TickOutcome { alerts, finished }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn team(id: &str, lr: f64, momentum: f64) -> TeamInfo {
        TeamInfo {
            team_id: id.to_string(),
            team_name: format!("Team {}", id),
            color: "#4f8ef7".to_string(),
            learning_rate: lr,
            momentum,
            owner: 1,
        }
    }

    fn run_until_finished(race: &mut RaceState, max_ticks: usize) -> usize {
        for n in 0..max_ticks {
            if tick(race, 1_000 + n as u64 * 33).finished {
                return n + 1;
            }
        }
        max_ticks
    }

    #[test]
    fn test_register_team_clamps_params() {
        let mut race = RaceState::new();
        race.register_team(team("a", 100.0, -1.0));
        let stored = &race.teams["a"];
        assert_eq!(stored.learning_rate, shared::LR_MAX);
        assert_eq!(stored.momentum, shared::MOMENTUM_MIN);

        race.register_team(team("b", 0.0005, 1.5));
        let stored = &race.teams["b"];
        assert_eq!(stored.learning_rate, shared::LR_MIN);
        assert_eq!(stored.momentum, shared::MOMENTUM_MAX);
    }

    #[test]
    fn test_ball_starts_at_rest_on_surface() {
        let ball = RaceBall::new(&team("a", 0.1, 0.9), 1.0, -2.0);
        assert_eq!(ball.vx, 0.0);
        assert_eq!(ball.vz, 0.0);
        assert_approx_eq!(ball.y, surface::loss(1.0, -2.0), 1e-12);
        assert_eq!(ball.status, BallStatus::Racing);
    }

    #[test]
    fn test_terminal_status_is_monotonic() {
        let mut ball = RaceBall::new(&team("a", 0.1, 0.9), 0.0, 2.0);
        ball.status = BallStatus::Escaped;
        let (x, z) = (ball.x, ball.z);

        for _ in 0..10 {
            assert_eq!(ball.step(), None);
        }
        assert_eq!(ball.status, BallStatus::Escaped);
        assert_eq!((ball.x, ball.z), (x, z));
    }

    #[test]
    fn test_trail_is_a_sliding_window() {
        let mut ball = RaceBall::new(&team("a", 0.05, 0.9), 0.5, 1.5);
        for _ in 0..(TRAIL_CAP * 3) {
            ball.step();
            if ball.status != BallStatus::Racing {
                break;
            }
        }
        assert!(ball.trail_len() <= TRAIL_CAP);
    }

    #[test]
    fn test_no_convergence_from_standing_start() {
        // Fresh ball in a flat region: speed is already tiny, but the
        // trail is too short to declare convergence.
        let mut ball = RaceBall::new(&team("a", 0.001, 0.0), 4.9, 4.9);
        let outcome = ball.step();
        assert_eq!(outcome, None);
        assert_eq!(ball.status, BallStatus::Racing);
    }

    #[test]
    fn test_small_learning_rate_converges_in_global_basin() {
        let mut ball = RaceBall::new(&team("a", 0.05, 0.9), 0.5, 1.5);
        let mut converged_after = None;
        for n in 0..5_000 {
            if ball.step() == Some(BallStatus::Converged) {
                converged_after = Some(n);
                break;
            }
        }
        let converged_after = converged_after.expect("ball should converge");
        assert!(converged_after + 2 >= MIN_TRAIL_FOR_CONVERGENCE);

        // It should have settled near the global minimum.
        let (cx, cz) = surface::global_minimum_center();
        assert!((ball.x - cx).abs() < 1.0);
        assert!((ball.z - cz).abs() < 1.0);
    }

    #[test]
    fn test_large_learning_rate_escapes_before_moderate_finishes() {
        // Regression guard: a large learning rate must diverge, not
        // converge faster than a moderate one.
        let mut hot = RaceBall::new(&team("hot", 1.5, 0.9), 0.5, 1.5);
        let mut cool = RaceBall::new(&team("cool", 0.05, 0.9), 0.5, 1.5);

        let mut hot_escaped_at = None;
        for n in 0..2_000 {
            if hot.step() == Some(BallStatus::Escaped) {
                hot_escaped_at = Some(n);
                break;
            }
        }
        assert!(hot_escaped_at.is_some(), "lr 1.5 must escape");

        for _ in 0..2_000 {
            cool.step();
        }
        assert_ne!(cool.status, BallStatus::Escaped, "lr 0.05 must not escape");
    }

    #[test]
    fn test_tick_records_results_and_finishes() {
        let mut race = RaceState::new();
        race.register_team(team("hot", 1.5, 0.9));
        race.register_team(team("cool", 0.05, 0.9));
        race.balls.insert(
            "hot".to_string(),
            RaceBall::new(&race.teams["hot"], 0.5, 1.5),
        );
        race.balls.insert(
            "cool".to_string(),
            RaceBall::new(&race.teams["cool"], 0.4, 1.6),
        );
        race.started_at = Some(1_000);
        race.phase = RacePhase::Racing;

        let ticks = run_until_finished(&mut race, 5_000);
        assert!(ticks < 5_000, "race should finish");
        assert_eq!(race.phase, RacePhase::Finished);
        assert_eq!(race.results.len(), 2);

        let rankings = race.rankings();
        assert_eq!(rankings.len(), 2);
        assert_eq!(rankings[0].rank, 1);
        assert_eq!(rankings[1].rank, 2);
        // The escaped team must rank below the converged one.
        assert_eq!(rankings[0].team_id, "cool");
        assert_eq!(rankings[0].status, BallStatus::Converged);
        assert_eq!(rankings[1].team_id, "hot");
        assert_eq!(rankings[1].status, BallStatus::Escaped);
    }

    #[test]
    fn test_escape_emits_one_alert() {
        let mut race = RaceState::new();
        race.register_team(team("hot", 1.5, 0.9));
        race.balls.insert(
            "hot".to_string(),
            RaceBall::new(&race.teams["hot"], 0.5, 1.5),
        );
        race.started_at = Some(0);
        race.phase = RacePhase::Racing;

        let mut alerts = 0;
        for n in 0..2_000 {
            let outcome = tick(&mut race, n * 33);
            alerts += outcome.alerts.len();
            if outcome.finished {
                break;
            }
        }
        assert_eq!(alerts, 1);
    }

    #[test]
    fn test_rankings_sort_by_loss_within_status() {
        let mut race = RaceState::new();
        for (id, loss) in [("a", 1.2), ("b", 0.6), ("c", 0.9)] {
            race.results.insert(
                id.to_string(),
                RaceResult {
                    team_id: id.to_string(),
                    team_name: id.to_string(),
                    final_loss: loss,
                    status: BallStatus::Converged,
                    elapsed_ms: 0,
                    rank: 0,
                },
            );
        }
        let rankings = race.rankings();
        let order: Vec<&str> = rankings.iter().map(|r| r.team_id.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_clear_run_restores_pre_start_shape() {
        let mut race = RaceState::new();
        race.register_team(team("a", 0.1, 0.9));
        let mut rng = rand::thread_rng();
        race.spawn_balls(&mut rng);
        race.phase = RacePhase::Racing;
        race.started_at = Some(123);
        tick(&mut race, 456);

        race.clear_run();
        assert_eq!(race.phase, RacePhase::Setup);
        assert!(race.balls.is_empty());
        assert!(race.results.is_empty());
        assert!(race.started_at.is_none());
        // Teams survive a reset.
        assert_eq!(race.teams.len(), 1);
    }

    #[test]
    fn test_spawn_balls_share_a_neighborhood() {
        let mut race = RaceState::new();
        race.register_team(team("a", 0.1, 0.9));
        race.register_team(team("b", 0.1, 0.9));
        let mut rng = rand::thread_rng();
        race.spawn_balls(&mut rng);

        let a = &race.balls["a"];
        let b = &race.balls["b"];
        let dist = ((a.x - b.x).powi(2) + (a.z - b.z).powi(2)).sqrt();
        assert!(dist <= 2.0 * START_JITTER * std::f64::consts::SQRT_2 + 1e-9);

        for ball in race.balls.values() {
            let radius = (ball.x * ball.x + ball.z * ball.z).sqrt();
            assert!(radius > START_RADIUS_MIN - 2.0 * START_JITTER);
            assert!(radius < START_RADIUS_MAX + 2.0 * START_JITTER);
        }
    }
}
