use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod surface;

/// Simulation tick period for the race loop (~30 updates/sec).
pub const TICK_MS: u64 = 33;

pub const LR_MIN: f64 = 0.001;
pub const LR_MAX: f64 = 2.0;
pub const MOMENTUM_MIN: f64 = 0.0;
pub const MOMENTUM_MAX: f64 = 0.99;
pub const DEFAULT_LR: f64 = 0.1;
pub const DEFAULT_MOMENTUM: f64 = 0.9;

/// A ball escapes once |x| or |z| passes this bound.
pub const ESCAPE_BOUND: f64 = 6.0;
/// A ball also escapes once its height passes this ceiling.
pub const HEIGHT_CEILING: f64 = 8.0;
/// Speed magnitude below which a ball counts as converged.
pub const CONVERGENCE_SPEED: f64 = 0.01;
/// Minimum trail samples before convergence may be declared,
/// so a standing start is not mistaken for a finish.
pub const MIN_TRAIL_FOR_CONVERGENCE: usize = 30;
/// Sliding-window cap on a ball's trail history.
pub const TRAIL_CAP: usize = 50;

/// Start neighborhood: a random point on a ring around the surface
/// center, with per-ball jitter on top.
pub const START_RADIUS_MIN: f64 = 2.5;
pub const START_RADIUS_MAX: f64 = 3.5;
pub const START_JITTER: f64 = 0.3;

pub const DEFAULT_QUIZ_TIME_LIMIT: u64 = 10;

/// Display colors assigned to students round-robin by connection id.
pub const STUDENT_COLORS: [&str; 8] = [
    "#4f8ef7", "#f75f4f", "#4ff78e", "#b44ff7", "#f7a04f", "#4ff0f7", "#f74fd0", "#e8f74f",
];

/// Unique identifier of a live connection, assigned by the server.
pub type ConnId = u64;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RacePhase {
    Setup,
    Racing,
    Finished,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BallStatus {
    Racing,
    Converged,
    Escaped,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuizType {
    /// Binary O/X question.
    Ox,
    /// Multiple-choice question.
    Choice,
}

/// Snapshot of one student session as seen by clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub id: ConnId,
    pub name: String,
    pub school_code: String,
    pub joined_at: u64,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_position: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "sliderValue_Q", skip_serializing_if = "Option::is_none")]
    pub slider_value_q: Option<f64>,
    #[serde(rename = "sliderValue_K", skip_serializing_if = "Option::is_none")]
    pub slider_value_k: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention_weights: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_word: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_count: Option<u32>,
}

/// A registered race team with clamped hyperparameters.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeamInfo {
    pub team_id: String,
    pub team_name: String,
    pub color: String,
    pub learning_rate: f64,
    pub momentum: f64,
    pub owner: ConnId,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct TrailPoint {
    pub x: f64,
    pub z: f64,
}

/// Per-tick state of one ball, broadcast to every room member.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BallSnapshot {
    pub team_id: String,
    pub team_name: String,
    pub color: String,
    pub x: f64,
    /// Height on the surface, i.e. `loss(x, z)`.
    pub y: f64,
    pub z: f64,
    pub vx: f64,
    pub vz: f64,
    pub loss: f64,
    pub status: BallStatus,
    pub learning_rate: f64,
    pub momentum: f64,
    pub trail: Vec<TrailPoint>,
}

/// Final standing of one team after the race concludes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
    pub team_id: String,
    pub team_name: String,
    pub final_loss: f64,
    pub status: BallStatus,
    pub elapsed_ms: u64,
    pub rank: usize,
}

/// Fastest correct responder of a quiz round.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FastestAnswer {
    pub student_id: ConnId,
    pub student_name: String,
    pub time_ms: u64,
}

/// Events received from clients over the per-connection channel.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinClass {
        student_name: String,
        #[serde(default)]
        school_code: String,
        room_code: String,
    },
    JoinDashboard {
        room_code: String,
        password: String,
    },
    RegisterWord {
        word: String,
    },
    UpdateWordPosition {
        position: Vec3,
    },
    UpdateAttentionSlider {
        #[serde(default)]
        role: Option<String>,
        #[serde(rename = "sliderValue_Q", default)]
        slider_value_q: Option<f64>,
        #[serde(rename = "sliderValue_K", default)]
        slider_value_k: Option<f64>,
        #[serde(default)]
        attention_weights: Option<Vec<f64>>,
        #[serde(default)]
        selected_word: Option<String>,
        #[serde(default)]
        sentence_name: Option<String>,
        #[serde(default)]
        head_count: Option<u32>,
    },
    SetRaceParams {
        #[serde(default)]
        team_id: Option<String>,
        #[serde(default)]
        team_name: Option<String>,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        learning_rate: Option<f64>,
        #[serde(default)]
        momentum: Option<f64>,
    },
    StartRace {},
    ResetRace {},
    SendQuiz {
        question: String,
        #[serde(rename = "type", default)]
        quiz_type: Option<QuizType>,
        #[serde(default)]
        options: Option<Vec<String>>,
        correct_answer: String,
        #[serde(default)]
        time_limit: Option<u64>,
    },
    SubmitQuizAnswer {
        answer: String,
    },
    RevealQuizResults {},
    CancelQuiz {},
    TeacherCommand {
        command: String,
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
}

/// Events emitted to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    RoomState {
        students: Vec<StudentInfo>,
        room_code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        race_teams: Option<Vec<TeamInfo>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        race_phase: Option<RacePhase>,
        #[serde(skip_serializing_if = "Option::is_none")]
        race_balls: Option<Vec<BallSnapshot>>,
    },
    StudentJoined {
        student: StudentInfo,
        total_count: usize,
    },
    StudentLeft {
        student_id: ConnId,
        student_name: String,
        total_count: usize,
    },
    RoomUpdate {
        student_count: usize,
        students: Vec<StudentInfo>,
    },
    WordRegistered {
        student_id: ConnId,
        student_name: String,
        word: String,
        position: Vec3,
        color: String,
    },
    WordMoved {
        student_id: ConnId,
        student_name: String,
        word: String,
        position: Vec3,
        color: String,
    },
    AttentionUpdated {
        student_id: ConnId,
        student_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(rename = "sliderValue_Q", skip_serializing_if = "Option::is_none")]
        slider_value_q: Option<f64>,
        #[serde(rename = "sliderValue_K", skip_serializing_if = "Option::is_none")]
        slider_value_k: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        attention_weights: Option<Vec<f64>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        selected_word: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sentence_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        head_count: Option<u32>,
    },
    RaceTeamsUpdated {
        teams: Vec<TeamInfo>,
    },
    RaceStarted {
        balls: Vec<BallSnapshot>,
        start_time: u64,
    },
    RaceTick {
        balls: Vec<BallSnapshot>,
    },
    RaceAlert {
        team_id: String,
        team_name: String,
        message: String,
    },
    RaceFinished {
        results: Vec<RaceResult>,
    },
    RaceReset {},
    QuizBroadcast {
        id: u64,
        question: String,
        #[serde(rename = "type")]
        quiz_type: QuizType,
        options: Vec<String>,
        correct_answer: String,
        time_limit: u64,
        created_at: u64,
    },
    QuizAnswerReceived {
        student_id: ConnId,
        student_name: String,
        total_answered: usize,
        total_students: usize,
    },
    QuizResults {
        quiz_id: u64,
        question: String,
        correct_answer: String,
        tally: HashMap<String, usize>,
        total_answered: usize,
        total_students: usize,
        correct_count: usize,
        correct_rate: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        fastest: Option<FastestAnswer>,
    },
    QuizCancelled {},
    AuthError {
        message: String,
    },
    TeacherCommand {
        command: String,
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
}

/// Clamps a registered learning rate into the valid range.
pub fn clamp_learning_rate(lr: f64) -> f64 {
    lr.clamp(LR_MIN, LR_MAX)
}

/// Clamps a registered momentum coefficient into the valid range.
pub fn clamp_momentum(momentum: f64) -> f64 {
    momentum.clamp(MOMENTUM_MIN, MOMENTUM_MAX)
}
