//! Per-connection protocol handling: role binding, room mutations and
//! broadcast decisions.
//!
//! A connection starts unbound and becomes either a student or the
//! room's teacher, never both. Handlers treat "no bound room" and "no
//! matching session" as silent no-ops: duplicate or out-of-order
//! client messages (a slider update arriving just after a disconnect,
//! for example) are expected and must never crash the handler or leak
//! an error to an unrelated connection. The one deliberate exception
//! is `teacher_command`, which answers an unauthorized caller with an
//! explicit auth_error.

use crate::broadcast::{self, Outbound};
use crate::quiz::{self, Quiz, QuizAnswer};
use crate::race;
use crate::rooms::{RoomStore, StudentSession};
use crate::utils::{color_for, get_timestamp};
use log::{debug, info};
use shared::{
    ClientEvent, ConnId, QuizType, RacePhase, ServerEvent, TeamInfo, Vec3, DEFAULT_LR,
    DEFAULT_MOMENTUM, TICK_MS,
};
use std::sync::Arc;
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unbound,
    Student,
    Teacher,
}

/// Connection-local state, owned by the transport task.
pub struct Conn {
    pub id: ConnId,
    pub room: Option<String>,
    pub role: Role,
}

impl Conn {
    pub fn new(id: ConnId) -> Self {
        Self {
            id,
            room: None,
            role: Role::Unbound,
        }
    }
}

/// Dispatches one inbound client event against the room store.
pub async fn handle_event(
    store: &RoomStore,
    teacher_secret: &str,
    conn: &mut Conn,
    sender: &Outbound,
    event: ClientEvent,
) {
    match event {
        ClientEvent::JoinClass {
            student_name,
            school_code,
            room_code,
        } => join_class(store, conn, sender, student_name, school_code, room_code).await,
        ClientEvent::JoinDashboard {
            room_code,
            password,
        } => join_dashboard(store, teacher_secret, conn, sender, room_code, password).await,
        ClientEvent::RegisterWord { word } => register_word(store, conn, word).await,
        ClientEvent::UpdateWordPosition { position } => {
            update_word_position(store, conn, position).await
        }
        ClientEvent::UpdateAttentionSlider {
            role,
            slider_value_q,
            slider_value_k,
            attention_weights,
            selected_word,
            sentence_name,
            head_count,
        } => {
            update_attention_slider(
                store,
                conn,
                role,
                slider_value_q,
                slider_value_k,
                attention_weights,
                selected_word,
                sentence_name,
                head_count,
            )
            .await
        }
        ClientEvent::SetRaceParams {
            team_id,
            team_name,
            color,
            learning_rate,
            momentum,
        } => set_race_params(store, conn, team_id, team_name, color, learning_rate, momentum).await,
        ClientEvent::StartRace {} => start_race(store, conn).await,
        ClientEvent::ResetRace {} => reset_race(store, conn).await,
        ClientEvent::SendQuiz {
            question,
            quiz_type,
            options,
            correct_answer,
            time_limit,
        } => send_quiz(store, conn, question, quiz_type, options, correct_answer, time_limit).await,
        ClientEvent::SubmitQuizAnswer { answer } => submit_quiz_answer(store, conn, answer).await,
        ClientEvent::RevealQuizResults {} => reveal_quiz_results(store, conn).await,
        ClientEvent::CancelQuiz {} => cancel_quiz(store, conn).await,
        ClientEvent::TeacherCommand { command, extra } => {
            teacher_command(store, conn, command, extra).await
        }
    }
}

async fn join_class(
    store: &RoomStore,
    conn: &mut Conn,
    sender: &Outbound,
    student_name: String,
    school_code: String,
    room_code: String,
) {
    if conn.room.is_some() {
        return;
    }

    let room_arc = store.get_or_create(&room_code).await;
    let mut room = room_arc.lock().await;

    let session = StudentSession::new(
        conn.id,
        student_name,
        school_code,
        color_for(conn.id),
        get_timestamp(),
    );
    let student = session.info();
    room.students.insert(conn.id, session);
    room.senders.insert(conn.id, sender.clone());
    conn.room = Some(room_code);
    conn.role = Role::Student;
    info!(
        "student {} ({}) joined room {}",
        student.name, conn.id, room.code
    );

    let students = room.student_infos();
    let total_count = room.students.len();

    // Full snapshot to the joiner, incremental notice to the rest.
    broadcast::send_to(
        &room,
        conn.id,
        &ServerEvent::RoomState {
            students: students.clone(),
            room_code: room.code.clone(),
            race_teams: None,
            race_phase: None,
            race_balls: None,
        },
    );
    broadcast::broadcast_except(
        &room,
        conn.id,
        &ServerEvent::StudentJoined {
            student,
            total_count,
        },
    );
    broadcast::broadcast(
        &room,
        &ServerEvent::RoomUpdate {
            student_count: total_count,
            students,
        },
    );
}

async fn join_dashboard(
    store: &RoomStore,
    teacher_secret: &str,
    conn: &mut Conn,
    sender: &Outbound,
    room_code: String,
    password: String,
) {
    if password != teacher_secret {
        let _ = sender.send(ServerEvent::AuthError {
            message: "Invalid teacher password".to_string(),
        });
        return;
    }
    if conn.room.is_some() {
        return;
    }

    let room_arc = store.get_or_create(&room_code).await;
    let mut room = room_arc.lock().await;

    if let Some(previous) = room.teacher.replace(conn.id) {
        if previous != conn.id {
            info!(
                "teacher binding for room {} moved from {} to {}",
                room.code, previous, conn.id
            );
        }
    } else {
        info!("teacher {} bound to room {}", conn.id, room.code);
    }
    room.senders.insert(conn.id, sender.clone());
    conn.room = Some(room_code);
    conn.role = Role::Teacher;

    let snapshot = ServerEvent::RoomState {
        students: room.student_infos(),
        room_code: room.code.clone(),
        race_teams: Some(room.race.team_list()),
        race_phase: Some(room.race.phase),
        race_balls: Some(room.race.ball_snapshots()),
    };
    broadcast::send_to(&room, conn.id, &snapshot);
}

async fn register_word(store: &RoomStore, conn: &Conn, word: String) {
    let Some(room_arc) = bound_room(store, conn).await else {
        return;
    };
    let mut room = room_arc.lock().await;

    let Some(session) = room.students.get_mut(&conn.id) else {
        return;
    };
    session.word = Some(word.clone());
    let position = session.word_position.unwrap_or_default();
    let student_name = session.name.clone();
    let color = session.color.clone();

    // Registration echoes back to the sender as well.
    broadcast::broadcast(
        &room,
        &ServerEvent::WordRegistered {
            student_id: conn.id,
            student_name,
            word,
            position,
            color,
        },
    );
}

async fn update_word_position(store: &RoomStore, conn: &Conn, position: Vec3) {
    let Some(room_arc) = bound_room(store, conn).await else {
        return;
    };
    let mut room = room_arc.lock().await;

    let Some(session) = room.students.get_mut(&conn.id) else {
        return;
    };
    let Some(word) = session.word.clone() else {
        return;
    };
    session.word_position = Some(position);
    let student_name = session.name.clone();
    let color = session.color.clone();

    // Not echoed to the sender, to avoid position jitter.
    broadcast::broadcast_except(
        &room,
        conn.id,
        &ServerEvent::WordMoved {
            student_id: conn.id,
            student_name,
            word,
            position,
            color,
        },
    );
}

#[allow(clippy::too_many_arguments)]
async fn update_attention_slider(
    store: &RoomStore,
    conn: &Conn,
    role: Option<String>,
    slider_value_q: Option<f64>,
    slider_value_k: Option<f64>,
    attention_weights: Option<Vec<f64>>,
    selected_word: Option<String>,
    sentence_name: Option<String>,
    head_count: Option<u32>,
) {
    let Some(room_arc) = bound_room(store, conn).await else {
        return;
    };
    let mut room = room_arc.lock().await;

    let Some(session) = room.students.get_mut(&conn.id) else {
        return;
    };

    // Merge only the provided fields; an omitted field keeps its
    // previous value.
    if let Some(value) = role {
        session.role = Some(value);
    }
    if let Some(value) = slider_value_q {
        session.slider_value_q = Some(value);
    }
    if let Some(value) = slider_value_k {
        session.slider_value_k = Some(value);
    }
    if let Some(value) = attention_weights {
        session.attention_weights = Some(value);
    }
    if let Some(value) = selected_word {
        session.selected_word = Some(value);
    }
    if let Some(value) = sentence_name {
        session.sentence_name = Some(value);
    }
    if let Some(value) = head_count {
        session.head_count = Some(value);
    }

    let merged = ServerEvent::AttentionUpdated {
        student_id: conn.id,
        student_name: session.name.clone(),
        role: session.role.clone(),
        slider_value_q: session.slider_value_q,
        slider_value_k: session.slider_value_k,
        attention_weights: session.attention_weights.clone(),
        selected_word: session.selected_word.clone(),
        sentence_name: session.sentence_name.clone(),
        head_count: session.head_count,
    };
    broadcast::broadcast(&room, &merged);
}

/// Deliberately open to any bound connection, not just the teacher:
/// students configure their own team before the teacher starts the
/// race.
async fn set_race_params(
    store: &RoomStore,
    conn: &Conn,
    team_id: Option<String>,
    team_name: Option<String>,
    color: Option<String>,
    learning_rate: Option<f64>,
    momentum: Option<f64>,
) {
    if conn.role == Role::Unbound {
        return;
    }
    let Some(room_arc) = bound_room(store, conn).await else {
        return;
    };
    let mut room = room_arc.lock().await;

    let (default_name, default_color) = match room.students.get(&conn.id) {
        Some(session) => (session.name.clone(), session.color.clone()),
        None => (format!("Team {}", conn.id), color_for(conn.id)),
    };

    room.race.register_team(TeamInfo {
        team_id: team_id.unwrap_or_else(|| format!("team-{}", conn.id)),
        team_name: team_name.unwrap_or(default_name),
        color: color.unwrap_or(default_color),
        learning_rate: learning_rate.unwrap_or(DEFAULT_LR),
        momentum: momentum.unwrap_or(DEFAULT_MOMENTUM),
        owner: conn.id,
    });

    broadcast::broadcast(
        &room,
        &ServerEvent::RaceTeamsUpdated {
            teams: room.race.team_list(),
        },
    );
}

async fn start_race(store: &RoomStore, conn: &Conn) {
    let Some(room_arc) = bound_room(store, conn).await else {
        return;
    };
    let mut room = room_arc.lock().await;

    if !room.authorizes(conn.id) {
        return;
    }
    if room.race.teams.is_empty() {
        return;
    }

    // At most one live scheduler per room.
    room.race.ticker.cancel();
    room.race.results.clear();
    {
        let mut rng = rand::thread_rng();
        room.race.spawn_balls(&mut rng);
    }
    room.race.phase = RacePhase::Racing;
    let start_time = get_timestamp();
    room.race.started_at = Some(start_time);
    info!(
        "race started in room {} with {} teams",
        room.code,
        room.race.teams.len()
    );

    broadcast::broadcast(
        &room,
        &ServerEvent::RaceStarted {
            balls: room.race.ball_snapshots(),
            start_time,
        },
    );

    let tick_room = Arc::clone(&room_arc);
    let mut tick_count: u64 = 0;
    room.race
        .ticker
        .start(Duration::from_millis(TICK_MS), move || {
            let room = Arc::clone(&tick_room);
            tick_count += 1;
            let tick_count = tick_count;
            async move {
                let mut room = room.lock().await;
                let outcome = race::tick(&mut room.race, get_timestamp());

                for alert in &outcome.alerts {
                    broadcast::broadcast(&room, alert);
                }
                broadcast::broadcast(
                    &room,
                    &ServerEvent::RaceTick {
                        balls: room.race.ball_snapshots(),
                    },
                );
                if tick_count % 90 == 0 {
                    debug!("room {}: race tick {}", room.code, tick_count);
                }

                if outcome.finished {
                    info!("race finished in room {}", room.code);
                    broadcast::broadcast(
                        &room,
                        &ServerEvent::RaceFinished {
                            results: room.race.rankings(),
                        },
                    );
                    return false;
                }
                true
            }
        });
}

async fn reset_race(store: &RoomStore, conn: &Conn) {
    let Some(room_arc) = bound_room(store, conn).await else {
        return;
    };
    let mut room = room_arc.lock().await;

    if !room.authorizes(conn.id) {
        return;
    }

    room.race.ticker.cancel();
    room.race.clear_run();
    broadcast::broadcast(&room, &ServerEvent::RaceReset {});
}

async fn send_quiz(
    store: &RoomStore,
    conn: &Conn,
    question: String,
    quiz_type: Option<QuizType>,
    options: Option<Vec<String>>,
    correct_answer: String,
    time_limit: Option<u64>,
) {
    let Some(room_arc) = bound_room(store, conn).await else {
        return;
    };
    let mut room = room_arc.lock().await;

    if !room.authorizes(conn.id) {
        return;
    }

    let quiz = Quiz::new(
        question,
        quiz_type,
        options,
        correct_answer,
        time_limit,
        get_timestamp(),
    );
    let event = quiz.broadcast_event();

    // Installing a new quiz and clearing old answers is one step.
    room.quiz = Some(quiz);
    room.quiz_answers.clear();
    broadcast::broadcast(&room, &event);
}

async fn submit_quiz_answer(store: &RoomStore, conn: &Conn, answer: String) {
    let Some(room_arc) = bound_room(store, conn).await else {
        return;
    };
    let mut guard = room_arc.lock().await;
    let room = &mut *guard;

    let Some(quiz) = &room.quiz else {
        return;
    };
    let Some(session) = room.students.get(&conn.id) else {
        return;
    };

    let student_name = session.name.clone();
    // Last write wins for repeated submissions from one connection.
    room.quiz_answers.insert(
        conn.id,
        QuizAnswer {
            student_name: student_name.clone(),
            answer,
            elapsed_ms: get_timestamp().saturating_sub(quiz.created_at),
        },
    );

    broadcast::send_to_teacher(
        room,
        &ServerEvent::QuizAnswerReceived {
            student_id: conn.id,
            student_name,
            total_answered: room.quiz_answers.len(),
            total_students: room.students.len(),
        },
    );
}

async fn reveal_quiz_results(store: &RoomStore, conn: &Conn) {
    let Some(room_arc) = bound_room(store, conn).await else {
        return;
    };
    let mut guard = room_arc.lock().await;
    let room = &mut *guard;

    if !room.authorizes(conn.id) {
        return;
    }
    let Some(quiz) = room.quiz.take() else {
        return;
    };

    let results = quiz::reveal(&quiz, &room.quiz_answers, room.students.len());
    room.quiz_answers.clear();
    broadcast::broadcast(room, &results);
}

async fn cancel_quiz(store: &RoomStore, conn: &Conn) {
    let Some(room_arc) = bound_room(store, conn).await else {
        return;
    };
    let mut room = room_arc.lock().await;

    if !room.authorizes(conn.id) {
        return;
    }
    if room.quiz.take().is_none() {
        return;
    }

    room.quiz_answers.clear();
    broadcast::broadcast(&room, &ServerEvent::QuizCancelled {});
}

async fn teacher_command(
    store: &RoomStore,
    conn: &Conn,
    command: String,
    extra: serde_json::Map<String, serde_json::Value>,
) {
    let Some(room_arc) = bound_room(store, conn).await else {
        return;
    };
    let room = room_arc.lock().await;

    // Unlike the other teacher-gated commands, this one answers an
    // unauthorized caller explicitly.
    if !room.authorizes(conn.id) {
        broadcast::send_to(
            &room,
            conn.id,
            &ServerEvent::AuthError {
                message: "Not authorized: teacher commands require the dashboard".to_string(),
            },
        );
        return;
    }

    broadcast::broadcast(&room, &ServerEvent::TeacherCommand { command, extra });
}

/// Tears down a closed connection: membership, teacher binding and
/// any race loop the teacher was responsible for.
pub async fn handle_disconnect(store: &RoomStore, conn: &mut Conn) {
    let Some(room_code) = conn.room.take() else {
        conn.role = Role::Unbound;
        return;
    };

    if let Some(room_arc) = store.get(&room_code).await {
        let mut guard = room_arc.lock().await;
        let room = &mut *guard;

        room.senders.remove(&conn.id);

        if let Some(session) = room.students.remove(&conn.id) {
            let total_count = room.students.len();
            info!(
                "student {} ({}) left room {}",
                session.name, conn.id, room_code
            );
            broadcast::broadcast(
                room,
                &ServerEvent::StudentLeft {
                    student_id: conn.id,
                    student_name: session.name,
                    total_count,
                },
            );
            broadcast::broadcast(
                room,
                &ServerEvent::RoomUpdate {
                    student_count: total_count,
                    students: room.student_infos(),
                },
            );
        }

        if room.teacher == Some(conn.id) {
            room.teacher = None;
            // Only the teacher may restart a race, so their departure
            // also stops the running loop.
            room.race.ticker.cancel();
            info!("teacher {} left room {}", conn.id, room_code);
        }
    }

    store.delete_if_empty(&room_code).await;
    conn.role = Role::Unbound;
}

async fn bound_room(
    store: &RoomStore,
    conn: &Conn,
) -> Option<Arc<tokio::sync::Mutex<crate::rooms::Room>>> {
    let room_code = conn.room.as_deref()?;
    store.get(room_code).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    const SECRET: &str = "hunter2";

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn join_student(
        store: &RoomStore,
        name: &str,
        room_code: &str,
    ) -> (Conn, UnboundedReceiver<ServerEvent>) {
        let mut conn = Conn::new(store.next_conn_id());
        let (tx, rx) = unbounded_channel();
        handle_event(
            store,
            SECRET,
            &mut conn,
            &tx,
            ClientEvent::JoinClass {
                student_name: name.to_string(),
                school_code: "S01".to_string(),
                room_code: room_code.to_string(),
            },
        )
        .await;
        (conn, rx)
    }

    async fn join_teacher(
        store: &RoomStore,
        room_code: &str,
        password: &str,
    ) -> (Conn, UnboundedReceiver<ServerEvent>) {
        let mut conn = Conn::new(store.next_conn_id());
        let (tx, rx) = unbounded_channel();
        handle_event(
            store,
            SECRET,
            &mut conn,
            &tx,
            ClientEvent::JoinDashboard {
                room_code: room_code.to_string(),
                password: password.to_string(),
            },
        )
        .await;
        (conn, rx)
    }

    #[tokio::test]
    async fn test_join_class_binds_and_snapshots() {
        let store = RoomStore::new();
        let (conn, mut rx) = join_student(&store, "Ana", "ABC").await;

        assert_eq!(conn.role, Role::Student);
        assert_eq!(conn.room.as_deref(), Some("ABC"));

        let events = drain(&mut rx);
        match &events[0] {
            ServerEvent::RoomState {
                students, room_code, ..
            } => {
                assert_eq!(room_code, "ABC");
                assert_eq!(students.len(), 1);
                assert_eq!(students[0].name, "Ana");
            }
            other => panic!("expected room_state first, got {:?}", other),
        }
        // Joiner gets the room_update but not its own student_joined.
        assert!(events
            .iter()
            .all(|e| !matches!(e, ServerEvent::StudentJoined { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::RoomUpdate { student_count: 1, .. })));
    }

    #[tokio::test]
    async fn test_second_join_notifies_first() {
        let store = RoomStore::new();
        let (_a, mut rx_a) = join_student(&store, "Ana", "ABC").await;
        drain(&mut rx_a);

        let (_b, mut rx_b) = join_student(&store, "Ben", "ABC").await;

        let events_a = drain(&mut rx_a);
        assert!(events_a.iter().any(|e| matches!(
            e,
            ServerEvent::StudentJoined { total_count: 2, .. }
        )));
        assert!(events_a.iter().any(|e| matches!(
            e,
            ServerEvent::RoomUpdate { student_count: 2, .. }
        )));

        let events_b = drain(&mut rx_b);
        assert!(events_b.iter().any(|e| matches!(
            e,
            ServerEvent::RoomUpdate { student_count: 2, .. }
        )));
    }

    #[tokio::test]
    async fn test_dashboard_rejects_wrong_password() {
        let store = RoomStore::new();
        let (conn, mut rx) = join_teacher(&store, "ABC", "wrong").await;

        assert_eq!(conn.role, Role::Unbound);
        assert!(conn.room.is_none());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::AuthError { .. }));
        // The rejected attempt must not have created state.
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_dashboard_snapshot_includes_race_state() {
        let store = RoomStore::new();
        let (_a, _rx_a) = join_student(&store, "Ana", "ABC").await;
        let (conn, mut rx) = join_teacher(&store, "ABC", SECRET).await;

        assert_eq!(conn.role, Role::Teacher);
        let events = drain(&mut rx);
        match &events[0] {
            ServerEvent::RoomState {
                students,
                race_teams,
                race_phase,
                race_balls,
                ..
            } => {
                assert_eq!(students.len(), 1);
                assert_eq!(race_teams.as_ref().unwrap().len(), 0);
                assert_eq!(*race_phase, Some(RacePhase::Setup));
                assert_eq!(race_balls.as_ref().unwrap().len(), 0);
            }
            other => panic!("expected room_state, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_word_registration_echoes_and_moves_do_not() {
        let store = RoomStore::new();
        let (mut a, mut rx_a) = join_student(&store, "Ana", "ABC").await;
        let (_b, mut rx_b) = join_student(&store, "Ben", "ABC").await;
        let (tx_a, _) = unbounded_channel();
        drain(&mut rx_a);
        drain(&mut rx_b);

        handle_event(
            &store,
            SECRET,
            &mut a,
            &tx_a,
            ClientEvent::RegisterWord {
                word: "gradient".to_string(),
            },
        )
        .await;
        assert!(drain(&mut rx_a)
            .iter()
            .any(|e| matches!(e, ServerEvent::WordRegistered { .. })));
        assert!(drain(&mut rx_b)
            .iter()
            .any(|e| matches!(e, ServerEvent::WordRegistered { .. })));

        handle_event(
            &store,
            SECRET,
            &mut a,
            &tx_a,
            ClientEvent::UpdateWordPosition {
                position: Vec3 {
                    x: 1.0,
                    y: 2.0,
                    z: 3.0,
                },
            },
        )
        .await;
        assert!(drain(&mut rx_a).is_empty());
        match drain(&mut rx_b).as_slice() {
            [ServerEvent::WordMoved { word, position, .. }] => {
                assert_eq!(word, "gradient");
                assert_eq!(position.x, 1.0);
            }
            other => panic!("expected one word_moved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attention_merge_keeps_omitted_fields() {
        let store = RoomStore::new();
        let (mut a, mut rx_a) = join_student(&store, "Ana", "ABC").await;
        let (tx_a, _) = unbounded_channel();
        drain(&mut rx_a);

        handle_event(
            &store,
            SECRET,
            &mut a,
            &tx_a,
            ClientEvent::UpdateAttentionSlider {
                role: Some("query".to_string()),
                slider_value_q: Some(0.4),
                slider_value_k: None,
                attention_weights: None,
                selected_word: None,
                sentence_name: None,
                head_count: None,
            },
        )
        .await;
        drain(&mut rx_a);

        // Second update omits the role: it must survive the merge.
        handle_event(
            &store,
            SECRET,
            &mut a,
            &tx_a,
            ClientEvent::UpdateAttentionSlider {
                role: None,
                slider_value_q: None,
                slider_value_k: Some(0.9),
                attention_weights: None,
                selected_word: None,
                sentence_name: None,
                head_count: None,
            },
        )
        .await;

        match drain(&mut rx_a).as_slice() {
            [ServerEvent::AttentionUpdated {
                role,
                slider_value_q,
                slider_value_k,
                ..
            }] => {
                assert_eq!(role.as_deref(), Some("query"));
                assert_eq!(*slider_value_q, Some(0.4));
                assert_eq!(*slider_value_k, Some(0.9));
            }
            other => panic!("expected one attention_updated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_teacher_gated_ops_silently_ignore_students() {
        let store = RoomStore::new();
        let (mut a, mut rx_a) = join_student(&store, "Ana", "ABC").await;
        let (_t, mut rx_t) = join_teacher(&store, "ABC", SECRET).await;
        let (tx_a, _) = unbounded_channel();
        drain(&mut rx_a);
        drain(&mut rx_t);

        handle_event(
            &store,
            SECRET,
            &mut a,
            &tx_a,
            ClientEvent::SendQuiz {
                question: "nope".to_string(),
                quiz_type: None,
                options: None,
                correct_answer: "O".to_string(),
                time_limit: None,
            },
        )
        .await;

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_t).is_empty());
        let room = store.get("ABC").await.unwrap();
        assert!(room.lock().await.quiz.is_none());
    }

    #[tokio::test]
    async fn test_teacher_command_errors_for_non_teacher() {
        let store = RoomStore::new();
        let (mut a, mut rx_a) = join_student(&store, "Ana", "ABC").await;
        let (_t, mut rx_t) = join_teacher(&store, "ABC", SECRET).await;
        let (tx_a, _) = unbounded_channel();
        drain(&mut rx_a);
        drain(&mut rx_t);

        handle_event(
            &store,
            SECRET,
            &mut a,
            &tx_a,
            ClientEvent::TeacherCommand {
                command: "spotlight".to_string(),
                extra: serde_json::Map::new(),
            },
        )
        .await;

        let events_a = drain(&mut rx_a);
        assert_eq!(events_a.len(), 1);
        assert!(matches!(events_a[0], ServerEvent::AuthError { .. }));
        // The command is never broadcast to the room.
        assert!(drain(&mut rx_t).is_empty());
    }

    #[tokio::test]
    async fn test_set_race_params_open_to_students() {
        let store = RoomStore::new();
        let (mut a, mut rx_a) = join_student(&store, "Ana", "ABC").await;
        let (_t, mut rx_t) = join_teacher(&store, "ABC", SECRET).await;
        let (tx_a, _) = unbounded_channel();
        drain(&mut rx_a);
        drain(&mut rx_t);

        handle_event(
            &store,
            SECRET,
            &mut a,
            &tx_a,
            ClientEvent::SetRaceParams {
                team_id: None,
                team_name: None,
                color: None,
                learning_rate: Some(5.0),
                momentum: Some(-0.5),
            },
        )
        .await;

        match drain(&mut rx_a).as_slice() {
            [ServerEvent::RaceTeamsUpdated { teams }] => {
                assert_eq!(teams.len(), 1);
                assert_eq!(teams[0].team_id, format!("team-{}", a.id));
                assert_eq!(teams[0].team_name, "Ana");
                assert_eq!(teams[0].learning_rate, shared::LR_MAX);
                assert_eq!(teams[0].momentum, shared::MOMENTUM_MIN);
            }
            other => panic!("expected race_teams_updated, got {:?}", other),
        }
        assert_eq!(drain(&mut rx_t).len(), 1);
    }

    #[tokio::test]
    async fn test_quiz_flow_scenario() {
        let store = RoomStore::new();
        let (mut a, mut rx_a) = join_student(&store, "Ana", "ABC").await;
        let (mut b, mut rx_b) = join_student(&store, "Ben", "ABC").await;
        let (mut t, mut rx_t) = join_teacher(&store, "ABC", SECRET).await;
        let (tx, _) = unbounded_channel();
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_t);

        handle_event(
            &store,
            SECRET,
            &mut t,
            &tx,
            ClientEvent::SendQuiz {
                question: "2+2=4?".to_string(),
                quiz_type: Some(QuizType::Ox),
                options: None,
                correct_answer: "O".to_string(),
                time_limit: Some(10),
            },
        )
        .await;
        assert!(matches!(
            drain(&mut rx_a).as_slice(),
            [ServerEvent::QuizBroadcast { .. }]
        ));
        drain(&mut rx_b);
        drain(&mut rx_t);

        for (conn, answer) in [(&mut a, "O"), (&mut b, "X")] {
            handle_event(
                &store,
                SECRET,
                conn,
                &tx,
                ClientEvent::SubmitQuizAnswer {
                    answer: answer.to_string(),
                },
            )
            .await;
        }

        // Teacher saw a running tally for each submission.
        let tallies = drain(&mut rx_t);
        assert_eq!(tallies.len(), 2);
        assert!(matches!(
            tallies[1],
            ServerEvent::QuizAnswerReceived {
                total_answered: 2,
                total_students: 2,
                ..
            }
        ));

        handle_event(&store, SECRET, &mut t, &tx, ClientEvent::RevealQuizResults {}).await;

        match drain(&mut rx_a).as_slice() {
            [ServerEvent::QuizResults {
                tally,
                correct_count,
                correct_rate,
                ..
            }] => {
                assert_eq!(tally.get("O"), Some(&1));
                assert_eq!(tally.get("X"), Some(&1));
                assert_eq!(*correct_count, 1);
                assert_eq!(correct_rate, "50.0");
            }
            other => panic!("expected quiz_results, got {:?}", other),
        }
        drain(&mut rx_t);

        // Reveal cleared the quiz: a late submission is a no-op.
        handle_event(
            &store,
            SECRET,
            &mut a,
            &tx,
            ClientEvent::SubmitQuizAnswer {
                answer: "O".to_string(),
            },
        )
        .await;
        assert!(drain(&mut rx_t).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_garbage_collects_room() {
        let store = RoomStore::new();
        let (mut a, _rx_a) = join_student(&store, "Ana", "ABC").await;
        let (mut t, _rx_t) = join_teacher(&store, "ABC", SECRET).await;

        handle_disconnect(&store, &mut a).await;
        // Teacher still bound: the room persists.
        assert_eq!(store.len().await, 1);

        handle_disconnect(&store, &mut t).await;
        assert_eq!(store.len().await, 0);
        assert_eq!(t.role, Role::Unbound);
    }

    #[tokio::test]
    async fn test_disconnect_notifies_remaining_students() {
        let store = RoomStore::new();
        let (mut a, _rx_a) = join_student(&store, "Ana", "ABC").await;
        let (_b, mut rx_b) = join_student(&store, "Ben", "ABC").await;
        drain(&mut rx_b);

        handle_disconnect(&store, &mut a).await;

        let events = drain(&mut rx_b);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::StudentLeft { total_count: 1, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::RoomUpdate { student_count: 1, .. }
        )));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_stale_messages_are_silent_noops() {
        let store = RoomStore::new();
        let mut conn = Conn::new(store.next_conn_id());
        let (tx, mut rx) = unbounded_channel();

        // Never joined: every stateful message is ignored.
        handle_event(
            &store,
            SECRET,
            &mut conn,
            &tx,
            ClientEvent::RegisterWord {
                word: "lost".to_string(),
            },
        )
        .await;
        handle_event(
            &store,
            SECRET,
            &mut conn,
            &tx,
            ClientEvent::SubmitQuizAnswer {
                answer: "O".to_string(),
            },
        )
        .await;
        handle_event(&store, SECRET, &mut conn, &tx, ClientEvent::StartRace {}).await;
        handle_disconnect(&store, &mut conn).await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(store.len().await, 0);
    }
}
