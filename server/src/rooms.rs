//! Room registry and per-room state for the classroom coordinator
//!
//! This module is the single source of truth shared by every other
//! component: membership, the teacher binding, the active quiz and
//! the race sub-state all live here. Rooms are created lazily on
//! first reference and garbage-collected as soon as they are empty.
//!
//! Concurrency model: the store keeps each room behind its own async
//! mutex, with an outer read-write lock guarding only the map itself.
//! Mutations on one room are serialized against each other while
//! different rooms never block one another.

use crate::broadcast::Outbound;
use crate::quiz::{Quiz, QuizAnswer};
use crate::race::RaceState;
use log::info;
use serde::Serialize;
use shared::{ConnId, RacePhase, StudentInfo, Vec3};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One student's state, owned exclusively by its room.
///
/// Created on join, mutated only by messages bearing this
/// connection's identifier, destroyed on disconnect. A session never
/// migrates between rooms.
#[derive(Debug, Clone)]
pub struct StudentSession {
    pub id: ConnId,
    pub name: String,
    pub school_code: String,
    pub joined_at: u64,
    pub color: String,
    pub word: Option<String>,
    pub word_position: Option<Vec3>,
    pub role: Option<String>,
    pub slider_value_q: Option<f64>,
    pub slider_value_k: Option<f64>,
    pub attention_weights: Option<Vec<f64>>,
    pub selected_word: Option<String>,
    pub sentence_name: Option<String>,
    pub head_count: Option<u32>,
}

impl StudentSession {
    pub fn new(id: ConnId, name: String, school_code: String, color: String, joined_at: u64) -> Self {
        Self {
            id,
            name,
            school_code,
            joined_at,
            color,
            word: None,
            word_position: None,
            role: None,
            slider_value_q: None,
            slider_value_k: None,
            attention_weights: None,
            selected_word: None,
            sentence_name: None,
            head_count: None,
        }
    }

    /// Client-facing snapshot of this session.
    pub fn info(&self) -> StudentInfo {
        StudentInfo {
            id: self.id,
            name: self.name.clone(),
            school_code: self.school_code.clone(),
            joined_at: self.joined_at,
            color: self.color.clone(),
            word: self.word.clone(),
            word_position: self.word_position,
            role: self.role.clone(),
            slider_value_q: self.slider_value_q,
            slider_value_k: self.slider_value_k,
            attention_weights: self.attention_weights.clone(),
            selected_word: self.selected_word.clone(),
            sentence_name: self.sentence_name.clone(),
            head_count: self.head_count,
        }
    }
}

/// Mutable state of one classroom, keyed by its shared code.
pub struct Room {
    pub code: String,
    pub students: HashMap<ConnId, StudentSession>,
    /// Outbound channels for every live connection, teacher included.
    pub senders: HashMap<ConnId, Outbound>,
    pub teacher: Option<ConnId>,
    pub quiz: Option<Quiz>,
    pub quiz_answers: HashMap<ConnId, QuizAnswer>,
    pub race: RaceState,
}

impl Room {
    pub fn new(code: String) -> Self {
        Self {
            code,
            students: HashMap::new(),
            senders: HashMap::new(),
            teacher: None,
            quiz: None,
            quiz_answers: HashMap::new(),
            race: RaceState::new(),
        }
    }

    /// A room with zero students and no teacher is eligible for
    /// garbage collection.
    pub fn is_empty(&self) -> bool {
        self.students.is_empty() && self.teacher.is_none()
    }

    /// Student snapshots in join order, stable for broadcasting.
    pub fn student_infos(&self) -> Vec<StudentInfo> {
        let mut infos: Vec<StudentInfo> = self.students.values().map(StudentSession::info).collect();
        infos.sort_by_key(|info| (info.joined_at, info.id));
        infos
    }

    /// The single authorization predicate for teacher-gated commands:
    /// allowed when no teacher is bound, or when the caller is the
    /// bound teacher.
    pub fn authorizes(&self, conn_id: ConnId) -> bool {
        self.teacher.map_or(true, |teacher_id| teacher_id == conn_id)
    }
}

/// Read-only room listing for the REST surface.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_code: String,
    pub student_count: usize,
    pub has_teacher: bool,
    pub race_phase: RacePhase,
}

/// Process-wide registry of rooms.
///
/// Always passed by reference into the components that need room
/// access, never a global, so tests can instantiate isolated stores.
pub struct RoomStore {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
    next_conn_id: AtomicU64,
}

impl RoomStore {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(0),
        }
    }

    /// Allocates a connection identifier, unique per live connection.
    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the room for the given code, creating an empty one on
    /// first reference. Never fails.
    pub async fn get_or_create(&self, room_code: &str) -> Arc<Mutex<Room>> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_code) {
                return Arc::clone(room);
            }
        }

        let mut rooms = self.rooms.write().await;
        Arc::clone(
            rooms
                .entry(room_code.to_string())
                .or_insert_with(|| {
                    info!("creating room {}", room_code);
                    Arc::new(Mutex::new(Room::new(room_code.to_string())))
                }),
        )
    }

    pub async fn get(&self, room_code: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().await.get(room_code).map(Arc::clone)
    }

    /// True only if the room's recorded teacher connection equals the
    /// given id.
    pub async fn is_teacher(&self, conn_id: ConnId, room_code: &str) -> bool {
        match self.get(room_code).await {
            Some(room) => room.lock().await.teacher == Some(conn_id),
            None => false,
        }
    }

    /// Removes the room once both membership sets are empty. Also
    /// cancels a still-running race ticker so the tick task cannot
    /// keep an orphaned room alive. Idempotent.
    pub async fn delete_if_empty(&self, room_code: &str) {
        let mut rooms = self.rooms.write().await;
        let Some(room_arc) = rooms.get(room_code).map(Arc::clone) else {
            return;
        };

        let mut room = room_arc.lock().await;
        if room.is_empty() {
            room.race.ticker.cancel();
            drop(room);
            rooms.remove(room_code);
            info!("deleted empty room {}", room_code);
        }
    }

    /// Snapshot of all rooms for the read-only REST surface.
    pub async fn room_summaries(&self) -> Vec<RoomSummary> {
        let rooms = self.rooms.read().await;
        let mut summaries = Vec::with_capacity(rooms.len());
        for (code, room_arc) in rooms.iter() {
            let room = room_arc.lock().await;
            summaries.push(RoomSummary {
                room_code: code.clone(),
                student_count: room.students.len(),
                has_teacher: room.teacher.is_some(),
                race_phase: room.race.phase,
            });
        }
        summaries.sort_by(|a, b| a.room_code.cmp(&b.room_code));
        summaries
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}
