//! Fan-out addressing over a room's connected members.
//!
//! Sends never block and never retry: a connection whose receiving
//! task is gone is simply skipped, matching the delivery model where
//! a dropped broadcast to a disconnected peer is absorbed. Ordering
//! within one room follows mutation order because every send happens
//! while the room lock is held.

use crate::rooms::Room;
use log::debug;
use shared::{ConnId, ServerEvent};
use tokio::sync::mpsc;

/// Per-connection outbound channel. The transport edge owns the
/// receiving half and turns events into wire frames.
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// Sends an event to a single connection in the room.
pub fn send_to(room: &Room, conn_id: ConnId, event: &ServerEvent) {
    if let Some(sender) = room.senders.get(&conn_id) {
        if sender.send(event.clone()).is_err() {
            debug!("dropping event for closed connection {}", conn_id);
        }
    }
}

/// Sends an event to every connection in the room, teacher included.
pub fn broadcast(room: &Room, event: &ServerEvent) {
    for (conn_id, sender) in &room.senders {
        if sender.send(event.clone()).is_err() {
            debug!("dropping event for closed connection {}", conn_id);
        }
    }
}

/// Sends an event to everyone in the room except one connection,
/// used where echoing back to the originator would cause jitter.
pub fn broadcast_except(room: &Room, exclude: ConnId, event: &ServerEvent) {
    for (conn_id, sender) in &room.senders {
        if *conn_id == exclude {
            continue;
        }
        if sender.send(event.clone()).is_err() {
            debug!("dropping event for closed connection {}", conn_id);
        }
    }
}

/// Sends an event to the room's teacher connection, if one is bound.
pub fn send_to_teacher(room: &Room, event: &ServerEvent) {
    if let Some(teacher_id) = room.teacher {
        send_to(room, teacher_id, event);
    }
}
