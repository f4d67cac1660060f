//! HTTP and WebSocket request handlers for the Rendezvous service.

pub mod metrics;
pub mod rooms;
pub mod ws;

pub use metrics::metrics_handler;
pub use rooms::{
    create_room, end_room, get_room, invite, join_room, kick, leave_room, mark_busy, mute,
    record_activity, CallerId, USER_ID_HEADER,
};
pub use ws::{dispatch_frame, ws_handler};
