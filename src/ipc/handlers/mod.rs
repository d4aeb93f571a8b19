pub mod analytics;
pub mod announcements;
pub mod attendance;
pub mod audit;
pub mod backup;
pub mod content;
pub mod core;
pub mod events;
pub mod members;
pub mod rsvps;
