//! Seams to the collaborators this service does not own: the operating-area
//! geofence, push notifications and the real-time event channel.

pub mod events;
pub mod geofence;
pub mod notifier;
