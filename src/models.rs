//! Stored document shapes for the `users`, `events`, and `bookings`
//! collections. Field names stay camelCase on disk.

use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// A registered account. `password` holds the argon2 PHC hash; it is
/// redacted before any user document crosses the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub created_events: Vec<ObjectId>,
}

/// An event someone can book. Read-only once created; `creator` is a
/// display-only back-reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub date: DateTime,
    pub creator: ObjectId,
}

/// A booking tying a user to an event. The event link is nullable: booking
/// an id that no longer resolves records the booking with an empty link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user: ObjectId,
    pub event: Option<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}
