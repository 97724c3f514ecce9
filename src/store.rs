//! Persistent collections behind a narrow async interface.
//!
//! Resolvers and loaders talk to [`EntityStore`]; [`MongoStore`] is the
//! production implementation over the MongoDB driver. Multi-id lookups make
//! no ordering promise - callers that care re-key the results themselves.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::{Client, Collection, Database};
use thiserror::Error;

use crate::models::{BookingDoc, EventDoc, UserDoc};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn user_by_email(&self, email: &str) -> Result<Option<UserDoc>, StoreError>;
    async fn user_by_id(&self, id: ObjectId) -> Result<Option<UserDoc>, StoreError>;
    async fn users_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<UserDoc>, StoreError>;
    async fn insert_user(&self, user: &UserDoc) -> Result<(), StoreError>;
    /// Appends an event id to a user's created-events set. The set only grows.
    async fn push_created_event(
        &self,
        user_id: ObjectId,
        event_id: ObjectId,
    ) -> Result<(), StoreError>;

    async fn all_events(&self) -> Result<Vec<EventDoc>, StoreError>;
    async fn event_by_id(&self, id: ObjectId) -> Result<Option<EventDoc>, StoreError>;
    async fn events_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<EventDoc>, StoreError>;
    async fn insert_event(&self, event: &EventDoc) -> Result<(), StoreError>;

    async fn bookings_by_user(&self, user_id: ObjectId) -> Result<Vec<BookingDoc>, StoreError>;
    async fn booking_by_id(&self, id: ObjectId) -> Result<Option<BookingDoc>, StoreError>;
    async fn insert_booking(&self, booking: &BookingDoc) -> Result<(), StoreError>;
    async fn delete_booking(&self, id: ObjectId) -> Result<bool, StoreError>;
}

pub struct MongoStore {
    users: Collection<UserDoc>,
    events: Collection<EventDoc>,
    bookings: Collection<BookingDoc>,
}

impl MongoStore {
    /// Connects and pings so a bad database URL fails startup instead of the
    /// first query.
    pub async fn connect(url: &str, db_name: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(url).await?;
        let db = client.database(db_name);
        db.run_command(doc! { "ping": 1 }).await?;
        Ok(Self::new(&db))
    }

    pub fn new(db: &Database) -> Self {
        Self {
            users: db.collection("users"),
            events: db.collection("events"),
            bookings: db.collection("bookings"),
        }
    }
}

#[async_trait]
impl EntityStore for MongoStore {
    async fn user_by_email(&self, email: &str) -> Result<Option<UserDoc>, StoreError> {
        Ok(self.users.find_one(doc! { "email": email }).await?)
    }

    async fn user_by_id(&self, id: ObjectId) -> Result<Option<UserDoc>, StoreError> {
        Ok(self.users.find_one(doc! { "_id": id }).await?)
    }

    async fn users_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<UserDoc>, StoreError> {
        let cursor = self.users.find(doc! { "_id": { "$in": ids.to_vec() } }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_user(&self, user: &UserDoc) -> Result<(), StoreError> {
        self.users.insert_one(user).await?;
        Ok(())
    }

    async fn push_created_event(
        &self,
        user_id: ObjectId,
        event_id: ObjectId,
    ) -> Result<(), StoreError> {
        self.users
            .update_one(
                doc! { "_id": user_id },
                doc! { "$push": { "createdEvents": event_id } },
            )
            .await?;
        Ok(())
    }

    async fn all_events(&self) -> Result<Vec<EventDoc>, StoreError> {
        let cursor = self.events.find(doc! {}).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn event_by_id(&self, id: ObjectId) -> Result<Option<EventDoc>, StoreError> {
        Ok(self.events.find_one(doc! { "_id": id }).await?)
    }

    async fn events_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<EventDoc>, StoreError> {
        let cursor = self.events.find(doc! { "_id": { "$in": ids.to_vec() } }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_event(&self, event: &EventDoc) -> Result<(), StoreError> {
        self.events.insert_one(event).await?;
        Ok(())
    }

    async fn bookings_by_user(&self, user_id: ObjectId) -> Result<Vec<BookingDoc>, StoreError> {
        let cursor = self.bookings.find(doc! { "user": user_id }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn booking_by_id(&self, id: ObjectId) -> Result<Option<BookingDoc>, StoreError> {
        Ok(self.bookings.find_one(doc! { "_id": id }).await?)
    }

    async fn insert_booking(&self, booking: &BookingDoc) -> Result<(), StoreError> {
        self.bookings.insert_one(booking).await?;
        Ok(())
    }

    async fn delete_booking(&self, id: ObjectId) -> Result<bool, StoreError> {
        let result = self.bookings.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }
}
