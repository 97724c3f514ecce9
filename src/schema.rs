//! GraphQL schema: object types and the query/mutation roots.
//!
//! Resolvers carry the whole authorization model: mutating operations check
//! the request's identity and fail with "Unauthenticated" when none is
//! attached. Nested entity fields resolve lazily through the request's
//! loaders, only when a client actually selects them.

use std::sync::Arc;

use async_graphql::{
    Context, EmptySubscription, Error, InputObject, Object, Result, Schema, SimpleObject, ID,
};
use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};

use crate::auth::{self, require_session, TokenCodec};
use crate::dataloaders::Loaders;
use crate::models::{BookingDoc, EventDoc, UserDoc};
use crate::store::EntityStore;
use crate::types::DateTime;

/// Placeholder returned in place of a stored password hash.
const PASSWORD_REDACTED: &str = "*******";

pub type AppSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(store: Arc<dyn EntityStore>, codec: TokenCodec) -> AppSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(store)
        .data(codec)
        .finish()
}

fn store<'a>(ctx: &'a Context<'_>) -> Result<&'a Arc<dyn EntityStore>> {
    ctx.data::<Arc<dyn EntityStore>>()
}

fn loaders<'a>(ctx: &'a Context<'_>) -> Result<&'a Loaders> {
    ctx.data::<Loaders>()
}

pub struct User {
    doc: UserDoc,
    password: Option<&'static str>,
}

impl User {
    /// A user crossing the API boundary: hash swapped for the placeholder.
    fn redacted(doc: UserDoc) -> Self {
        Self {
            doc,
            password: Some(PASSWORD_REDACTED),
        }
    }

    /// Registration response carries a null password instead.
    fn without_password(doc: UserDoc) -> Self {
        Self {
            doc,
            password: None,
        }
    }
}

#[Object]
impl User {
    async fn id(&self) -> ID {
        ID(self.doc.id.to_hex())
    }

    async fn email(&self) -> &str {
        &self.doc.email
    }

    async fn password(&self) -> Option<&'static str> {
        self.password
    }

    async fn created_events(&self, ctx: &Context<'_>) -> Result<Vec<Event>> {
        let events = loaders(ctx)?
            .events
            .load_many(self.doc.created_events.clone())
            .await?;
        Ok(events.into_iter().map(Event::from).collect())
    }
}

pub struct Event {
    doc: EventDoc,
}

impl From<EventDoc> for Event {
    fn from(doc: EventDoc) -> Self {
        Self { doc }
    }
}

#[Object]
impl Event {
    async fn id(&self) -> ID {
        ID(self.doc.id.to_hex())
    }

    async fn title(&self) -> &str {
        &self.doc.title
    }

    async fn description(&self) -> &str {
        &self.doc.description
    }

    async fn price(&self) -> f64 {
        self.doc.price
    }

    async fn date(&self) -> DateTime {
        DateTime::from(self.doc.date)
    }

    async fn creator(&self, ctx: &Context<'_>) -> Result<User> {
        let user = loaders(ctx)?.users.load(self.doc.creator).await?;
        user.map(User::redacted)
            .ok_or_else(|| Error::new("User not found"))
    }
}

pub struct Booking {
    doc: BookingDoc,
}

impl From<BookingDoc> for Booking {
    fn from(doc: BookingDoc) -> Self {
        Self { doc }
    }
}

#[Object]
impl Booking {
    async fn id(&self) -> ID {
        ID(self.doc.id.to_hex())
    }

    async fn user(&self, ctx: &Context<'_>) -> Result<User> {
        let user = loaders(ctx)?.users.load(self.doc.user).await?;
        user.map(User::redacted)
            .ok_or_else(|| Error::new("User not found"))
    }

    /// Null when the booking was taken against an event that never resolved.
    async fn event(&self, ctx: &Context<'_>) -> Result<Option<Event>> {
        let Some(event_id) = self.doc.event else {
            return Ok(None);
        };
        let event = loaders(ctx)?.events.load(event_id).await?;
        Ok(event.map(Event::from))
    }

    async fn created_at(&self) -> DateTime {
        DateTime::from(self.doc.created_at)
    }

    async fn updated_at(&self) -> DateTime {
        DateTime::from(self.doc.updated_at)
    }
}

/// Returned by `login`: the identity plus its signed session token.
#[derive(SimpleObject)]
pub struct AuthPayload {
    pub user_id: ID,
    pub token: String,
    /// Validity window in hours.
    pub token_expiration: i32,
}

#[derive(InputObject)]
pub struct UserInput {
    pub email: String,
    pub password: String,
}

#[derive(InputObject)]
pub struct EventInput {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub date: DateTime,
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn events(&self, ctx: &Context<'_>) -> Result<Vec<Event>> {
        let events = store(ctx)?.all_events().await?;
        Ok(events.into_iter().map(Event::from).collect())
    }

    /// The caller's own bookings.
    async fn bookings(&self, ctx: &Context<'_>) -> Result<Vec<Booking>> {
        let session = require_session(ctx)?;
        let bookings = store(ctx)?.bookings_by_user(session.user_id).await?;
        Ok(bookings.into_iter().map(Booking::from).collect())
    }

    async fn login(&self, ctx: &Context<'_>, email: String, password: String) -> Result<AuthPayload> {
        let user = store(ctx)?
            .user_by_email(&email)
            .await?
            .ok_or_else(|| Error::new("User not found"))?;

        if !auth::verify_password(&user.password, &password) {
            return Err(Error::new("Incorrect Password"));
        }

        let codec = ctx.data::<TokenCodec>()?;
        let token = codec.issue(user.id, &user.email)?;
        Ok(AuthPayload {
            user_id: ID(user.id.to_hex()),
            token,
            token_expiration: codec.validity_hours(),
        })
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn create_user(&self, ctx: &Context<'_>, user_input: UserInput) -> Result<User> {
        let store = store(ctx)?;
        if store.user_by_email(&user_input.email).await?.is_some() {
            return Err(Error::new("User already exists"));
        }

        let user = UserDoc {
            id: ObjectId::new(),
            email: user_input.email,
            password: auth::hash_password(&user_input.password)?,
            created_events: Vec::new(),
        };
        store.insert_user(&user).await?;
        Ok(User::without_password(user))
    }

    async fn create_event(&self, ctx: &Context<'_>, event_input: EventInput) -> Result<Event> {
        let session = require_session(ctx)?;
        let store = store(ctx)?;

        let event = EventDoc {
            id: ObjectId::new(),
            title: event_input.title,
            description: event_input.description,
            price: event_input.price,
            date: BsonDateTime::from_chrono(event_input.date.0),
            creator: session.user_id,
        };
        store.insert_event(&event).await?;

        store
            .user_by_id(session.user_id)
            .await?
            .ok_or_else(|| Error::new("User doesn't exist"))?;
        store.push_created_event(session.user_id, event.id).await?;

        Ok(Event::from(event))
    }

    /// Books an event for the caller. An id that resolves to nothing still
    /// creates the booking, with an empty event link.
    async fn book_event(&self, ctx: &Context<'_>, event_id: ID) -> Result<Booking> {
        let session = require_session(ctx)?;
        let store = store(ctx)?;

        let fetched = match ObjectId::parse_str(event_id.as_str()) {
            Ok(oid) => store.event_by_id(oid).await?,
            Err(_) => None,
        };

        let now = BsonDateTime::now();
        let booking = BookingDoc {
            id: ObjectId::new(),
            user: session.user_id,
            event: fetched.map(|event| event.id),
            created_at: now,
            updated_at: now,
        };
        store.insert_booking(&booking).await?;
        Ok(Booking::from(booking))
    }

    /// Cancels a booking and returns the event that was booked, not the
    /// booking itself.
    async fn cancel_booking(&self, ctx: &Context<'_>, booking_id: ID) -> Result<Option<Event>> {
        require_session(ctx)?;
        let store = store(ctx)?;

        let oid = ObjectId::parse_str(booking_id.as_str())
            .map_err(|_| Error::new("Booking not found"))?;
        let booking = store
            .booking_by_id(oid)
            .await?
            .ok_or_else(|| Error::new("Booking not found"))?;

        let event = match booking.event {
            Some(event_id) => loaders(ctx)?.events.load(event_id).await?,
            None => None,
        };

        store.delete_booking(oid).await?;
        Ok(event.map(Event::from))
    }
}
