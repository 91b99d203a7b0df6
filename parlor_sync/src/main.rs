use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventstore::{ClientSettings, Position, StreamPosition, SubscribeToAllOptions};
use meilisearch_sdk::{task_info::TaskInfo, tasks::Task};
use parlor::{
    domain::{
        core::{
            AddOn, AddOnEvent, Booking, BookingEvent, BookingId, BookingStatus, CoreEvent,
            Provider, ProviderEvent, Service, ServiceEvent, Shop, ShopEvent,
        },
        reserve::Desk,
        Entity,
    },
    infrastructure::core::{
        EventStoreAddOnRepository, EventStoreBookingRepository, EventStoreProviderDayRepository,
        EventStoreProviderRepository, EventStoreScheduleRepository, EventStoreServiceRepository,
        EventStoreShopRepository,
    },
    ParlorConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn, Level};
use uuid::Uuid;

static CHECKPOINT_UID: &str = "sync_checkpoint";

#[tokio::main]
async fn main() {
    match ParlorConfig::load() {
        Ok(config) => {
            tracing_subscriber::fmt()
                .with_max_level(Level::from(&config.logger.level))
                .init();
            let sweep_config = config.clone();
            tokio::spawn(async move {
                if let Err(error) = sweep(&sweep_config).await {
                    error!("no-show sweep stopped: {}", error);
                }
            });
            if let Err(error) = subscribe(&config).await {
                error!("application error: {}", error);
            }
        }
        Err(error) => {
            tracing_subscriber::fmt::init();
            error!("application error: {}", error)
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SyncCheckpoint {
    id: u64,
    event_id: Uuid,
    position: Position,
}

async fn subscribe(config: &ParlorConfig) -> Result<(), Box<dyn Error>> {
    let settings = config.eventstore.url.parse::<ClientSettings>()?;
    let mut client = Client {
        eventstore: eventstore::Client::new(settings)?,
        meilisearch: meilisearch_sdk::Client::new(
            &config.meilisearch.url,
            &config.meilisearch.api_key,
        ),
        task_info: None,
    };
    client
        .meilisearch
        .index(Booking::ENTITY_NAME)
        .set_filterable_attributes(["status", "end_ts"])
        .await?;
    let checkpoint = client
        .meilisearch
        .index(CHECKPOINT_UID)
        .get_document::<SyncCheckpoint>("1")
        .await?;
    let mut sub = client
        .eventstore
        .subscribe_to_all(
            &SubscribeToAllOptions::default()
                .position(StreamPosition::Position(checkpoint.position)),
        )
        .await;
    loop {
        match sub.next().await {
            Ok(resolved) => {
                if let Ok(core_event) = CoreEvent::try_from(&resolved) {
                    info!("domain event received: {:?}", core_event);
                    if let Err(e) = client.execute(core_event).await {
                        error!("event projection error: {}", e);
                        continue;
                    }
                } else {
                    info!("system event received: {:?}", resolved);
                }
                let event = resolved.get_original_event();
                if let Err(e) = client
                    .meilisearch
                    .index(CHECKPOINT_UID)
                    .add_documents(
                        &[SyncCheckpoint {
                            id: 1,
                            event_id: event.id,
                            position: event.position,
                        }],
                        Some("id"),
                    )
                    .await
                {
                    error!("failed to save checkpoint: {}", e);
                }
            }
            Err(e) => return Err(Box::new(e)),
        }
    }
}

/// Periodically flips confirmed bookings whose appointment has ended into
/// no-shows. Completions arrive through the API; anything still confirmed
/// after its end time never happened.
async fn sweep(config: &ParlorConfig) -> Result<(), Box<dyn Error>> {
    let settings = config.eventstore.url.parse::<ClientSettings>()?;
    let client = eventstore::Client::new(settings)?;
    let desk = Desk::new(
        Arc::new(EventStoreShopRepository::new(client.clone())),
        Arc::new(EventStoreScheduleRepository::new(client.clone())),
        Arc::new(EventStoreProviderRepository::new(client.clone())),
        Arc::new(EventStoreServiceRepository::new(client.clone())),
        Arc::new(EventStoreAddOnRepository::new(client.clone())),
        Arc::new(EventStoreBookingRepository::new(client.clone())),
        Arc::new(EventStoreProviderDayRepository::new(client)),
        config.booking.commit_attempts,
    );
    let meilisearch =
        meilisearch_sdk::Client::new(&config.meilisearch.url, &config.meilisearch.api_key);
    let mut ticker = tokio::time::interval(Duration::from_secs(config.booking.sweep_minutes * 60));
    loop {
        ticker.tick().await;
        let now = Utc::now();
        let filter = format!("status = confirmed AND end_ts < {}", now.timestamp());
        let overdue = match meilisearch
            .index(Booking::ENTITY_NAME)
            .search()
            .with_filter(&filter)
            .with_limit(100)
            .execute::<MeiliBooking>()
            .await
        {
            Ok(results) => results.hits,
            Err(e) => {
                error!("overdue booking search failed: {}", e);
                continue;
            }
        };
        for hit in overdue {
            let booking_id = hit.result.id;
            match desk.mark_no_show(booking_id, now).await {
                Ok(status) => info!("booking {} swept to {}", booking_id, status),
                Err(e) => warn!("booking {} not swept: {}", booking_id, e),
            }
        }
    }
}

#[async_trait]
pub trait Execute<E> {
    type Error: Error;
    async fn execute(&mut self, event: E) -> Result<(), Self::Error>;
}

struct Client {
    eventstore: eventstore::Client,
    meilisearch: meilisearch_sdk::Client,
    task_info: Option<TaskInfo>,
}

impl Client {
    async fn wait_for_completion(&self) -> Result<Option<Task>, meilisearch_sdk::errors::Error> {
        if let Some(task_info) = &self.task_info {
            loop {
                match self.meilisearch.wait_for_task(task_info, None, None).await {
                    Ok(task) => match task {
                        Task::Succeeded { .. } | Task::Failed { .. } => return Ok(Some(task)),
                        _ => continue,
                    },
                    Err(meilisearch_sdk::errors::Error::Timeout) => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Execute<CoreEvent> for Client {
    type Error = meilisearch_sdk::errors::Error;
    async fn execute(&mut self, event: CoreEvent) -> Result<(), Self::Error> {
        Ok(match event {
            CoreEvent::ShopEvent(event) => self.execute(event).await?,
            CoreEvent::ProviderEvent(event) => self.execute(event).await?,
            CoreEvent::ServiceEvent(event) => self.execute(event).await?,
            CoreEvent::AddOnEvent(event) => self.execute(event).await?,
            CoreEvent::BookingEvent(event) => self.execute(event).await?,
            // Opening hours and day ledgers stay write-side only.
            CoreEvent::ScheduleEvent(_) | CoreEvent::ProviderDayEvent(_) => {}
        })
    }
}

#[derive(Serialize, Deserialize)]
struct MeiliShop {
    id: u64,
    name: String,
    timezone: String,
    provider_ids: Vec<u64>,
}

#[async_trait]
impl Execute<ShopEvent> for Client {
    type Error = meilisearch_sdk::errors::Error;
    async fn execute(&mut self, event: ShopEvent) -> Result<(), Self::Error> {
        let index = self.meilisearch.index(Shop::ENTITY_NAME);
        let task = match event {
            ShopEvent::ShopOpened { id, name, timezone } => {
                index
                    .add_documents(
                        &[MeiliShop {
                            id: *id,
                            name,
                            timezone: timezone.to_string(),
                            provider_ids: Vec::new(),
                        }],
                        Some("id"),
                    )
                    .await?
            }
            ShopEvent::ShopRenamed { id, name } => {
                index
                    .add_or_update(&[json!({"id": *id, "name": name})], Some("id"))
                    .await?
            }
            ShopEvent::TimezoneChanged { id, timezone } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "timezone": timezone.to_string()})],
                        Some("id"),
                    )
                    .await?
            }
            ShopEvent::ScheduleAttached { id, schedule_id } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "schedule_id": *schedule_id})],
                        Some("id"),
                    )
                    .await?
            }
            ShopEvent::ProviderEnrolled { id, provider_id } => {
                self.wait_for_completion().await?;
                let mut doc = index.get_document::<MeiliShop>(&id.to_string()).await?;
                doc.provider_ids.push(*provider_id);
                index.add_or_update(&[doc], Some("id")).await?
            }
            ShopEvent::ProviderDropped { id, provider_id } => {
                self.wait_for_completion().await?;
                let mut doc = index.get_document::<MeiliShop>(&id.to_string()).await?;
                doc.provider_ids.retain(|p| *p != *provider_id);
                index.add_or_update(&[doc], Some("id")).await?
            }
            ShopEvent::ShopDeleted { id } => index.delete_document(*id).await?,
        };
        self.task_info = Some(task);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct MeiliProvider {
    id: u64,
    shop_id: u64,
    name: String,
    service_ids: Vec<u64>,
    accepts_unassigned: bool,
    active: bool,
}

#[async_trait]
impl Execute<ProviderEvent> for Client {
    type Error = meilisearch_sdk::errors::Error;
    async fn execute(&mut self, event: ProviderEvent) -> Result<(), Self::Error> {
        let index = self.meilisearch.index(Provider::ENTITY_NAME);
        let task = match event {
            ProviderEvent::ProviderJoined { id, shop_id, name } => {
                index
                    .add_documents(
                        &[MeiliProvider {
                            id: *id,
                            shop_id: *shop_id,
                            name,
                            service_ids: Vec::new(),
                            accepts_unassigned: true,
                            active: true,
                        }],
                        Some("id"),
                    )
                    .await?
            }
            ProviderEvent::ProviderRenamed { id, name } => {
                index
                    .add_or_update(&[json!({"id": *id, "name": name})], Some("id"))
                    .await?
            }
            ProviderEvent::ServiceQualified { id, service_id } => {
                self.wait_for_completion().await?;
                let mut doc = index.get_document::<MeiliProvider>(&id.to_string()).await?;
                doc.service_ids.push(*service_id);
                index.add_or_update(&[doc], Some("id")).await?
            }
            ProviderEvent::ServiceUnqualified { id, service_id } => {
                self.wait_for_completion().await?;
                let mut doc = index.get_document::<MeiliProvider>(&id.to_string()).await?;
                doc.service_ids.retain(|s| *s != *service_id);
                index.add_or_update(&[doc], Some("id")).await?
            }
            ProviderEvent::ScheduleAssigned { id, schedule_id } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "schedule_id": schedule_id.map(|s| *s)})],
                        Some("id"),
                    )
                    .await?
            }
            ProviderEvent::UnassignedPolicyChanged {
                id,
                accepts_unassigned,
            } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "accepts_unassigned": accepts_unassigned})],
                        Some("id"),
                    )
                    .await?
            }
            ProviderEvent::ProviderRetired { id } => {
                index
                    .add_or_update(&[json!({"id": *id, "active": false})], Some("id"))
                    .await?
            }
        };
        self.task_info = Some(task);
        Ok(())
    }
}

#[async_trait]
impl Execute<ServiceEvent> for Client {
    type Error = meilisearch_sdk::errors::Error;
    async fn execute(&mut self, event: ServiceEvent) -> Result<(), Self::Error> {
        let index = self.meilisearch.index(Service::ENTITY_NAME);
        let task = match event {
            ServiceEvent::ServiceListed {
                id,
                shop_id,
                name,
                description,
                duration_minutes,
                price,
            } => {
                index
                    .add_documents(
                        &[json!({
                            "id": *id,
                            "shop_id": *shop_id,
                            "name": name,
                            "description": description,
                            "duration_minutes": duration_minutes,
                            "price": price.to_string(),
                        })],
                        Some("id"),
                    )
                    .await?
            }
            ServiceEvent::ServiceDescribed {
                id,
                name,
                description,
            } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "name": name, "description": description})],
                        Some("id"),
                    )
                    .await?
            }
            ServiceEvent::DurationChanged {
                id,
                duration_minutes,
            } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "duration_minutes": duration_minutes})],
                        Some("id"),
                    )
                    .await?
            }
            ServiceEvent::PriceChanged { id, price } => {
                index
                    .add_or_update(&[json!({"id": *id, "price": price.to_string()})], Some("id"))
                    .await?
            }
            ServiceEvent::ServiceDelisted { id } => index.delete_document(*id).await?,
        };
        self.task_info = Some(task);
        Ok(())
    }
}

#[async_trait]
impl Execute<AddOnEvent> for Client {
    type Error = meilisearch_sdk::errors::Error;
    async fn execute(&mut self, event: AddOnEvent) -> Result<(), Self::Error> {
        let index = self.meilisearch.index(AddOn::ENTITY_NAME);
        let task = match event {
            AddOnEvent::AddOnListed {
                id,
                shop_id,
                name,
                description,
                duration_minutes,
                price,
            } => {
                index
                    .add_documents(
                        &[json!({
                            "id": *id,
                            "shop_id": *shop_id,
                            "name": name,
                            "description": description,
                            "duration_minutes": duration_minutes,
                            "price": price.to_string(),
                        })],
                        Some("id"),
                    )
                    .await?
            }
            AddOnEvent::AddOnDescribed {
                id,
                name,
                description,
            } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "name": name, "description": description})],
                        Some("id"),
                    )
                    .await?
            }
            AddOnEvent::DurationChanged {
                id,
                duration_minutes,
            } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "duration_minutes": duration_minutes})],
                        Some("id"),
                    )
                    .await?
            }
            AddOnEvent::PriceChanged { id, price } => {
                index
                    .add_or_update(&[json!({"id": *id, "price": price.to_string()})], Some("id"))
                    .await?
            }
            AddOnEvent::AddOnDelisted { id } => index.delete_document(*id).await?,
        };
        self.task_info = Some(task);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct MeiliBooking {
    id: BookingId,
    shop_id: u64,
    provider_id: u64,
    status: String,
    start_utc: DateTime<Utc>,
    end_utc: DateTime<Utc>,
    /// Unix seconds of the end, the sweep filters on this.
    end_ts: i64,
}

#[async_trait]
impl Execute<BookingEvent> for Client {
    type Error = meilisearch_sdk::errors::Error;
    async fn execute(&mut self, event: BookingEvent) -> Result<(), Self::Error> {
        let index = self.meilisearch.index(Booking::ENTITY_NAME);
        let task = match event {
            BookingEvent::BookingCreated {
                id,
                shop_id,
                provider_id,
                time,
                ..
            } => {
                index
                    .add_documents(
                        &[MeiliBooking {
                            id,
                            shop_id: *shop_id,
                            provider_id: *provider_id,
                            status: BookingStatus::Pending.to_string(),
                            start_utc: time.start,
                            end_utc: time.end,
                            end_ts: time.end.timestamp(),
                        }],
                        Some("id"),
                    )
                    .await?
            }
            BookingEvent::BookingConfirmed { id } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "status": BookingStatus::Confirmed.to_string()})],
                        Some("id"),
                    )
                    .await?
            }
            BookingEvent::BookingCompleted { id } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "status": BookingStatus::Completed.to_string()})],
                        Some("id"),
                    )
                    .await?
            }
            BookingEvent::BookingCancelled { id } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "status": BookingStatus::Cancelled.to_string()})],
                        Some("id"),
                    )
                    .await?
            }
            BookingEvent::MarkedNoShow { id, .. } => {
                index
                    .add_or_update(
                        &[json!({"id": *id, "status": BookingStatus::NoShow.to_string()})],
                        Some("id"),
                    )
                    .await?
            }
        };
        self.task_info = Some(task);
        Ok(())
    }
}
