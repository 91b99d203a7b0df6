//! The front desk: write-side coordination of bookings.
//!
//! Availability reads are advisory. Every booking re-derives the slot from
//! current state and then claims it on the provider's day ledger with a
//! revision-conditional append, so two customers racing for the last slot
//! cannot both win no matter what their screens showed.

use std::ops::Range;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, LocalResult, NaiveDate, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use super::availability::{merge, provider_free_starts, Slot};
use super::core::{
    AddOnId, AddOnRepository, Booking, BookingCustomer, BookingError, BookingId,
    BookingRepository, BookingStatus, DayKey, Money, Provider, ProviderDay, ProviderDayError,
    ProviderDayId, ProviderDayRepository, ProviderId, ProviderRepository, ReservedInterval,
    Schedule, ScheduleId, ScheduleRepository, Service, ServiceId, ServiceRepository, ShopId,
    ShopRepository, TimezoneId,
};
use super::{DataAccessError, Entity, ID_GENERATOR};

/// Bookings may be placed at most this far ahead. Keeps the ledger scan on
/// provider retirement bounded.
pub const MAX_ADVANCE_DAYS: i64 = 90;

pub struct Desk {
    shops: Arc<dyn ShopRepository + Send + Sync>,
    schedules: Arc<dyn ScheduleRepository + Send + Sync>,
    providers: Arc<dyn ProviderRepository + Send + Sync>,
    services: Arc<dyn ServiceRepository + Send + Sync>,
    add_ons: Arc<dyn AddOnRepository + Send + Sync>,
    bookings: Arc<dyn BookingRepository + Send + Sync>,
    days: Arc<dyn ProviderDayRepository + Send + Sync>,
    commit_attempts: u32,
}

/// A booking request as it comes in from the customer.
#[derive(Clone, Debug)]
pub struct BookingOrder {
    pub shop_id: ShopId,
    pub service_id: ServiceId,
    pub add_on_ids: Vec<AddOnId>,
    /// None asks the desk to pick a provider.
    pub provider_id: Option<ProviderId>,
    pub customer: BookingCustomer,
    /// The wall-clock start the customer chose, offset included.
    pub start_at: DateTime<FixedOffset>,
    /// Client-supplied key making retries of the same request safe.
    pub idempotency_key: Option<String>,
}

/// What the desk hands back for a committed booking.
#[derive(Clone, Debug)]
pub struct BookingReceipt {
    pub booking_id: BookingId,
    pub provider_id: ProviderId,
    pub status: BookingStatus,
    pub timezone: TimezoneId,
    pub start: DateTime<Tz>,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub price: Money,
}

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("No such {0}")]
    NotFound(&'static str),
    #[error("{0}")]
    InvalidInput(String),
    #[error("The shop has no schedule attached yet")]
    ShopNotReady,
    #[error("The requested time cannot be booked")]
    InvalidTime,
    #[error("No provider can take this booking")]
    NoProviderAvailable,
    #[error("The provider still has upcoming bookings")]
    ProviderHasFutureBookings,
    #[error(transparent)]
    Transition(#[from] BookingError),
    #[error(transparent)]
    Store(#[from] DataAccessError),
}

struct Menu {
    tz: Tz,
    shop_schedule_id: ScheduleId,
    total_minutes: u32,
    price: Money,
}

/// Whether `offset` is one the zone observes around `at`. Tells a shop-local
/// wall-clock claim apart from the same instant written in a foreign offset.
fn zone_uses_offset(tz: Tz, at: DateTime<Utc>, offset: FixedOffset) -> bool {
    let day = Duration::days(1);
    [at - day, at, at + day]
        .into_iter()
        .any(|t| tz.offset_from_utc_datetime(&t.naive_utc()).fix() == offset)
}

impl Desk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shops: Arc<dyn ShopRepository + Send + Sync>,
        schedules: Arc<dyn ScheduleRepository + Send + Sync>,
        providers: Arc<dyn ProviderRepository + Send + Sync>,
        services: Arc<dyn ServiceRepository + Send + Sync>,
        add_ons: Arc<dyn AddOnRepository + Send + Sync>,
        bookings: Arc<dyn BookingRepository + Send + Sync>,
        days: Arc<dyn ProviderDayRepository + Send + Sync>,
        commit_attempts: u32,
    ) -> Self {
        Self {
            shops,
            schedules,
            providers,
            services,
            add_ons,
            bookings,
            days,
            commit_attempts: commit_attempts.max(1),
        }
    }

    /// Bookable starts on `date` for a service, optionally restricted to one
    /// provider, with a per-start count of open providers. The shop timezone
    /// comes back alongside so a closed day still renders correctly.
    pub async fn availability(
        &self,
        shop_id: ShopId,
        service_id: ServiceId,
        add_on_ids: &[AddOnId],
        date: NaiveDate,
        provider_id: Option<ProviderId>,
        now: DateTime<Utc>,
    ) -> Result<(TimezoneId, Vec<Slot>), DeskError> {
        let (menu, candidates) = self
            .resolve(shop_id, service_id, add_on_ids, provider_id, false)
            .await?;
        let mut per_provider = Vec::with_capacity(candidates.len());
        for provider in &candidates {
            let schedule = self.schedule_for(provider, menu.shop_schedule_id).await?;
            let reserved = self.reserved_for(provider.id(), date).await?;
            let starts = provider_free_starts(&schedule, date, menu.total_minutes, &reserved, now);
            per_provider.push((provider.id(), starts));
        }
        Ok((TimezoneId::from(menu.tz), merge(&per_provider, menu.tz)))
    }

    /// Take a booking. The chosen slot is revalidated against live state and
    /// claimed atomically; on a revision conflict the whole attempt is
    /// replayed against fresh ledgers.
    pub async fn create(
        &self,
        order: BookingOrder,
        now: DateTime<Utc>,
    ) -> Result<BookingReceipt, DeskError> {
        let (menu, candidates) = self
            .resolve(
                order.shop_id,
                order.service_id,
                &order.add_on_ids,
                order.provider_id,
                true,
            )
            .await?;

        // Bad input is turned away before anything is written.
        order
            .customer
            .validate()
            .map_err(|e| DeskError::InvalidInput(e.to_string()))?;

        // The claimed wall time has to exist on the shop's clock, but only a
        // request phrased in shop-local terms can claim a nonexistent one. A
        // valid instant sent in some other offset is taken at face value.
        if let LocalResult::None = menu.tz.from_local_datetime(&order.start_at.naive_local()) {
            let claimed = *order.start_at.offset();
            if zone_uses_offset(menu.tz, order.start_at.with_timezone(&Utc), claimed) {
                return Err(DeskError::InvalidTime);
            }
        }

        let start_utc = order.start_at.with_timezone(&Utc);
        if start_utc < now {
            return Err(DeskError::InvalidTime);
        }
        if start_utc > now + Duration::days(MAX_ADVANCE_DAYS) {
            return Err(DeskError::InvalidInput(format!(
                "bookings open at most {MAX_ADVANCE_DAYS} days ahead"
            )));
        }

        let end_utc = start_utc + Duration::minutes(menu.total_minutes as i64);
        let date = start_utc.with_timezone(&menu.tz).date_naive();

        for _attempt in 0..self.commit_attempts {
            let mut ledgers = Vec::with_capacity(candidates.len());
            for provider in &candidates {
                let id = ProviderDayId::from(DayKey::new(provider.id(), date));
                let ledger = match self.days.find_by_id(id).await? {
                    Some(day) => day,
                    None => ProviderDay::open(id),
                };
                ledgers.push((provider, ledger));
            }

            // A retried request that already went through must not book twice.
            if let Some(key) = order.idempotency_key.as_deref() {
                for (_, ledger) in &ledgers {
                    if let Some(held) = ledger.find_by_key(key) {
                        return self.receipt_for(held.booking_id, &menu).await;
                    }
                }
            }

            // Least-loaded provider first, provider id breaking ties, so
            // auto-assignment is deterministic and spreads the day's work.
            ledgers.sort_by_key(|(p, ledger)| (ledger.reserved().len(), *p.id()));

            let mut conflicted = false;
            for (provider, ledger) in ledgers {
                let schedule = self.schedule_for(provider, menu.shop_schedule_id).await?;
                let reserved: Vec<Range<DateTime<Utc>>> =
                    ledger.reserved().iter().map(|r| r.time.clone()).collect();
                let free =
                    provider_free_starts(&schedule, date, menu.total_minutes, &reserved, now);
                if !free.contains(&start_utc) {
                    continue;
                }

                let booking_id: BookingId = ID_GENERATOR.generate();
                // Built before the ledger append so a rejected booking
                // cannot leave a claim behind.
                let mut booking = Booking::create(
                    booking_id,
                    order.shop_id,
                    order.service_id,
                    order.add_on_ids.clone(),
                    provider.id(),
                    order.customer.clone(),
                    start_utc..end_utc,
                )
                .map_err(|e| DeskError::InvalidInput(e.to_string()))?;

                let mut ledger = ledger;
                match ledger.reserve(ReservedInterval {
                    booking_id,
                    time: start_utc..end_utc,
                    idempotency_key: order.idempotency_key.clone(),
                }) {
                    Ok(()) => {}
                    Err(ProviderDayError::OverlappingInterval) => continue,
                    Err(e) => return Err(DeskError::InvalidInput(e.to_string())),
                }

                match self.days.save(&mut ledger).await {
                    Ok(_) => {
                        self.bookings.save(&mut booking).await?;
                        return Ok(BookingReceipt {
                            booking_id,
                            provider_id: provider.id(),
                            status: booking.status(),
                            timezone: TimezoneId::from(menu.tz),
                            start: start_utc.with_timezone(&menu.tz),
                            start_utc,
                            end_utc,
                            price: menu.price,
                        });
                    }
                    Err(DataAccessError::WriteError(_)) => {
                        // Someone else appended to this ledger first. Start
                        // the attempt over with fresh state.
                        conflicted = true;
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if !conflicted {
                return Err(DeskError::NoProviderAvailable);
            }
        }
        Err(DeskError::NoProviderAvailable)
    }

    pub async fn confirm(&self, booking_id: BookingId) -> Result<BookingStatus, DeskError> {
        let mut booking = self.booking(booking_id).await?;
        booking.confirm()?;
        self.bookings.save(&mut booking).await?;
        Ok(booking.status())
    }

    pub async fn complete(&self, booking_id: BookingId) -> Result<BookingStatus, DeskError> {
        let mut booking = self.booking(booking_id).await?;
        booking.complete()?;
        self.bookings.save(&mut booking).await?;
        Ok(booking.status())
    }

    /// Cancel a booking and give its interval back to the provider's day.
    pub async fn cancel(&self, booking_id: BookingId) -> Result<BookingStatus, DeskError> {
        let mut booking = self.booking(booking_id).await?;
        booking.cancel()?;
        self.bookings.save(&mut booking).await?;

        let shop = self
            .shops
            .find_by_id(booking.shop_id())
            .await?
            .ok_or(DeskError::NotFound("shop"))?;
        let date = booking
            .time()
            .start
            .with_timezone(&shop.timezone().tz())
            .date_naive();
        let id = ProviderDayId::from(DayKey::new(booking.provider_id(), date));
        for _attempt in 0..self.commit_attempts {
            let Some(mut ledger) = self.days.find_by_id(id).await? else {
                break;
            };
            match ledger.release(booking_id) {
                Ok(()) => {}
                Err(ProviderDayError::IntervalNotFound) => break,
                Err(e) => return Err(DeskError::InvalidInput(e.to_string())),
            }
            match self.days.save(&mut ledger).await {
                Ok(_) => break,
                Err(DataAccessError::WriteError(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(booking.status())
    }

    pub async fn mark_no_show(
        &self,
        booking_id: BookingId,
        now: DateTime<Utc>,
    ) -> Result<BookingStatus, DeskError> {
        let mut booking = self.booking(booking_id).await?;
        booking.mark_no_show(now)?;
        self.bookings.save(&mut booking).await?;
        Ok(booking.status())
    }

    /// Retire a provider. Refused while any of their upcoming days still
    /// holds a claim ending after `now`; the booking horizon bounds the scan.
    pub async fn retire_provider(
        &self,
        provider_id: ProviderId,
        now: DateTime<Utc>,
    ) -> Result<(), DeskError> {
        let mut provider = self
            .providers
            .find_by_id(provider_id)
            .await?
            .ok_or(DeskError::NotFound("provider"))?;
        let shop = self
            .shops
            .find_by_id(provider.shop_id())
            .await?
            .ok_or(DeskError::NotFound("shop"))?;
        let today = now.with_timezone(&shop.timezone().tz()).date_naive();
        for offset in 0..=MAX_ADVANCE_DAYS {
            let date = today + Duration::days(offset);
            let id = ProviderDayId::from(DayKey::new(provider_id, date));
            if let Some(ledger) = self.days.find_by_id(id).await? {
                if ledger.reserved().iter().any(|r| r.time.end > now) {
                    return Err(DeskError::ProviderHasFutureBookings);
                }
            }
        }
        provider
            .retire()
            .map_err(|e| DeskError::InvalidInput(e.to_string()))?;
        self.providers.save(&mut provider).await?;
        Ok(())
    }

    async fn booking(&self, booking_id: BookingId) -> Result<Booking, DeskError> {
        self.bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(DeskError::NotFound("booking"))
    }

    /// Load the shop's menu context and the providers eligible for the
    /// request. With `for_assignment` set, unnamed requests only consider
    /// providers who opted into auto-assignment.
    async fn resolve(
        &self,
        shop_id: ShopId,
        service_id: ServiceId,
        add_on_ids: &[AddOnId],
        provider_id: Option<ProviderId>,
        for_assignment: bool,
    ) -> Result<(Menu, Vec<Provider>), DeskError> {
        let shop = self
            .shops
            .find_by_id(shop_id)
            .await?
            .ok_or(DeskError::NotFound("shop"))?;
        let shop_schedule_id = shop.schedule_id().ok_or(DeskError::ShopNotReady)?;

        let service = self
            .services
            .find_by_id(service_id)
            .await?
            .filter(|s| s.shop_id() == shop_id)
            .ok_or(DeskError::NotFound("service"))?;
        let (total_minutes, price) = self.tally(&service, add_on_ids, shop_id).await?;

        let candidates = match provider_id {
            Some(provider_id) => {
                if !shop.provider_ids().contains(&provider_id) {
                    return Err(DeskError::NotFound("provider"));
                }
                let provider = self
                    .providers
                    .find_by_id(provider_id)
                    .await?
                    .ok_or(DeskError::NotFound("provider"))?;
                if !provider.is_active() || !provider.performs(service_id) {
                    return Err(DeskError::NoProviderAvailable);
                }
                vec![provider]
            }
            None => {
                let mut candidates = Vec::new();
                for id in shop.provider_ids() {
                    if let Some(provider) = self.providers.find_by_id(*id).await? {
                        let eligible = provider.is_active()
                            && provider.performs(service_id)
                            && (!for_assignment || provider.accepts_unassigned());
                        if eligible {
                            candidates.push(provider);
                        }
                    }
                }
                if candidates.is_empty() {
                    return Err(DeskError::NoProviderAvailable);
                }
                candidates
            }
        };

        Ok((
            Menu {
                tz: shop.timezone().tz(),
                shop_schedule_id,
                total_minutes,
                price,
            },
            candidates,
        ))
    }

    /// Total chair time and price for a service plus its add-ons.
    async fn tally(
        &self,
        service: &Service,
        add_on_ids: &[AddOnId],
        shop_id: ShopId,
    ) -> Result<(u32, Money), DeskError> {
        let mut total_minutes = service.duration_minutes();
        let mut price = service.price();
        for id in add_on_ids {
            let add_on = self
                .add_ons
                .find_by_id(*id)
                .await?
                .filter(|a| a.shop_id() == shop_id)
                .ok_or(DeskError::NotFound("add-on"))?;
            total_minutes += add_on.duration_minutes();
            price = price.add(&add_on.price()).ok_or_else(|| {
                DeskError::InvalidInput("cannot total the service and add-on prices".to_owned())
            })?;
        }
        Ok((total_minutes, price))
    }

    async fn schedule_for(
        &self,
        provider: &Provider,
        shop_schedule_id: ScheduleId,
    ) -> Result<Schedule, DeskError> {
        let id = provider.schedule_id().unwrap_or(shop_schedule_id);
        self.schedules
            .find_by_id(id)
            .await?
            .ok_or(DeskError::ShopNotReady)
    }

    async fn reserved_for(
        &self,
        provider_id: ProviderId,
        date: NaiveDate,
    ) -> Result<Vec<Range<DateTime<Utc>>>, DeskError> {
        let id = ProviderDayId::from(DayKey::new(provider_id, date));
        Ok(match self.days.find_by_id(id).await? {
            Some(ledger) => ledger.reserved().iter().map(|r| r.time.clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn receipt_for(
        &self,
        booking_id: BookingId,
        menu: &Menu,
    ) -> Result<BookingReceipt, DeskError> {
        let booking = self.booking(booking_id).await?;
        Ok(BookingReceipt {
            booking_id,
            provider_id: booking.provider_id(),
            status: booking.status(),
            timezone: TimezoneId::from(menu.tz),
            start: booking.time().start.with_timezone(&menu.tz),
            start_utc: booking.time().start,
            end_utc: booking.time().end,
            price: menu.price,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Weekday};

    use super::super::core::{AddOn, Currency, Shop, Window};
    use super::*;

    #[derive(Default)]
    struct MemStore<I, T> {
        items: Mutex<HashMap<I, T>>,
    }

    macro_rules! mem_repository {
        ($repo:ident, $store:ident, $id:ty, $entity:ty) => {
            struct $store(MemStore<$id, $entity>);

            impl $store {
                fn new() -> Arc<Self> {
                    Arc::new(Self(MemStore {
                        items: Mutex::new(HashMap::new()),
                    }))
                }

                fn put(&self, entity: $entity) {
                    self.0.items.lock().unwrap().insert(entity.id(), entity);
                }
            }

            #[async_trait]
            impl $repo for $store {
                async fn find_by_id(&self, id: $id) -> Result<Option<$entity>, DataAccessError> {
                    Ok(self.0.items.lock().unwrap().get(&id).cloned())
                }

                async fn save(&self, entity: &mut $entity) -> Result<bool, DataAccessError> {
                    self.0
                        .items
                        .lock()
                        .unwrap()
                        .insert(entity.id(), entity.clone());
                    Ok(true)
                }

                async fn delete(&self, entity: &mut $entity) -> Result<bool, DataAccessError> {
                    Ok(self.0.items.lock().unwrap().remove(&entity.id()).is_some())
                }
            }
        };
    }

    mem_repository!(ShopRepository, MemShops, ShopId, Shop);
    mem_repository!(ScheduleRepository, MemSchedules, ScheduleId, Schedule);
    mem_repository!(ProviderRepository, MemProviders, ProviderId, Provider);
    mem_repository!(ServiceRepository, MemServices, ServiceId, Service);
    mem_repository!(AddOnRepository, MemAddOns, AddOnId, AddOn);
    mem_repository!(BookingRepository, MemBookings, BookingId, Booking);

    /// Day ledgers with revision CAS, plus a fault switch that makes the
    /// next saves fail the way a lost optimistic append does.
    #[derive(Default)]
    struct MemDays {
        items: Mutex<HashMap<ProviderDayId, (u64, ProviderDay)>>,
        fail_next: AtomicU32,
    }

    impl MemDays {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    #[async_trait]
    impl ProviderDayRepository for MemDays {
        async fn find_by_id(
            &self,
            id: ProviderDayId,
        ) -> Result<Option<ProviderDay>, DataAccessError> {
            Ok(self.items.lock().unwrap().get(&id).map(|(rev, day)| {
                let mut day = day.clone();
                day.set_revision(*rev);
                day
            }))
        }

        async fn save(&self, entity: &mut ProviderDay) -> Result<bool, DataAccessError> {
            let conflict = || {
                DataAccessError::WriteError(Box::<dyn std::error::Error + Send + Sync>::from(
                    "wrong expected revision",
                ))
            };
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(conflict());
            }
            let mut items = self.items.lock().unwrap();
            let stored = items.get(&entity.id()).map(|(rev, _)| *rev);
            if stored != entity.revision() {
                return Err(conflict());
            }
            let next = stored.map(|r| r + 1).unwrap_or(0);
            entity.set_revision(next);
            items.insert(entity.id(), (next, entity.clone()));
            Ok(true)
        }

        async fn delete(&self, entity: &mut ProviderDay) -> Result<bool, DataAccessError> {
            Ok(self.items.lock().unwrap().remove(&entity.id()).is_some())
        }
    }

    struct Fixture {
        desk: Desk,
        days: Arc<MemDays>,
    }

    const NY: &str = "America/New_York";

    /// Bob's Barbershop: Monday 09:00 to 17:00 on a 30 minute grid, one
    /// 30 minute haircut, providers 1 and 2 both qualified.
    fn fixture() -> Fixture {
        let shops = MemShops::new();
        let schedules = MemSchedules::new();
        let providers = MemProviders::new();
        let services = MemServices::new();
        let add_ons = MemAddOns::new();
        let bookings = MemBookings::new();
        let days = MemDays::new();

        let mut schedule =
            Schedule::create(ScheduleId::from(100), NY.parse().unwrap(), 30).unwrap();
        schedule
            .add_window(Weekday::Mon, Window::new(540, 1020))
            .unwrap();
        schedules.put(schedule);

        let mut shop =
            Shop::open(ShopId::from(1), "Bob's Barbershop".to_owned(), NY.parse().unwrap())
                .unwrap();
        shop.attach_schedule(ScheduleId::from(100));
        shop.enroll_provider(ProviderId::from(1)).unwrap();
        shop.enroll_provider(ProviderId::from(2)).unwrap();
        shops.put(shop);

        for id in [1u64, 2] {
            let mut provider =
                Provider::join(ProviderId::from(id), ShopId::from(1), format!("Barber {id}"))
                    .unwrap();
            provider.qualify(ServiceId::from(10)).unwrap();
            providers.put(provider);
        }

        services.put(
            Service::list(
                ServiceId::from(10),
                ShopId::from(1),
                "Haircut".to_owned(),
                String::new(),
                30,
                Money::new(3500, Currency::USD),
            )
            .unwrap(),
        );
        add_ons.put(
            AddOn::list(
                AddOnId::from(20),
                ShopId::from(1),
                "Hot towel".to_owned(),
                String::new(),
                15,
                Money::new(500, Currency::USD),
            )
            .unwrap(),
        );

        let desk = Desk::new(
            shops,
            schedules,
            providers,
            services,
            add_ons,
            bookings,
            days.clone(),
            3,
        );
        Fixture { desk, days }
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn now() -> DateTime<Utc> {
        // Sunday evening before the test Monday.
        Utc.with_ymd_and_hms(2026, 5, 31, 20, 0, 0).unwrap()
    }

    fn order_at(hour: u32, minute: u32) -> BookingOrder {
        // June: America/New_York is UTC-4.
        let start_at = FixedOffset::west_opt(4 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 6, 1, hour, minute, 0)
            .unwrap();
        BookingOrder {
            shop_id: ShopId::from(1),
            service_id: ServiceId::from(10),
            add_on_ids: vec![],
            provider_id: None,
            customer: BookingCustomer::WalkIn {
                name: "Sam".to_owned(),
                phone: "555-0100".to_owned(),
            },
            start_at,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_availability_counts_both_providers() {
        let f = fixture();
        let (timezone, slots) = f
            .desk
            .availability(ShopId::from(1), ServiceId::from(10), &[], monday(), None, now())
            .await
            .unwrap();
        assert_eq!(timezone.to_string(), "America/New_York");
        assert_eq!(slots.len(), 16);
        assert!(slots.iter().all(|s| s.open_providers == 2));
        assert_eq!(slots[0].start.to_rfc3339(), "2026-06-01T09:00:00-04:00");
        assert_eq!(slots[0].start_utc, slots[0].start.with_timezone(&Utc));
    }

    #[tokio::test]
    async fn test_every_offered_slot_is_bookable() {
        let f = fixture();
        let (_, slots) = f
            .desk
            .availability(ShopId::from(1), ServiceId::from(10), &[], monday(), None, now())
            .await
            .unwrap();
        for slot in slots {
            let mut order = order_at(0, 0);
            order.start_at = slot.start.fixed_offset();
            let receipt = f.desk.create(order, now()).await.unwrap();
            assert_eq!(receipt.start_utc, slot.start_utc);
        }
    }

    #[tokio::test]
    async fn test_create_assigns_least_loaded_then_lowest_id() {
        let f = fixture();
        // Tie on load: lowest id wins.
        let first = f.desk.create(order_at(10, 0), now()).await.unwrap();
        assert_eq!(first.provider_id, ProviderId::from(1));
        // Provider 1 now has one booking, so the same slot goes to 2.
        let second = f.desk.create(order_at(10, 0), now()).await.unwrap();
        assert_eq!(second.provider_id, ProviderId::from(2));
        // Both chairs taken at 10:00.
        let err = f.desk.create(order_at(10, 0), now()).await.unwrap_err();
        assert!(matches!(err, DeskError::NoProviderAvailable));
    }

    #[tokio::test]
    async fn test_named_provider_conflict() {
        let f = fixture();
        let mut order = order_at(11, 0);
        order.provider_id = Some(ProviderId::from(2));
        f.desk.create(order.clone(), now()).await.unwrap();
        let err = f.desk.create(order, now()).await.unwrap_err();
        assert!(matches!(err, DeskError::NoProviderAvailable));
    }

    #[tokio::test]
    async fn test_add_on_extends_the_hold() {
        let f = fixture();
        let mut order = order_at(10, 0);
        order.provider_id = Some(ProviderId::from(1));
        order.add_on_ids = vec![AddOnId::from(20)];
        let receipt = f.desk.create(order, now()).await.unwrap();
        assert_eq!(receipt.end_utc - receipt.start_utc, Duration::minutes(45));
        assert_eq!(format!("{}", receipt.price), "$4,000");
        // 10:30 now collides with the 45 minute hold.
        let mut next = order_at(10, 30);
        next.provider_id = Some(ProviderId::from(1));
        assert!(matches!(
            f.desk.create(next, now()).await.unwrap_err(),
            DeskError::NoProviderAvailable
        ));
    }

    #[tokio::test]
    async fn test_idempotent_retry_returns_same_booking() {
        let f = fixture();
        let mut order = order_at(14, 0);
        order.idempotency_key = Some("req-1".to_owned());
        let first = f.desk.create(order.clone(), now()).await.unwrap();
        let retry = f.desk.create(order, now()).await.unwrap();
        assert_eq!(first.booking_id, retry.booking_id);
        assert_eq!(first.provider_id, retry.provider_id);
    }

    #[tokio::test]
    async fn test_commit_retries_after_lost_race() {
        let f = fixture();
        f.days.fail_next.store(1, Ordering::SeqCst);
        let receipt = f.desk.create(order_at(9, 0), now()).await.unwrap();
        assert_eq!(receipt.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_frees_the_slot() {
        let f = fixture();
        let mut order = order_at(15, 0);
        order.provider_id = Some(ProviderId::from(1));
        let receipt = f.desk.create(order.clone(), now()).await.unwrap();
        let status = f.desk.cancel(receipt.booking_id).await.unwrap();
        assert_eq!(status, BookingStatus::Cancelled);
        // Same provider, same slot, bookable again.
        f.desk.create(order, now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_off_grid_and_past_times_rejected() {
        let f = fixture();
        assert!(matches!(
            f.desk.create(order_at(10, 10), now()).await.unwrap_err(),
            DeskError::NoProviderAvailable
        ));
        // 10:00 Monday morning, asked for at 16:00 UTC Monday (noon local).
        let late_now = Utc.with_ymd_and_hms(2026, 6, 1, 16, 0, 0).unwrap();
        assert!(matches!(
            f.desk.create(order_at(10, 0), late_now).await.unwrap_err(),
            DeskError::InvalidTime
        ));
    }

    #[tokio::test]
    async fn test_blank_walk_in_name_leaves_no_claim_behind() {
        let f = fixture();
        let mut order = order_at(10, 0);
        order.customer = BookingCustomer::WalkIn {
            name: " ".to_owned(),
            phone: String::new(),
        };
        assert!(matches!(
            f.desk.create(order, now()).await.unwrap_err(),
            DeskError::InvalidInput(_)
        ));
        // Both chairs must still be open at 10:00.
        f.desk.create(order_at(10, 0), now()).await.unwrap();
        f.desk.create(order_at(10, 0), now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_spring_forward_gap_start_rejected() {
        let f = fixture();
        // 02:30 does not exist on 2026-03-08 in New York; a client claiming
        // that wall time with the pre-transition offset is refused.
        let start_at = FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 8, 2, 30, 0)
            .unwrap();
        let mut order = order_at(10, 0);
        order.start_at = start_at;
        let early = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            f.desk.create(order, early).await.unwrap_err(),
            DeskError::InvalidTime
        ));
    }

    #[tokio::test]
    async fn test_foreign_offset_instant_is_not_a_gap_claim() {
        let f = fixture();
        // 2026-03-08T02:30Z is Saturday 21:30 in New York. Its UTC wall
        // clock happens to match the spring-forward gap, but the request is
        // not shop-local, so it gets the ordinary no-slot answer.
        let start_at = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 8, 2, 30, 0)
            .unwrap();
        let mut order = order_at(10, 0);
        order.start_at = start_at;
        let early = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            f.desk.create(order, early).await.unwrap_err(),
            DeskError::NoProviderAvailable
        ));
    }

    #[tokio::test]
    async fn test_booking_lifecycle_through_desk() {
        let f = fixture();
        let receipt = f.desk.create(order_at(13, 0), now()).await.unwrap();
        assert_eq!(
            f.desk.confirm(receipt.booking_id).await.unwrap(),
            BookingStatus::Confirmed
        );
        let after = Utc.with_ymd_and_hms(2026, 6, 1, 23, 0, 0).unwrap();
        assert_eq!(
            f.desk.mark_no_show(receipt.booking_id, after).await.unwrap(),
            BookingStatus::NoShow
        );
        assert!(matches!(
            f.desk.complete(receipt.booking_id).await.unwrap_err(),
            DeskError::Transition(_)
        ));
    }

    #[tokio::test]
    async fn test_retire_blocked_by_future_booking() {
        let f = fixture();
        let mut order = order_at(10, 0);
        order.provider_id = Some(ProviderId::from(2));
        let receipt = f.desk.create(order, now()).await.unwrap();
        assert!(matches!(
            f.desk
                .retire_provider(ProviderId::from(2), now())
                .await
                .unwrap_err(),
            DeskError::ProviderHasFutureBookings
        ));
        f.desk.cancel(receipt.booking_id).await.unwrap();
        f.desk
            .retire_provider(ProviderId::from(2), now())
            .await
            .unwrap();
        // A retired provider no longer shows up in availability.
        let (_, slots) = f
            .desk
            .availability(ShopId::from(1), ServiceId::from(10), &[], monday(), None, now())
            .await
            .unwrap();
        assert!(slots.iter().all(|s| s.open_providers == 1));
    }
}
