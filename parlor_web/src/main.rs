use std::error::Error;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use eventstore::ClientSettings;
use parlor::{
    domain::reserve::{BookingOrder, BookingReceipt, Desk, DeskError},
    domain::core::{
        AddOnId, BookingCustomer, BookingId, BookingStatus, CustomerId, ProviderId, ServiceId,
        ShopId,
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
use tracing::{error, info, Level};

#[tokio::main]
async fn main() {
    match ParlorConfig::load() {
        Ok(config) => {
            tracing_subscriber::fmt()
                .with_max_level(Level::from(&config.logger.level))
                .init();
            if let Err(error) = serve(&config).await {
                error!("application error: {}", error);
            }
        }
        Err(error) => {
            tracing_subscriber::fmt::init();
            error!("application error: {}", error)
        }
    }
}

async fn serve(config: &ParlorConfig) -> Result<(), Box<dyn Error>> {
    let settings = config.eventstore.url.parse::<ClientSettings>()?;
    let client = eventstore::Client::new(settings)?;
    let desk = Arc::new(Desk::new(
        Arc::new(EventStoreShopRepository::new(client.clone())),
        Arc::new(EventStoreScheduleRepository::new(client.clone())),
        Arc::new(EventStoreProviderRepository::new(client.clone())),
        Arc::new(EventStoreServiceRepository::new(client.clone())),
        Arc::new(EventStoreAddOnRepository::new(client.clone())),
        Arc::new(EventStoreBookingRepository::new(client.clone())),
        Arc::new(EventStoreProviderDayRepository::new(client)),
        config.booking.commit_attempts,
    ));

    let app = Router::new()
        .route("/availability", get(availability))
        .route("/bookings", post(create_booking))
        .route("/bookings/:id/confirm", post(confirm_booking))
        .route("/bookings/:id/cancel", post(cancel_booking))
        .route("/bookings/:id/complete", post(complete_booking))
        .route("/bookings/:id/no_show", post(no_show_booking))
        .route("/providers/:id/retire", post(retire_provider))
        .with_state(desk);

    let tls = RustlsConfig::from_pem_file(&config.web.cert, &config.web.key).await?;
    let addr = config.web.bind.parse()?;
    info!("listening on {}", addr);
    axum_server::bind_rustls(addr, tls)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

#[derive(Deserialize)]
struct AvailabilityQuery {
    shop_id: u64,
    service_id: u64,
    date: NaiveDate,
    provider_id: Option<u64>,
    /// Comma-separated add-on ids.
    add_on_ids: Option<String>,
}

#[derive(Serialize)]
struct SlotView {
    start_at: String,
    start_at_utc: String,
    availability_count: u32,
}

#[derive(Serialize)]
struct AvailabilityView {
    date: NaiveDate,
    timezone_id: String,
    available_slots: Vec<SlotView>,
}

async fn availability(
    State(desk): State<Arc<Desk>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityView>, ApiError> {
    let add_on_ids = parse_add_on_ids(query.add_on_ids.as_deref())?;
    let (timezone, slots) = desk
        .availability(
            ShopId::from(query.shop_id),
            ServiceId::from(query.service_id),
            &add_on_ids,
            query.date,
            query.provider_id.map(ProviderId::from),
            Utc::now(),
        )
        .await?;
    Ok(Json(AvailabilityView {
        date: query.date,
        timezone_id: timezone.to_string(),
        available_slots: slots
            .into_iter()
            .map(|s| SlotView {
                start_at: s.start.to_rfc3339(),
                start_at_utc: s.start_utc.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                availability_count: s.open_providers,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
struct BookingRequest {
    shop_id: u64,
    service_id: u64,
    #[serde(default)]
    add_on_ids: Vec<u64>,
    provider_id: Option<u64>,
    customer: CustomerPayload,
    start_at: DateTime<FixedOffset>,
    idempotency_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CustomerPayload {
    Registered {
        customer_id: u64,
    },
    WalkIn {
        name: String,
        #[serde(default)]
        phone: String,
    },
}

impl From<CustomerPayload> for BookingCustomer {
    fn from(value: CustomerPayload) -> Self {
        match value {
            CustomerPayload::Registered { customer_id } => BookingCustomer::Registered {
                customer_id: CustomerId::from(customer_id),
            },
            CustomerPayload::WalkIn { name, phone } => BookingCustomer::WalkIn { name, phone },
        }
    }
}

#[derive(Serialize)]
struct BookingView {
    booking_id: String,
    provider_id: String,
    status: String,
    timezone_id: String,
    start_at: String,
    start_at_utc: String,
    end_at_utc: String,
    price: String,
}

impl From<BookingReceipt> for BookingView {
    fn from(value: BookingReceipt) -> Self {
        Self {
            booking_id: value.booking_id.to_string(),
            provider_id: value.provider_id.to_string(),
            status: value.status.to_string(),
            timezone_id: value.timezone.to_string(),
            start_at: value.start.to_rfc3339(),
            start_at_utc: value.start_utc.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            end_at_utc: value.end_utc.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            price: value.price.to_string(),
        }
    }
}

async fn create_booking(
    State(desk): State<Arc<Desk>>,
    Json(request): Json<BookingRequest>,
) -> Result<(StatusCode, Json<BookingView>), ApiError> {
    let order = BookingOrder {
        shop_id: ShopId::from(request.shop_id),
        service_id: ServiceId::from(request.service_id),
        add_on_ids: request.add_on_ids.into_iter().map(AddOnId::from).collect(),
        provider_id: request.provider_id.map(ProviderId::from),
        customer: request.customer.into(),
        start_at: request.start_at,
        idempotency_key: request.idempotency_key,
    };
    let receipt = desk.create(order, Utc::now()).await?;
    info!(
        "booking {} taken for provider {}",
        receipt.booking_id, receipt.provider_id
    );
    Ok((StatusCode::CREATED, Json(receipt.into())))
}

async fn confirm_booking(
    State(desk): State<Arc<Desk>>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = desk.confirm(BookingId::from(id)).await?;
    Ok(status_view(id, status))
}

async fn cancel_booking(
    State(desk): State<Arc<Desk>>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = desk.cancel(BookingId::from(id)).await?;
    Ok(status_view(id, status))
}

async fn complete_booking(
    State(desk): State<Arc<Desk>>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = desk.complete(BookingId::from(id)).await?;
    Ok(status_view(id, status))
}

async fn no_show_booking(
    State(desk): State<Arc<Desk>>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = desk.mark_no_show(BookingId::from(id), Utc::now()).await?;
    Ok(status_view(id, status))
}

async fn retire_provider(
    State(desk): State<Arc<Desk>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    desk.retire_provider(ProviderId::from(id), Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn status_view(id: u64, status: BookingStatus) -> Json<serde_json::Value> {
    Json(json!({ "booking_id": id.to_string(), "status": status.to_string() }))
}

fn parse_add_on_ids(raw: Option<&str>) -> Result<Vec<AddOnId>, ApiError> {
    match raw {
        None => Ok(Vec::new()),
        Some(raw) => raw
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.trim()
                    .parse::<u64>()
                    .map(AddOnId::from)
                    .map_err(|_| ApiError(DeskError::InvalidInput("bad add-on id".to_owned())))
            })
            .collect(),
    }
}

struct ApiError(DeskError);

impl From<DeskError> for ApiError {
    fn from(value: DeskError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            DeskError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            DeskError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            DeskError::ShopNotReady => (StatusCode::BAD_REQUEST, "SHOP_NOT_READY"),
            DeskError::InvalidTime => (StatusCode::BAD_REQUEST, "INVALID_TIME"),
            DeskError::NoProviderAvailable => (StatusCode::CONFLICT, "NO_PROVIDER_AVAILABLE"),
            DeskError::ProviderHasFutureBookings => {
                (StatusCode::CONFLICT, "PROVIDER_HAS_FUTURE_BOOKINGS")
            }
            DeskError::Transition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            DeskError::Store(_) => {
                error!("storage error: {}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_payload_shape() {
        let view = AvailabilityView {
            date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            timezone_id: "America/New_York".to_owned(),
            available_slots: vec![SlotView {
                start_at: "2026-06-01T09:00:00-04:00".to_owned(),
                start_at_utc: "2026-06-01T13:00:00Z".to_owned(),
                availability_count: 2,
            }],
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["available_slots"][0]["availability_count"], 2);
        assert_eq!(json["timezone_id"], "America/New_York");
    }
}
