use std::{error::Error, net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use encore::{
    application::{
        booking::{BookingDecision, BookingService},
        wallet::{WalletAction, WalletReceipt, WalletService},
        ServiceError,
    },
    domain::core::{
        BookingDetails, BookingRequestId, BookingRequestPage, BookingRequestSummary,
        BookingSlot, BookingWizard, ContactInfo, DayOverview, DayStatus, Money, PerformerId,
        TimeRange, Transaction, VenueId, Wallet,
    },
    domain::Entity,
    infrastructure::{
        core::{
            EventStoreBookingRequestRepository, EventStoreCalendarRepository,
            EventStoreWalletRepository, MeiliBookingRequestQuery,
        },
        memory::MemoryPartyDirectory,
    },
    EncoreConfig,
};

type AppBookingService = BookingService<
    EventStoreCalendarRepository,
    EventStoreBookingRequestRepository,
    MeiliBookingRequestQuery,
    MemoryPartyDirectory,
>;

struct AppState {
    booking: AppBookingService,
    wallet: WalletService<EventStoreWalletRepository>,
}

#[tokio::main]
async fn main() {
    match EncoreConfig::load() {
        Ok(config) => {
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::from(&config.logger.level))
                .init();
            if let Err(error) = serve(&config).await {
                error!("アプリケーションエラー: {}", error);
            }
        }
        Err(error) => {
            tracing_subscriber::fmt::init();
            error!("アプリケーションエラー: {}", error)
        }
    }
}

async fn serve(config: &EncoreConfig) -> Result<(), Box<dyn Error>> {
    let settings = config.eventstore.url.parse::<eventstore::ClientSettings>()?;
    let client = eventstore::Client::new(settings)?;
    let meilisearch =
        meilisearch_sdk::Client::new(&config.meilisearch.url, &config.meilisearch.api_key);
    let state = Arc::new(AppState {
        booking: BookingService::new(
            EventStoreCalendarRepository::new(client.clone()),
            EventStoreBookingRequestRepository::new(client.clone()),
            MeiliBookingRequestQuery::new(meilisearch),
            MemoryPartyDirectory::new(),
        ),
        wallet: WalletService::new(EventStoreWalletRepository::new(client)),
    });

    let app = Router::new()
        .route(
            "/v1/performers/:performer_id/availability",
            get(get_availability).put(put_availability),
        )
        .route(
            "/v1/performers/:performer_id/availability/range",
            put(put_availability_range),
        )
        .route(
            "/v1/performers/:performer_id/availability/week",
            get(get_weekly_overview),
        )
        .route("/v1/performers/:performer_id/slots", get(get_slots))
        .route(
            "/v1/performers/:performer_id/booking-requests",
            get(list_booking_requests),
        )
        .route("/v1/booking-requests", post(create_booking_request))
        .route(
            "/v1/booking-requests/:request_id/respond",
            post(respond_booking_request),
        )
        .route("/v1/performers/:performer_id/wallet", get(get_wallet))
        .route(
            "/v1/performers/:performer_id/wallet/transactions",
            post(post_wallet_transaction),
        )
        .with_state(state);

    let addr: SocketAddr = config.web.bind.parse()?;
    let tls = RustlsConfig::from_pem_file(&config.web.tls_cert, &config.web.tls_key).await?;
    info!("HTTPSサーバを起動: {}", addr);
    axum_server::bind_rustls(addr, tls)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(value: ServiceError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::InvalidTransition => StatusCode::CONFLICT,
            ServiceError::SlotNoLongerAvailable => StatusCode::CONFLICT,
            ServiceError::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
            ServiceError::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::DataAccess(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("データアクセスエラー: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(performer_id): Path<u64>,
) -> Result<Json<Vec<DayOverview>>, ApiError> {
    let days = state
        .booking
        .availability(PerformerId::from(performer_id))
        .await?;
    Ok(Json(days))
}

async fn put_availability(
    State(state): State<Arc<AppState>>,
    Path(performer_id): Path<u64>,
    Json(days): Json<Vec<DayOverview>>,
) -> Result<StatusCode, ApiError> {
    state
        .booking
        .set_days(PerformerId::from(performer_id), days)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RangeBody {
    start_date: NaiveDate,
    end_date: NaiveDate,
    status: DayStatus,
}

async fn put_availability_range(
    State(state): State<Arc<AppState>>,
    Path(performer_id): Path<u64>,
    Json(body): Json<RangeBody>,
) -> Result<StatusCode, ApiError> {
    state
        .booking
        .set_range_status(
            PerformerId::from(performer_id),
            body.start_date,
            body.end_date,
            body.status,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct DateQuery {
    date: NaiveDate,
}

async fn get_weekly_overview(
    State(state): State<Arc<AppState>>,
    Path(performer_id): Path<u64>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Vec<DayOverview>>, ApiError> {
    let days = state
        .booking
        .weekly_overview(PerformerId::from(performer_id), query.date)
        .await?;
    Ok(Json(days))
}

async fn get_slots(
    State(state): State<Arc<AppState>>,
    Path(performer_id): Path<u64>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Vec<BookingSlot>>, ApiError> {
    let slots = state
        .booking
        .bookable_slots(PerformerId::from(performer_id), query.date)
        .await?;
    Ok(Json(slots))
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn list_booking_requests(
    State(state): State<Arc<AppState>>,
    Path(performer_id): Path<u64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<BookingRequestPage>, ApiError> {
    let page = state
        .booking
        .list_requests(
            PerformerId::from(performer_id),
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(20),
        )
        .await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
struct CreateBookingRequestBody {
    performer_id: u64,
    venue_id: u64,
    event_type: String,
    date: NaiveDate,
    time_range: TimeRange,
    contact: ContactInfo,
}

/// 予約ウィザードを一括で進めて予約リクエストを作成する
async fn create_booking_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBookingRequestBody>,
) -> Result<(StatusCode, Json<BookingRequestSummary>), ApiError> {
    let performer_id = PerformerId::from(body.performer_id);
    let status = state.booking.day_status(performer_id, body.date).await?;

    let mut wizard = BookingWizard::new(performer_id, VenueId::from(body.venue_id));
    wizard
        .select_date(body.date, status)
        .map_err(ServiceError::from)?;
    wizard
        .select_time(body.time_range, status)
        .map_err(ServiceError::from)?;
    let tier_label = wizard
        .highlighted_tier()
        .map(|t| t.label)
        .ok_or_else(|| {
            ServiceError::Validation("no pricing tier suits the requested duration".to_owned())
        })?;
    wizard.select_tier(tier_label).map_err(ServiceError::from)?;
    wizard
        .enter_details(BookingDetails {
            event_name: body.event_type,
            contact_name: body.contact.name,
            phone: body.contact.phone,
        })
        .map_err(ServiceError::from)?;

    let draft = wizard.confirm().map_err(ServiceError::from)?;
    let request = state.booking.submit_request(draft).await?;
    wizard.complete().map_err(ServiceError::from)?;
    Ok((StatusCode::CREATED, Json(request.summary())))
}

#[derive(Deserialize)]
struct RespondBody {
    decision: BookingDecision,
}

async fn respond_booking_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<u64>,
    Json(body): Json<RespondBody>,
) -> Result<Json<BookingRequestSummary>, ApiError> {
    let request = state
        .booking
        .respond(BookingRequestId::from(request_id), body.decision)
        .await?;
    Ok(Json(request.summary()))
}

#[derive(serde::Serialize)]
struct WalletBody {
    performer_id: PerformerId,
    balance: Money,
    transactions: Vec<Transaction>,
}

impl From<Wallet> for WalletBody {
    fn from(value: Wallet) -> Self {
        Self {
            performer_id: value.id(),
            balance: value.balance(),
            transactions: value.transactions().to_vec(),
        }
    }
}

async fn get_wallet(
    State(state): State<Arc<AppState>>,
    Path(performer_id): Path<u64>,
) -> Result<Json<WalletBody>, ApiError> {
    let wallet = state
        .wallet
        .wallet(PerformerId::from(performer_id))
        .await?;
    Ok(Json(wallet.into()))
}

#[derive(Deserialize)]
struct WalletTransactionBody {
    action: WalletAction,
    amount: u64,
}

async fn post_wallet_transaction(
    State(state): State<Arc<AppState>>,
    Path(performer_id): Path<u64>,
    Json(body): Json<WalletTransactionBody>,
) -> Result<Json<WalletReceipt>, ApiError> {
    let performer_id = PerformerId::from(performer_id);
    let amount = Money::usd(body.amount);
    let receipt = match body.action {
        WalletAction::TopUp => state.wallet.top_up(performer_id, amount).await?,
        WalletAction::ChargeFee => state.wallet.charge_booking_fee(performer_id, amount).await?,
    };
    Ok(Json(receipt))
}
