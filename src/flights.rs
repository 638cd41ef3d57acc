use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::tools::{BookFlightArgs, SearchFlightsArgs};

static AIRPORT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{3}$").expect("airport code pattern"));

/// Whatever a backend hands back. Falsy values (null, false, 0, "", [] and
/// {}) count as "no result".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionResult(pub Value);

impl FunctionResult {
    pub fn empty() -> Self {
        FunctionResult(Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64() == Some(0.0),
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
        }
    }

    /// Function responses must be objects on the wire.
    pub fn into_response_object(self) -> Value {
        match self.0 {
            Value::Object(_) => self.0,
            other => json!({ "result": other }),
        }
    }
}

#[async_trait]
pub trait FlightBackend: Send + Sync {
    async fn search_flights(&self, args: &SearchFlightsArgs) -> anyhow::Result<FunctionResult>;
    async fn book_flight(&self, args: &BookFlightArgs) -> anyhow::Result<FunctionResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatClass {
    Economy,
    Business,
    FirstClass,
}

impl FromStr for SeatClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_lowercase().replace([' ', '-'], "_");
        match norm.as_str() {
            "economy" | "coach" => Ok(SeatClass::Economy),
            "business" => Ok(SeatClass::Business),
            "first_class" | "first" => Ok(SeatClass::FirstClass),
            _ => anyhow::bail!("unknown seat type {:?}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatInventory {
    pub available: u32,
    pub price_usd: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flight {
    pub id: i64,
    pub airline: String,
    pub flight_number: String,
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub departure_time: String,
    pub seats: BTreeMap<SeatClass, SeatInventory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: Uuid,
    pub flight_id: i64,
    pub seat_type: SeatClass,
    pub num_seats: u32,
    pub total_price_usd: u32,
    pub booked_at: DateTime<Utc>,
}

/// In-memory schedule standing in for a real reservation system.
pub struct MockFlightManager {
    flights: Mutex<Vec<Flight>>,
}

impl MockFlightManager {
    pub fn new(flights: Vec<Flight>) -> Self {
        Self { flights: Mutex::new(flights) }
    }

    pub fn with_default_schedule() -> Self {
        Self::new(default_schedule())
    }

    #[cfg(test)]
    pub async fn flight(&self, id: i64) -> Option<Flight> {
        self.flights.lock().await.iter().find(|f| f.id == id).cloned()
    }
}

impl Default for MockFlightManager {
    fn default() -> Self {
        Self::with_default_schedule()
    }
}

fn normalize_airport(code: &str) -> Option<String> {
    let code = code.trim();
    AIRPORT_CODE.is_match(code).then(|| code.to_uppercase())
}

#[async_trait]
impl FlightBackend for MockFlightManager {
    async fn search_flights(&self, args: &SearchFlightsArgs) -> anyhow::Result<FunctionResult> {
        let (Some(origin), Some(destination)) = (normalize_airport(&args.origin), normalize_airport(&args.destination)) else {
            debug!(origin = %args.origin, destination = %args.destination, "malformed airport code");
            return Ok(FunctionResult::empty());
        };
        let Ok(date) = NaiveDate::parse_from_str(args.departure_date.trim(), "%Y-%m-%d") else {
            debug!(date = %args.departure_date, "malformed departure date");
            return Ok(FunctionResult::empty());
        };
        let flights = self.flights.lock().await;
        let matches: Vec<&Flight> = flights
            .iter()
            .filter(|f| f.origin == origin && f.destination == destination && f.departure_date == date)
            .collect();
        info!(%origin, %destination, %date, found = matches.len(), "flight search");
        if matches.is_empty() {
            return Ok(FunctionResult::empty());
        }
        Ok(FunctionResult(json!({ "flights": matches })))
    }

    async fn book_flight(&self, args: &BookFlightArgs) -> anyhow::Result<FunctionResult> {
        let Ok(seat_type) = args.seat_type.parse::<SeatClass>() else {
            debug!(seat_type = %args.seat_type, "unknown seat type");
            return Ok(FunctionResult::empty());
        };
        let Ok(num_seats) = u32::try_from(args.num_seats) else {
            return Ok(FunctionResult::empty());
        };
        if num_seats == 0 {
            return Ok(FunctionResult::empty());
        }
        let mut flights = self.flights.lock().await;
        let Some(inventory) = flights
            .iter_mut()
            .find(|f| f.id == args.flight_id)
            .and_then(|f| f.seats.get_mut(&seat_type))
        else {
            return Ok(FunctionResult::empty());
        };
        if inventory.available < num_seats {
            info!(flight_id = args.flight_id, ?seat_type, requested = num_seats, available = inventory.available, "not enough seats");
            return Ok(FunctionResult::empty());
        }
        inventory.available -= num_seats;
        let booking = Booking {
            booking_id: Uuid::new_v4(),
            flight_id: args.flight_id,
            seat_type,
            num_seats,
            total_price_usd: inventory.price_usd * num_seats,
            booked_at: Utc::now(),
        };
        info!(booking_id = %booking.booking_id, flight_id = booking.flight_id, ?seat_type, num_seats, "flight booked");
        Ok(FunctionResult(serde_json::to_value(booking)?))
    }
}

fn default_schedule() -> Vec<Flight> {
    #[rustfmt::skip]
    let rows: [(i64, &str, &str, &str, &str, (i32, u32, u32), &str, [u32; 3]); 10] = [
        (1,  "United",   "UA 1201", "LAX", "SFO", (2024, 6, 1), "07:15", [129, 389, 649]),
        (2,  "Delta",    "DL 812",  "LAX", "SFO", (2024, 6, 1), "12:40", [109, 359, 599]),
        (3,  "Alaska",   "AS 1933", "LAX", "SFO", (2024, 6, 2), "09:05", [99,  319, 549]),
        (4,  "United",   "UA 1202", "SFO", "LAX", (2024, 6, 1), "18:30", [139, 399, 659]),
        (5,  "JetBlue",  "B6 524",  "BOS", "JFK", (2024, 6, 1), "08:00", [89,  289, 489]),
        (6,  "Delta",    "DL 2417", "JFK", "LAX", (2024, 6, 3), "06:45", [249, 899, 1499]),
        (7,  "American", "AA 117",  "JFK", "LAX", (2024, 6, 3), "17:20", [279, 949, 1599]),
        (8,  "Alaska",   "AS 331",  "SEA", "SFO", (2024, 6, 2), "10:10", [119, 369, 579]),
        (9,  "United",   "UA 2011", "SFO", "BOS", (2024, 6, 2), "22:55", [299, 1049, 1699]),
        (10, "American", "AA 2470", "BOS", "LAX", (2024, 6, 4), "13:35", [269, 919, 1549]),
    ];
    rows.into_iter()
        .filter_map(|(id, airline, number, origin, destination, (y, m, d), time, prices)| {
            let departure_date = NaiveDate::from_ymd_opt(y, m, d)?;
            let seats = [
                (SeatClass::Economy, 120, prices[0]),
                (SeatClass::Business, 24, prices[1]),
                (SeatClass::FirstClass, 8, prices[2]),
            ]
            .into_iter()
            .map(|(class, available, price_usd)| (class, SeatInventory { available, price_usd }))
            .collect();
            Some(Flight {
                id,
                airline: airline.into(),
                flight_number: number.into(),
                origin: origin.into(),
                destination: destination.into(),
                departure_date,
                departure_time: time.into(),
                seats,
            })
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    fn search(origin: &str, destination: &str, date: &str) -> SearchFlightsArgs {
        SearchFlightsArgs { origin: origin.into(), destination: destination.into(), departure_date: date.into() }
    }

    fn book(flight_id: i64, seat_type: &str, num_seats: i64) -> BookFlightArgs {
        BookFlightArgs { flight_id, seat_type: seat_type.into(), num_seats }
    }

    #[test]
    fn falsy_results() {
        assert!(FunctionResult::empty().is_empty());
        assert!(FunctionResult(json!([])).is_empty());
        assert!(FunctionResult(json!({})).is_empty());
        assert!(FunctionResult(json!("")).is_empty());
        assert!(FunctionResult(json!(0)).is_empty());
        assert!(!FunctionResult(json!({"flights": []})).is_empty());
        assert!(!FunctionResult(json!([1])).is_empty());
        assert_eq!(FunctionResult(json!([1])).into_response_object(), json!({"result": [1]}));
    }

    #[tokio::test]
    async fn search_matches_route_and_date() {
        let mgr = MockFlightManager::default();
        let res = mgr.search_flights(&search("lax", "SFO", "2024-06-01")).await.unwrap();
        let flights = res.0["flights"].as_array().unwrap();
        assert_eq!(flights.len(), 2);
        assert!(flights.iter().all(|f| f["origin"] == "LAX" && f["destination"] == "SFO"));
        assert_eq!(flights[0]["seats"]["first_class"]["price_usd"], 649);
    }

    #[tokio::test]
    async fn search_with_no_match_or_bad_input_is_empty() {
        let mgr = MockFlightManager::default();
        assert!(mgr.search_flights(&search("LAX", "SFO", "2030-01-01")).await.unwrap().is_empty());
        assert!(mgr.search_flights(&search("Los Angeles", "SFO", "2024-06-01")).await.unwrap().is_empty());
        assert!(mgr.search_flights(&search("LAX", "SFO", "June 1st")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn booking_decrements_inventory() {
        let mgr = MockFlightManager::default();
        let res = mgr.book_flight(&book(1, "Business", 2)).await.unwrap();
        assert!(!res.is_empty());
        let booking: Booking = serde_json::from_value(res.0).unwrap();
        assert_eq!(booking.seat_type, SeatClass::Business);
        assert_eq!(booking.total_price_usd, 2 * 389);
        let flight = mgr.flight(1).await.unwrap();
        assert_eq!(flight.seats[&SeatClass::Business].available, 22);
    }

    #[tokio::test]
    async fn booking_failures_are_empty() {
        let mgr = MockFlightManager::default();
        assert!(mgr.book_flight(&book(999, "economy", 1)).await.unwrap().is_empty());
        assert!(mgr.book_flight(&book(1, "premium", 1)).await.unwrap().is_empty());
        assert!(mgr.book_flight(&book(1, "economy", 0)).await.unwrap().is_empty());
        assert!(mgr.book_flight(&book(1, "economy", -3)).await.unwrap().is_empty());
        assert!(mgr.book_flight(&book(1, "first_class", 9)).await.unwrap().is_empty());
        assert_eq!(mgr.flight(1).await.unwrap().seats[&SeatClass::FirstClass].available, 8);
    }

    #[test]
    fn seat_class_parsing() {
        assert_eq!("first class".parse::<SeatClass>().unwrap(), SeatClass::FirstClass);
        assert_eq!("First-Class".parse::<SeatClass>().unwrap(), SeatClass::FirstClass);
        assert_eq!(" economy ".parse::<SeatClass>().unwrap(), SeatClass::Economy);
        assert!("steerage".parse::<SeatClass>().is_err());
    }
}
