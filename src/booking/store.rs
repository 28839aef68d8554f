//! 内存预订存储
//!
//! 启动时写入种子数据；预订 id 单调递增，删除后不复用。
//! 每个预订只对其所属 subject 可见，其他人访问一律视为不存在。

use std::collections::BTreeMap;

use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::RwLock;

use super::model::{Accommodation, Booking, BookingRequest};

#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("Booking not found")]
    NotFound,

    #[error("Accommodation {0} not found")]
    UnknownAccommodation(u64),

    #[error("No rooms available at {0}")]
    SoldOut(String),

    #[error("{0}")]
    Invalid(String),
}

struct Inner {
    accommodations: Vec<Accommodation>,
    bookings: BTreeMap<u64, Booking>,
    next_id: u64,
}

pub struct BookingStore {
    inner: RwLock<Inner>,
}

impl BookingStore {
    pub fn new(accommodations: Vec<Accommodation>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                accommodations,
                bookings: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// 四家酒店 + 两位演示用户各一条预订
    pub fn seeded() -> Self {
        let accommodations = vec![
            accommodation(1, "Hotel des Coquelicots", "Paris", 180.0, 12),
            accommodation(2, "Hotel California", "Los Angeles", 150.0, 8),
            accommodation(3, "Grand Budapest", "Budapest", 120.0, 5),
            accommodation(4, "The Savoy Garden", "London", 240.0, 3),
        ];
        let mut inner = Inner {
            accommodations,
            bookings: BTreeMap::new(),
            next_id: 1,
        };
        let seeds = [
            ("john.doe@gravitee.io", 2, date(2025, 12, 12), date(2025, 12, 17), 2),
            ("tom.smith@gravitee.io", 3, date(2026, 1, 5), date(2026, 1, 10), 1),
        ];
        for (user, accommodation_id, check_in, check_out, guests) in seeds {
            let req = BookingRequest {
                accommodation_id,
                check_in,
                check_out,
                guests,
            };
            if let Err(e) = inner.insert(user, &req) {
                tracing::warn!(error = %e, "skipping seed booking");
            }
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// 按地点（大小写不敏感的子串）搜索；不给地点时返回全部
    pub async fn search(&self, location: Option<&str>) -> Vec<Accommodation> {
        let inner = self.inner.read().await;
        let needle = location.map(|l| l.trim().to_lowercase()).filter(|l| !l.is_empty());
        inner
            .accommodations
            .iter()
            .filter(|a| match &needle {
                Some(n) => a.location.to_lowercase().contains(n) || a.name.to_lowercase().contains(n),
                None => true,
            })
            .cloned()
            .collect()
    }

    pub async fn list_for(&self, user: &str) -> Vec<Booking> {
        let inner = self.inner.read().await;
        inner
            .bookings
            .values()
            .filter(|b| b.user == user)
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: u64, user: &str) -> Result<Booking, StoreError> {
        let inner = self.inner.read().await;
        inner.owned(id, user).cloned()
    }

    pub async fn create(&self, user: &str, req: &BookingRequest) -> Result<Booking, StoreError> {
        let mut inner = self.inner.write().await;
        inner.insert(user, req)
    }

    pub async fn update(&self, id: u64, user: &str, req: &BookingRequest) -> Result<Booking, StoreError> {
        req.validate().map_err(StoreError::Invalid)?;
        let mut inner = self.inner.write().await;
        let previous = inner.owned(id, user)?.clone();
        let target = inner.accommodation(req.accommodation_id)?.clone();
        if target.id != previous.accommodation_id && target.available_rooms == 0 {
            return Err(StoreError::SoldOut(target.name));
        }
        if target.id != previous.accommodation_id {
            inner.adjust_rooms(previous.accommodation_id, 1);
            inner.adjust_rooms(target.id, -1);
        }
        let updated = Booking {
            id,
            user: user.to_string(),
            accommodation_id: target.id,
            hotel_name: target.name.clone(),
            check_in: req.check_in,
            check_out: req.check_out,
            guests: req.guests,
            total_price: target.price_per_night * req.nights() as f64,
        };
        inner.bookings.insert(id, updated.clone());
        Ok(updated)
    }

    pub async fn delete(&self, id: u64, user: &str) -> Result<Booking, StoreError> {
        let mut inner = self.inner.write().await;
        inner.owned(id, user)?;
        let removed = inner.bookings.remove(&id).ok_or(StoreError::NotFound)?;
        inner.adjust_rooms(removed.accommodation_id, 1);
        Ok(removed)
    }
}

impl Inner {
    fn owned(&self, id: u64, user: &str) -> Result<&Booking, StoreError> {
        self.bookings
            .get(&id)
            .filter(|b| b.user == user)
            .ok_or(StoreError::NotFound)
    }

    fn accommodation(&self, id: u64) -> Result<&Accommodation, StoreError> {
        self.accommodations
            .iter()
            .find(|a| a.id == id)
            .ok_or(StoreError::UnknownAccommodation(id))
    }

    fn adjust_rooms(&mut self, id: u64, delta: i64) {
        if let Some(a) = self.accommodations.iter_mut().find(|a| a.id == id) {
            a.available_rooms = (a.available_rooms as i64 + delta).max(0) as u32;
        }
    }

    fn insert(&mut self, user: &str, req: &BookingRequest) -> Result<Booking, StoreError> {
        req.validate().map_err(StoreError::Invalid)?;
        let target = self.accommodation(req.accommodation_id)?.clone();
        if target.available_rooms == 0 {
            return Err(StoreError::SoldOut(target.name));
        }
        let id = self.next_id;
        self.next_id += 1;
        let booking = Booking {
            id,
            user: user.to_string(),
            accommodation_id: target.id,
            hotel_name: target.name,
            check_in: req.check_in,
            check_out: req.check_out,
            guests: req.guests,
            total_price: target.price_per_night * req.nights() as f64,
        };
        self.adjust_rooms(target.id, -1);
        self.bookings.insert(id, booking.clone());
        Ok(booking)
    }
}

fn accommodation(id: u64, name: &str, location: &str, price_per_night: f64, available_rooms: u32) -> Accommodation {
    Accommodation {
        id,
        name: name.to_string(),
        location: location.to_string(),
        price_per_night,
        available_rooms,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}
