//! 预订 API 数据模型

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Accommodation {
    pub id: u64,
    pub name: String,
    pub location: String,
    pub price_per_night: f64,
    pub available_rooms: u32,
}

/// 一条预订；`user` 为凭证解析出的 subject（邮箱）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: u64,
    pub user: String,
    pub accommodation_id: u64,
    pub hotel_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub total_price: f64,
}

/// 新建 / 修改预订的请求体
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BookingRequest {
    pub accommodation_id: u64,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[serde(default = "default_guests")]
    pub guests: u32,
}

fn default_guests() -> u32 {
    1
}

impl BookingRequest {
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.nights() < 1 {
            return Err("check_out must be at least one day after check_in".to_string());
        }
        if self.guests == 0 {
            return Err("guests must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AccommodationQuery {
    pub location: Option<String>,
}
