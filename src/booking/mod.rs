//! 预订 REST 后端：酒店搜索（公开）与预订 CRUD（bearer + scope + 策略）

pub mod api;
pub mod model;
pub mod store;

pub use api::{create_router, BookingApiError, BookingState, PolicyCheck, TokenVerifier};
pub use model::{Accommodation, Booking, BookingRequest};
pub use store::{BookingStore, StoreError};
