mod base;
mod bus;

pub use base::{ExecutionEvent, Topic};
pub use bus::{NotificationBus, Subscription};
