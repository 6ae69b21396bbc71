//! Notification sinks: seller dashboard events and one-time code delivery.

pub mod connection;
pub mod dispatcher;
pub mod otp;
