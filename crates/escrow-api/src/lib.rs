pub mod admin;
pub mod auth;
pub mod clock;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod middleware;
pub mod password_reset;
pub mod payfast;
pub mod payments;
pub mod routes;
pub mod state;
pub mod transactions;

#[cfg(test)]
pub(crate) mod testing;
