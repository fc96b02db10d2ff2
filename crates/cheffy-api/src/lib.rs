pub mod config;
pub mod conversations;
pub mod error;
pub mod generation;
pub mod middleware;
pub mod recipes;
pub mod routes;
pub mod rows;
pub mod session;
pub mod state;
