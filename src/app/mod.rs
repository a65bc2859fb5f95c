pub mod auth;
pub mod credentials;
pub mod engagement;
pub mod posts;
pub mod tokens;
