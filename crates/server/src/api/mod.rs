pub mod dead_letters;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod videos;

pub use routes::create_router;
