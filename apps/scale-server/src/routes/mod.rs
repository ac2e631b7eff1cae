pub mod health;
pub mod measurements;
pub mod modbus;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(modbus::router())
                .merge(measurements::router())
                .merge(crate::openapi::router()),
        )
        .with_state(state)
}
