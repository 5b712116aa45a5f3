pub mod admin;
pub mod health;
pub mod identity;
pub mod two_factor;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::state::AppState;

pub use admin::{require_admin_trust, trust_check};
pub use health::health_check;
pub use identity::CurrentUser;
pub use two_factor::{
    abandon_2fa_setup, disable_2fa, enable_2fa, revoke_2fa_session, setup_2fa, status_2fa,
    verify_2fa,
};

/// Router の構築
pub fn router(state: AppState) -> Router {
    // 特権ルート：信頼状態のゲートを通す
    let admin = Router::new()
        .route("/api/admin/trust-check", get(trust_check))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_trust,
        ));

    Router::new()
        .route("/api/health", get(health_check))
        // 二要素認証
        .route("/api/2fa/setup", post(setup_2fa).delete(abandon_2fa_setup))
        .route("/api/2fa/enable", post(enable_2fa))
        .route("/api/2fa/verify", post(verify_2fa))
        .route("/api/2fa/disable", post(disable_2fa))
        .route("/api/2fa/status", get(status_2fa))
        .route("/api/2fa/session/revoke", post(revoke_2fa_session))
        .merge(admin)
        .with_state(state)
}
