use staybook_core::BookingService;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub booking: BookingService,
    pub auth: AuthConfig,
}
