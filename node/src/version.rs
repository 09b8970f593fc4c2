pub const CARDIO_VERSION: &str = env!("CARGO_PKG_VERSION");
