pub mod app;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod error;
pub mod keepalive;
pub mod limiter;
pub mod state;
pub mod storage;

pub mod crypto {
    pub mod code;
}

pub mod models {
    pub mod session;
}

pub mod repositories {
    pub mod session;
    pub mod session_redis;
}

pub mod services {
    pub mod exchange;
    pub mod images;
}

pub mod handlers {
    pub mod exchange;
    pub mod health;
    pub mod images;
}

pub mod middleware_layer {
    pub mod access_key;
    pub mod ip_block;
    pub mod rate_limit;
}

pub mod validation {
    pub mod exchange;
}
