mod settings;

pub use settings::{
    ApiConfig, LogConfig, LogFormat, RealtimeConfig, SessionConfig, Settings, StatusConfig,
};
