pub mod outage_repo;
pub mod settings_repo;

pub use outage_repo::OutageRepository;
pub use settings_repo::SettingsRepository;
